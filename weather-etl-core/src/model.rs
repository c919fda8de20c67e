use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One configured observation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct City(String);

impl City {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for City {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for City {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Current-weather payload as served by `/data/2.5/weather`.
///
/// Temperatures are in Kelvin, timestamps are UTC epoch seconds and
/// `timezone` is the city's UTC offset in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub name: String,
    pub sys: RawSys,
    pub weather: Vec<RawWeather>,
    pub main: RawMain,
    pub wind: RawWind,
    pub dt: i64,
    pub timezone: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSys {
    pub country: String,
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWeather {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMain {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: u8,
    pub pressure: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWind {
    pub speed: f64,
}

/// Flat, unit-converted row for one city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub city: String,
    pub country: String,
    pub description: String,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub humidity_pct: u8,
    pub pressure: u32,
    pub wind_speed_mps: f64,
    pub time_of_record: NaiveDateTime,
    pub sunrise_local: NaiveDateTime,
    pub sunset_local: NaiveDateTime,
}

/// Ordered records of a single run, in configured city order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<NormalizedRecord>,
}

impl Batch {
    pub(crate) fn new(records: Vec<NormalizedRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
