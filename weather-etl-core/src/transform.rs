use chrono::NaiveDateTime;

use crate::{
    error::PipelineError,
    model::{City, NormalizedRecord, RawObservation},
    units::{kelvin_to_celsius, local_time_from_epoch},
};

/// Flatten one observation into a record: Kelvin to Celsius, epochs to the
/// city's local wall-clock.
pub fn normalize(raw: RawObservation, city: &City) -> Result<NormalizedRecord, PipelineError> {
    let schema = |reason: String| PipelineError::SchemaMismatch { city: city.to_string(), reason };

    let description = raw
        .weather
        .into_iter()
        .next()
        .map(|w| w.description)
        .ok_or_else(|| schema("`weather` list is empty".to_string()))?;

    let local = |field: &str, epoch: i64| -> Result<NaiveDateTime, PipelineError> {
        local_time_from_epoch(epoch, raw.timezone).ok_or_else(|| {
            schema(format!("`{field}`={epoch} with offset {} is out of range", raw.timezone))
        })
    };

    Ok(NormalizedRecord {
        time_of_record: local("dt", raw.dt)?,
        sunrise_local: local("sys.sunrise", raw.sys.sunrise)?,
        sunset_local: local("sys.sunset", raw.sys.sunset)?,
        city: raw.name,
        country: raw.sys.country,
        description,
        temperature_c: kelvin_to_celsius(raw.main.temp),
        feels_like_c: kelvin_to_celsius(raw.main.feels_like),
        temp_min_c: kelvin_to_celsius(raw.main.temp_min),
        temp_max_c: kelvin_to_celsius(raw.main.temp_max),
        humidity_pct: raw.main.humidity,
        pressure: raw.main.pressure,
        wind_speed_mps: raw.wind.speed,
    })
}
