//! Batch aggregation and the single terminal write.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::{
    error::{PipelineError, RunError},
    model::{Batch, NormalizedRecord},
    storage::{ObjectKey, ObjectStore},
};

/// Column headers, in record field order.
pub const CSV_HEADER: [&str; 13] = [
    "City",
    "Country",
    "Description",
    "Temperature (C)",
    "Feels Like (C)",
    "Minimum Temp (C)",
    "Maximum Temp (C)",
    "Humidity",
    "Pressure",
    "Wind Speed M/S",
    "Time of Record",
    "Sunrise (Local Time)",
    "Sunset (Local Time)",
];

const OBJECT_PREFIX: &str = "current_weather_data_multi_city_";
const OBJECT_EXTENSION: &str = "csv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What to do with a run where some cities failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Any failed city fails the run; nothing is written.
    #[default]
    Strict,
    /// Write the cities that succeeded and report the rest.
    Lenient,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Strict => f.write_str("strict"),
            FailurePolicy::Lenient => f.write_str("lenient"),
        }
    }
}

/// Per-city results that passed the failure policy, in city order.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    records: Vec<NormalizedRecord>,
    failures: Vec<PipelineError>,
}

impl Admitted {
    pub fn into_batch(self) -> Aggregated {
        Aggregated { batch: Batch::new(self.records), failures: self.failures }
    }
}

/// A batch ready to write, plus the failures tolerated to build it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub batch: Batch,
    pub failures: Vec<PipelineError>,
}

/// Decide whether the run may proceed given per-city results in city order.
pub fn admit(
    results: Vec<Result<NormalizedRecord, PipelineError>>,
    policy: FailurePolicy,
) -> Result<Admitted, RunError> {
    let total = results.len();
    let mut records = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(err) => failures.push(err),
        }
    }

    let fail = policy == FailurePolicy::Strict && !failures.is_empty();
    if fail || records.is_empty() {
        return Err(RunError::Cities { total, failures });
    }

    Ok(Admitted { records, failures })
}

/// Render the batch as CSV: header row then one row per record.
pub fn render_csv(batch: &Batch) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));

    for r in batch.records() {
        push_row(
            &mut out,
            [
                r.city.clone(),
                r.country.clone(),
                r.description.clone(),
                format_float(r.temperature_c),
                format_float(r.feels_like_c),
                format_float(r.temp_min_c),
                format_float(r.temp_max_c),
                r.humidity_pct.to_string(),
                r.pressure.to_string(),
                format_float(r.wind_speed_mps),
                format_time(r.time_of_record),
                format_time(r.sunrise_local),
                format_time(r.sunset_local),
            ],
        );
    }

    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(&field));
    }
    out.push('\n');
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// Debug keeps the decimal point on whole numbers ("27.0").
fn format_float(value: f64) -> String {
    format!("{value:?}")
}

fn format_time(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Object name for a batch written at `now`.
pub fn object_name(now: NaiveDateTime) -> String {
    format!("{OBJECT_PREFIX}{}.{OBJECT_EXTENSION}", now.format("%d%m%Y%H%M%S"))
}

/// Writes one batch per run. A second write on the same writer is rejected.
#[derive(Debug)]
pub struct BatchWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    written: Mutex<Option<ObjectKey>>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self { store, bucket: bucket.into(), written: Mutex::new(None) }
    }

    /// Write using the local wall-clock for the object name.
    pub async fn write(&self, batch: &Batch) -> Result<ObjectKey, PipelineError> {
        self.write_at(batch, Local::now().naive_local()).await
    }

    pub async fn write_at(
        &self,
        batch: &Batch,
        now: NaiveDateTime,
    ) -> Result<ObjectKey, PipelineError> {
        let key = ObjectKey::new(self.bucket.clone(), object_name(now));

        {
            let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = written.as_ref() {
                return Err(PipelineError::AlreadyWritten { destination: previous.to_string() });
            }
            *written = Some(key.clone());
        }

        let body = render_csv(batch).into_bytes();
        tracing::info!(destination = %key, rows = batch.len(), bytes = body.len(), "writing batch");

        self.store.put(&key, body).await.map_err(|e| PipelineError::WriteFailed {
            destination: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryObjectStore;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 25).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn record(city: &str, description: &str) -> NormalizedRecord {
        NormalizedRecord {
            city: city.to_string(),
            country: "FR".to_string(),
            description: description.to_string(),
            temperature_c: 27.0,
            feels_like_c: 25.850000000000023,
            temp_min_c: -1.5,
            temp_max_c: 30.25,
            humidity_pct: 40,
            pressure: 1009,
            wind_speed_mps: 5.5,
            time_of_record: at(23, 13, 20),
            sunrise_local: at(7, 56, 40),
            sunset_local: at(17, 6, 40),
        }
    }

    fn failed(city: &str) -> PipelineError {
        PipelineError::FetchFailed { city: city.into(), attempts: 3, reason: "timeout".into() }
    }

    #[test]
    fn strict_policy_fails_on_any_city() {
        let results = vec![Ok(record("Paris", "clear")), Err(failed("Seoul"))];

        let err = admit(results, FailurePolicy::Strict).unwrap_err();
        assert_eq!(err, RunError::Cities { total: 2, failures: vec![failed("Seoul")] });
    }

    #[test]
    fn lenient_policy_keeps_successes_in_order() {
        let results = vec![
            Ok(record("Paris", "clear")),
            Err(failed("Seoul")),
            Ok(record("Tokyo", "rain")),
        ];

        let agg = admit(results, FailurePolicy::Lenient).unwrap().into_batch();
        let cities: Vec<_> = agg.batch.records().iter().map(|r| r.city.as_str()).collect();
        assert_eq!(cities, ["Paris", "Tokyo"]);
        assert_eq!(agg.failures, vec![failed("Seoul")]);
    }

    #[test]
    fn lenient_policy_still_fails_when_nothing_succeeded() {
        let results = vec![Err(failed("Paris")), Err(failed("Seoul"))];

        let err = admit(results, FailurePolicy::Lenient).unwrap_err();
        assert!(matches!(err, RunError::Cities { total: 2, ref failures } if failures.len() == 2));
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let batch = Batch::new(vec![record("Paris", "clear sky"), record("Seoul", "rain, heavy")]);

        let csv = render_csv(&batch);
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(
            lines[1],
            "Paris,FR,clear sky,27.0,25.850000000000023,-1.5,30.25,40,1009,5.5,\
             2025-11-25 23:13:20,2025-11-25 07:56:40,2025-11-25 17:06:40"
        );
        assert!(lines[2].starts_with("Seoul,FR,\"rain, heavy\",27.0,"));
    }

    #[test]
    fn escape_quotes_special_fields() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn object_name_uses_day_first_timestamp() {
        assert_eq!(object_name(at(9, 5, 7)), "current_weather_data_multi_city_25112025090507.csv");
    }

    #[tokio::test]
    async fn writer_puts_once_and_rejects_second_write() {
        let store = Arc::new(MemoryObjectStore::default());
        let writer = BatchWriter::new(store.clone(), "weather-data-etl-s3");
        let batch = Batch::new(vec![record("Paris", "clear")]);

        let key = writer.write_at(&batch, at(12, 0, 0)).await.unwrap();
        assert_eq!(
            key.to_string(),
            "s3://weather-data-etl-s3/current_weather_data_multi_city_25112025120000.csv"
        );
        assert!(store.body(0).starts_with("City,Country,Description,"));

        let err = writer.write_at(&batch, at(12, 0, 1)).await.unwrap_err();
        assert_eq!(err, PipelineError::AlreadyWritten { destination: key.to_string() });
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_write_failed() {
        let store = Arc::new(MemoryObjectStore::failing("access denied"));
        let writer = BatchWriter::new(store, "bucket");

        let err = writer.write_at(&Batch::default(), at(1, 2, 3)).await.unwrap_err();
        match err {
            PipelineError::WriteFailed { destination, reason } => {
                assert!(destination.starts_with("s3://bucket/current_weather_data_multi_city_"));
                assert_eq!(reason, "access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
