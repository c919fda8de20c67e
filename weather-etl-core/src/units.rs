//! Pure unit and time conversions used by the record transformer.

use chrono::{DateTime, NaiveDateTime};

const KELVIN_OFFSET: f64 = 273.15;

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + KELVIN_OFFSET
}

/// Shift a UTC epoch by the city's UTC offset and return the resulting
/// wall-clock value without a zone.
///
/// Returns `None` when the shifted instant is outside chrono's range.
pub fn local_time_from_epoch(epoch_secs: i64, utc_offset_secs: i64) -> Option<NaiveDateTime> {
    let shifted = epoch_secs.checked_add(utc_offset_secs)?;
    DateTime::from_timestamp(shifted, 0).map(|dt| dt.naive_utc())
}
