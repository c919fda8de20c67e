//! Core library for the `weather-etl` pipeline.
//!
//! This crate defines:
//! - Unit conversions and record normalization
//! - The observation source abstraction and its OpenWeather implementation
//! - Batch aggregation, CSV rendering and the single per-run write
//! - The run orchestrator, configuration and error types
//!
//! It is used by `weather-etl-cli`, but the runner can be driven by any scheduler.

pub mod batch;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod transform;
pub mod units;

pub use batch::{BatchWriter, FailurePolicy};
pub use config::Config;
pub use error::{PipelineError, RunError};
pub use model::{Batch, City, NormalizedRecord, RawObservation};
pub use pipeline::{PipelineRunner, RunReport, RunState};
pub use source::{ObservationSource, OpenWeatherSource, RetryPolicy};
pub use storage::{LocalObjectStore, ObjectKey, ObjectStore};
