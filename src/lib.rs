//! catalog-i18n: resumable multi-language translation of an exported product catalog.
//! A driver polls `Pipeline::status()`; each call translates one bounded batch,
//! checkpoints it, and the finished catalog is published atomically at the end.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod translate;

pub use catalog::{Catalog, Localized, Product};
pub use checkpoint::{Checkpoint, JobStatus};
pub use config::Settings;
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineOptions, ProgressSnapshot, StartReport, StopOutcome};
pub use translate::{TranslateError, TranslateRequest, Translator};
