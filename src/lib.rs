//! Clasificación de forma de ejercicio a partir de una IMU de 6 ejes.
//!
//! Muestras → buffer circular → promediado por ventanas → normalización y
//! cuantización → clasificador → softmax/argmax.

pub mod classifier;
pub mod config;
pub mod csv_loader;
pub mod decision;
pub mod error;
pub mod history_buffer;
pub mod normalizer;
pub mod pipeline;
pub mod resampler;
pub mod sample_source;
pub mod sinks;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{CycleOutcome, PipelineContext, Stage};
pub use types::{ClassificationResult, FeatureTensor, Sample};
