use thiserror::Error;

/// Errores del pipeline de preparación de tensores e inferencia.
///
/// Todos salvo `Configuration` abortan sólo el ciclo actual; el bucle de
/// control reintenta en el siguiente tick.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Index {index} out of range (buffer holds {len} samples)")]
    OutOfRange { index: usize, len: usize },

    #[error("Insufficient data: requested {requested}, available {available}")]
    InsufficientData { requested: usize, available: usize },

    #[error("Could not allocate scratch memory for {what}")]
    AllocationFailure { what: &'static str },

    #[error("Output slice too short: needs {needed}, got {len}")]
    OutputTooShort { needed: usize, len: usize },

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Los errores de configuración no se recuperan reintentando
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}
