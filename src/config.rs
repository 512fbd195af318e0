use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::decision::DEFAULT_LABELS;
use crate::error::PipelineError;
use crate::normalizer::{QuantizationParams, RangingPolicy};
use crate::types::{ElementType, BUFFER_LENGTH, GRAB_LEN, OUTPUT_SEQUENCE_LENGTH};

pub const DEFAULT_CAPTURE_MS: u64 = 3000;

/// Tipo de elemento y parámetros de cuantización de un tensor del modelo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub element_type: ElementType,
    #[serde(default)]
    pub quantization: QuantizationParams,
}

/// Configuración completa del pipeline.
///
/// Es la única fuente de verdad para las constantes de cuantización.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacidad del buffer circular (muestras)
    pub buffer_capacity: usize,
    /// Muestras crudas que consume cada ciclo
    pub grab_len: usize,
    /// Longitud de secuencia T que espera el modelo
    pub sequence_length: usize,
    pub ranging: RangingPolicy,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub labels: Vec<String>,
    /// Intervalo entre lecturas de la IMU
    pub sample_interval_ms: u64,
    /// Muestras adquiridas entre ciclos de inferencia
    pub samples_per_cycle: usize,
    /// Muestras para cebar el buffer antes del primer ciclo
    pub prime_samples: usize,
    /// Confianza mínima para publicar un resultado
    pub confidence_threshold: f32,
    /// Duración de cada captura etiquetada (modo recolección)
    pub capture_duration_ms: u64,
    pub model_path: PathBuf,
    pub classes_path: Option<PathBuf>,
    /// Sólo depuración: fuerza el tensor de entrada desde este CSV
    pub debug_reference_csv: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: BUFFER_LENGTH,
            grab_len: GRAB_LEN,
            sequence_length: OUTPUT_SEQUENCE_LENGTH,
            ranging: RangingPolicy::default(),
            input: TensorSpec {
                element_type: ElementType::Int8,
                quantization: QuantizationParams::default(),
            },
            output: TensorSpec {
                element_type: ElementType::Float32,
                quantization: QuantizationParams::default(),
            },
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            sample_interval_ms: 5,
            samples_per_cycle: 200,
            prime_samples: GRAB_LEN,
            confidence_threshold: 0.70,
            capture_duration_ms: DEFAULT_CAPTURE_MS,
            model_path: PathBuf::from("rep_mate.onnx"),
            classes_path: None,
            debug_reference_csv: None,
        }
    }
}

impl PipelineConfig {
    /// Carga la configuración desde JSON; los campos ausentes toman el
    /// valor por defecto.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        info!(path = %path.display(), "Configuración cargada");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| PipelineError::config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn averaging_window(&self) -> usize {
        if self.sequence_length == 0 {
            0
        } else {
            self.grab_len / self.sequence_length
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Muestras de una captura a la cadencia configurada (mínimo 1)
    pub fn capture_samples(&self) -> usize {
        let samples = match self.sample_interval_ms {
            0 => self.capture_duration_ms,
            interval => self.capture_duration_ms / interval,
        };
        samples.max(1) as usize
    }

    /// Errores aquí son fatales: no se debe empezar a muestrear
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sequence_length == 0 || self.grab_len == 0 {
            return Err(PipelineError::config(
                "grab_len and sequence_length must be > 0",
            ));
        }
        if self.grab_len % self.sequence_length != 0 {
            return Err(PipelineError::config(format!(
                "sequence length {} does not evenly divide grab length {}",
                self.sequence_length, self.grab_len
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(PipelineError::config("buffer_capacity must be > 0"));
        }
        if self.grab_len > self.buffer_capacity {
            return Err(PipelineError::config(format!(
                "grab length {} exceeds buffer capacity {}",
                self.grab_len, self.buffer_capacity
            )));
        }
        if self.labels.is_empty() {
            return Err(PipelineError::config("at least one label is required"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::config(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if let RangingPolicy::Fixed { accel, gyro } = self.ranging {
            if accel.max <= accel.min || gyro.max <= gyro.min {
                return Err(PipelineError::config(
                    "fixed calibration ranges need max > min",
                ));
            }
        }
        if self.input.element_type == ElementType::Int8 {
            self.input.quantization.validate()?;
        }
        if self.output.element_type == ElementType::Int8 {
            self.output.quantization.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{FeatureRange, Grouping};

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.averaging_window(), 5);
        assert_eq!(config.labels.len(), 6);
        // 3 s a 5 ms por muestra
        assert_eq!(config.capture_samples(), 600);
    }

    #[test]
    fn test_zero_buffer_capacity_rejected() {
        let config = PipelineConfig {
            buffer_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json(
            r#"{
                "grab_len": 600,
                "sequence_length": 100,
                "ranging": {"policy": "batch_local", "grouping": "per_group"},
                "input": {"element_type": "float32"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.grab_len, 600);
        assert_eq!(config.averaging_window(), 6);
        assert_eq!(config.buffer_capacity, BUFFER_LENGTH);
        assert_eq!(
            config.ranging,
            RangingPolicy::BatchLocal {
                grouping: Grouping::PerGroup
            }
        );
        assert_eq!(config.input.element_type, ElementType::Float32);
        assert_eq!(config.input.quantization, QuantizationParams::default());
    }

    #[test]
    fn test_fixed_ranging_from_json() {
        let config = PipelineConfig::from_json(
            r#"{"ranging": {"policy": "fixed",
                "accel": {"min": -78.5, "max": 78.5},
                "gyro": {"min": -8.7, "max": 8.7}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.ranging,
            RangingPolicy::Fixed {
                accel: FeatureRange::new(-78.5, 78.5),
                gyro: FeatureRange::new(-8.7, 8.7),
            }
        );
    }

    #[test]
    fn test_uneven_division_is_fatal() {
        let err = PipelineConfig::from_json(r#"{"grab_len": 1000, "sequence_length": 300}"#)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_grab_longer_than_buffer_rejected() {
        let config = PipelineConfig {
            buffer_capacity: 500,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_quantization_rejected() {
        let mut config = PipelineConfig::default();
        config.input.quantization.scale = -1.0;
        assert!(config.validate().is_err());
        // con entrada float la cuantización no se usa
        config.input.element_type = ElementType::Float32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_degenerate_fixed_range_rejected() {
        let config = PipelineConfig {
            ranging: RangingPolicy::Fixed {
                accel: FeatureRange::new(1.0, 1.0),
                gyro: FeatureRange::new(-1.0, 1.0),
            },
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
