use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::{ElementType, FeatureTensor, Logits};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid input shape: expected {expected:?}, got {actual:?}")]
    InvalidInputShape { expected: [usize; 3], actual: [usize; 3] },

    #[error("Invalid input type: expected {expected:?}, got {actual:?}")]
    InvalidInputType { expected: ElementType, actual: ElementType },

    #[error("Model declares {actual} labels, expected {expected}")]
    LabelCountMismatch { expected: usize, actual: usize },

    #[error("Unsupported tensor element type: {0}")]
    UnsupportedType(String),

    #[error("Missing ONNX {kind}")]
    MissingIo { kind: &'static str },

    #[error("Classifier invocation failed: {0}")]
    Invocation(String),
}

/// Contrato del motor de inferencia: tensor (1, T, F) de entrada, logits
/// (1, L) de salida. Una llamada bloqueante por ciclo.
pub trait Classifier {
    fn input_shape(&self) -> [usize; 3];

    fn input_type(&self) -> ElementType;

    /// Tipo de los logits que devuelve `invoke`
    fn output_type(&self) -> ElementType;

    fn label_count(&self) -> usize;

    fn invoke(&mut self, input: &FeatureTensor) -> Result<Logits, ClassifierError>;

    /// Comprueba que el tensor coincide con lo que declara el modelo
    fn check_input(&self, input: &FeatureTensor) -> Result<(), ClassifierError> {
        if input.shape != self.input_shape() {
            return Err(ClassifierError::InvalidInputShape {
                expected: self.input_shape(),
                actual: input.shape,
            });
        }
        if input.data.element_type() != self.input_type() {
            return Err(ClassifierError::InvalidInputType {
                expected: self.input_type(),
                actual: input.data.element_type(),
            });
        }
        Ok(())
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn input_shape(&self) -> [usize; 3] {
        (**self).input_shape()
    }

    fn input_type(&self) -> ElementType {
        (**self).input_type()
    }

    fn output_type(&self) -> ElementType {
        (**self).output_type()
    }

    fn label_count(&self) -> usize {
        (**self).label_count()
    }

    fn invoke(&mut self, input: &FeatureTensor) -> Result<Logits, ClassifierError> {
        (**self).invoke(input)
    }
}

#[derive(Debug, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Carga etiquetas desde un JSON `{"index_to_class": {"0": "...", ...}}`
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>, ClassifierError> {
    let content = fs::read_to_string(path)?;
    parse_labels(&content)
}

pub fn parse_labels(content: &str) -> Result<Vec<String>, ClassifierError> {
    let data: ClassesJson = serde_json::from_str(content)?;

    // Convertir HashMap a Vec ordenado por índice
    let mut pairs: Vec<(usize, String)> = data
        .index_to_class
        .into_iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
        .collect();

    pairs.sort_by_key(|(idx, _)| *idx);
    Ok(pairs.into_iter().map(|(_, name)| name).collect())
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{Classifier, ClassifierError};
    use crate::types::{ElementType, FeatureTensor, Logits, TensorData, NUM_FEATURES};
    use ort::session::Session;
    use ort::tensor::TensorElementType;
    use ort::value::{DynValue, ValueType};
    use std::path::Path;
    use tracing::info;

    /// Clasificador respaldado por ONNX Runtime
    pub struct OnnxClassifier {
        session: Session,
        input_name: String,
        output_name: String,
        input_shape: [usize; 3],
        input_type: ElementType,
        output_type: ElementType,
        label_count: usize,
    }

    fn element_type(ty: &TensorElementType) -> Result<ElementType, ClassifierError> {
        match ty {
            TensorElementType::Float32 => Ok(ElementType::Float32),
            TensorElementType::Int8 => Ok(ElementType::Int8),
            other => Err(ClassifierError::UnsupportedType(format!("{:?}", other))),
        }
    }

    /// Dimensión declarada; las dinámicas (-1) aceptan el valor esperado
    fn dim_matches(declared: Option<&i64>, expected: usize) -> bool {
        match declared {
            Some(&d) if d < 0 => true,
            Some(&d) => d as usize == expected,
            None => false,
        }
    }

    impl OnnxClassifier {
        /// Carga el modelo y verifica que su entrada sea (1, T, 6) y su
        /// salida tenga `label_count` clases.
        pub fn new(
            model_path: impl AsRef<Path>,
            sequence_length: usize,
            label_count: usize,
        ) -> Result<Self, ClassifierError> {
            let model_path = model_path.as_ref();
            let session = Session::builder()?.commit_from_file(model_path)?;

            let input = session
                .inputs
                .first()
                .ok_or(ClassifierError::MissingIo { kind: "input" })?;
            let output = session
                .outputs
                .first()
                .ok_or(ClassifierError::MissingIo { kind: "output" })?;

            let input_shape = [1, sequence_length, NUM_FEATURES];
            let input_type = match &input.input_type {
                ValueType::Tensor { ty, shape, .. } => {
                    let ok = shape.len() == 3
                        && dim_matches(shape.get(1), sequence_length)
                        && dim_matches(shape.get(2), NUM_FEATURES);
                    if !ok {
                        let actual = [
                            shape.first().copied().unwrap_or(0).max(0) as usize,
                            shape.get(1).copied().unwrap_or(0).max(0) as usize,
                            shape.get(2).copied().unwrap_or(0).max(0) as usize,
                        ];
                        return Err(ClassifierError::InvalidInputShape {
                            expected: input_shape,
                            actual,
                        });
                    }
                    element_type(ty)?
                }
                other => return Err(ClassifierError::UnsupportedType(format!("{:?}", other))),
            };

            let output_type = match &output.output_type {
                ValueType::Tensor { ty, shape, .. } => {
                    if !dim_matches(shape.last(), label_count) {
                        return Err(ClassifierError::LabelCountMismatch {
                            expected: label_count,
                            actual: shape.last().copied().unwrap_or(0).max(0) as usize,
                        });
                    }
                    element_type(ty)?
                }
                other => return Err(ClassifierError::UnsupportedType(format!("{:?}", other))),
            };

            let input_name = input.name.clone();
            let output_name = output.name.clone();

            info!(path = %model_path.display(), "Modelo ONNX cargado");
            info!(name = %input_name, ?input_shape, ?input_type, "Tensor de entrada");
            info!(name = %output_name, label_count, ?output_type, "Tensor de salida");

            Ok(Self {
                session,
                input_name,
                output_name,
                input_shape,
                input_type,
                output_type,
                label_count,
            })
        }
    }

    /// Copia los logits del tensor de salida antes de soltar la sesión
    fn extract_logits(
        value: &DynValue,
        output_type: ElementType,
        label_count: usize,
    ) -> Result<Logits, ClassifierError> {
        let logits = match output_type {
            ElementType::Float32 => {
                let (_, data) = value.try_extract_tensor::<f32>()?;
                Logits::F32(data.iter().take(label_count).copied().collect())
            }
            ElementType::Int8 => {
                let (_, data) = value.try_extract_tensor::<i8>()?;
                Logits::I8(data.iter().take(label_count).copied().collect())
            }
        };
        Ok(logits)
    }

    impl Classifier for OnnxClassifier {
        fn input_shape(&self) -> [usize; 3] {
            self.input_shape
        }

        fn input_type(&self) -> ElementType {
            self.input_type
        }

        fn output_type(&self) -> ElementType {
            self.output_type
        }

        fn label_count(&self) -> usize {
            self.label_count
        }

        fn invoke(&mut self, input: &FeatureTensor) -> Result<Logits, ClassifierError> {
            self.check_input(input)?;
            let shape_vec = input.shape.to_vec();
            let output_type = self.output_type;
            let label_count = self.label_count;

            match &input.data {
                TensorData::F32(data) => {
                    let input_value = ort::value::Value::from_array((shape_vec, data.clone()))?;
                    let outputs = self.session.run(ort::inputs![
                        self.input_name.as_str() => &input_value,
                    ])?;
                    extract_logits(&outputs[self.output_name.as_str()], output_type, label_count)
                }
                TensorData::I8(data) => {
                    let input_value = ort::value::Value::from_array((shape_vec, data.clone()))?;
                    let outputs = self.session.run(ort::inputs![
                        self.input_name.as_str() => &input_value,
                    ])?;
                    extract_logits(&outputs[self.output_name.as_str()], output_type, label_count)
                }
            }
        }
    }
}
