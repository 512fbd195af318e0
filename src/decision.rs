use crate::error::PipelineError;
use crate::normalizer::QuantizationParams;
use crate::types::{ClassificationResult, Logits};

/// Suelo de la suma de exponenciales
pub const SOFTMAX_SUM_EPSILON: f32 = 1e-9;

/// Etiquetas de forma de ejercicio, en el orden del entrenamiento
pub const DEFAULT_LABELS: [&str; 6] = [
    "Lift Instability",
    "No Lift",
    "Off-Axis",
    "Perfect Form",
    "Partial Motion",
    "Swinging Weight",
];

/// Softmax numéricamente estable escrito en `out`.
///
/// Resta el máximo antes de exponenciar y acota la suma por abajo.
pub fn softmax_into(logits: &[f32], out: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (dst, &logit) in out.iter_mut().zip(logits) {
        *dst = (logit - max).exp();
        sum += *dst;
    }
    let sum = sum.max(SOFTMAX_SUM_EPSILON);
    for dst in out.iter_mut().take(logits.len()) {
        *dst /= sum;
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; logits.len()];
    softmax_into(logits, &mut out);
    out
}

/// Índice del máximo; en empate gana el primero
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut iter = values.iter().enumerate();
    let (mut best_idx, mut best) = iter.next().map(|(i, &v)| (i, v))?;
    for (i, &v) in iter {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    Some(best_idx)
}

/// Convierte logits crudos en un resultado etiquetado
pub struct DecisionLayer {
    labels: Vec<String>,
    output_quantization: QuantizationParams,
    logits: Vec<f32>,
}

impl DecisionLayer {
    pub fn new(labels: Vec<String>, output_quantization: QuantizationParams) -> Self {
        let logits = Vec::with_capacity(labels.len());
        Self {
            labels,
            output_quantization,
            logits,
        }
    }

    pub fn with_default_labels(output_quantization: QuantizationParams) -> Self {
        Self::new(
            DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            output_quantization,
        )
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Decuantiza si hace falta, aplica softmax y elige la etiqueta
    pub fn decode(&mut self, raw: &Logits) -> Result<ClassificationResult, PipelineError> {
        if raw.is_empty() || raw.len() != self.labels.len() {
            return Err(PipelineError::InferenceFailure(format!(
                "expected {} logits, got {}",
                self.labels.len(),
                raw.len()
            )));
        }

        self.logits.clear();
        match raw {
            Logits::F32(values) => self.logits.extend_from_slice(values),
            Logits::I8(values) => {
                let params = self.output_quantization;
                self.logits
                    .extend(values.iter().map(|&v| params.dequantize(v)));
            }
        }
        if self.logits.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InferenceFailure(
                "non-finite logit in classifier output".to_string(),
            ));
        }

        let probabilities = softmax(&self.logits);
        let label_index = argmax(&probabilities)
            .ok_or_else(|| PipelineError::InferenceFailure("empty output".to_string()))?;

        Ok(ClassificationResult {
            label_index,
            label_name: self.labels[label_index].clone(),
            confidence: probabilities[label_index],
            probabilities,
        })
    }
}
