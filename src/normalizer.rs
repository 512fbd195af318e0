use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::resampler::Frame;
use crate::types::{FeatureTensor, TensorData, ACCEL_FEATURES, GYRO_FEATURES, NUM_FEATURES};

/// Suelo del rango para no dividir por cero cuando max == min
pub const RANGE_EPSILON: f32 = 1e-6;

pub const QUANT_MIN: i32 = i8::MIN as i32;
pub const QUANT_MAX: i32 = i8::MAX as i32;

/// Dominio de normalización de una feature (o grupo de features)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f32,
    pub max: f32,
}

impl FeatureRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    pub fn is_degenerate(&self) -> bool {
        self.span() < RANGE_EPSILON
    }

    /// `clamp((v - min) / max(span, ε), 0, 1)`
    pub fn normalize(&self, value: f32) -> f32 {
        ((value - self.min) / self.span().max(RANGE_EPSILON)).clamp(0.0, 1.0)
    }

    fn include(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn empty() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }
}

/// Cómo se agrupan las features al calcular rangos locales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// Un rango por cada eje
    PerFeature,
    /// Acelerómetro y giroscopio comparten rango dentro de su grupo
    PerGroup,
}

/// Política de rango seleccionada en la configuración
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RangingPolicy {
    /// min/max de la secuencia remuestreada del ciclo actual
    BatchLocal { grouping: Grouping },
    /// Constantes de calibración obtenidas offline
    Fixed { accel: FeatureRange, gyro: FeatureRange },
}

impl Default for RangingPolicy {
    fn default() -> Self {
        RangingPolicy::BatchLocal {
            grouping: Grouping::PerFeature,
        }
    }
}

/// Parámetros de cuantización afín del modelo entrenado.
///
/// Vienen del modelo, no se calculan aquí. Si no coinciden con los del
/// modelo la precisión se degrada en silencio, sin ningún error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl Default for QuantizationParams {
    /// Mapea [0, 1] a [-128, 127]
    fn default() -> Self {
        Self {
            scale: 1.0 / 255.0,
            zero_point: QUANT_MIN,
        }
    }
}

impl QuantizationParams {
    /// `clamp(round(v / scale + zero_point), -128, 127)`
    pub fn quantize(&self, value: f32) -> i8 {
        let q = (value / self.scale + self.zero_point as f32).round();
        // NaN cae en QUANT_MIN en vez de propagarse
        if q.is_nan() {
            return QUANT_MIN as i8;
        }
        q.clamp(QUANT_MIN as f32, QUANT_MAX as f32) as i8
    }

    /// `(raw - zero_point) * scale`
    pub fn dequantize(&self, raw: i8) -> f32 {
        (raw as i32 - self.zero_point) as f32 * self.scale
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PipelineError::config(format!(
                "quantization scale must be positive, got {}",
                self.scale
            )));
        }
        if !(QUANT_MIN..=QUANT_MAX).contains(&self.zero_point) {
            return Err(PipelineError::config(format!(
                "zero point {} outside int8 range",
                self.zero_point
            )));
        }
        Ok(())
    }
}

/// Estadísticas del tensor de entrada para diagnóstico
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl TensorStats {
    pub fn of(tensor: &FeatureTensor) -> Self {
        let len = tensor.len();
        if len == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
            };
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for idx in 0..len {
            let v = tensor.data.value_at(idx);
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        Self {
            min,
            max,
            mean: (sum / len as f64) as f32,
        }
    }
}

/// Normaliza y (opcionalmente) cuantiza frames remuestreados al tensor
/// de entrada del clasificador.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    policy: RangingPolicy,
    quantization: QuantizationParams,
}

impl Normalizer {
    pub fn new(policy: RangingPolicy, quantization: QuantizationParams) -> Self {
        Self {
            policy,
            quantization,
        }
    }

    pub fn policy(&self) -> RangingPolicy {
        self.policy
    }

    /// Rango efectivo de cada feature según la política
    pub fn compute_ranges(&self, frames: &[Frame]) -> [FeatureRange; NUM_FEATURES] {
        match self.policy {
            RangingPolicy::Fixed { accel, gyro } => {
                let mut ranges = [accel; NUM_FEATURES];
                for range in &mut ranges[GYRO_FEATURES] {
                    *range = gyro;
                }
                ranges
            }
            RangingPolicy::BatchLocal { grouping } => {
                if frames.is_empty() {
                    return [FeatureRange::new(0.0, 0.0); NUM_FEATURES];
                }
                let mut ranges = [FeatureRange::empty(); NUM_FEATURES];
                for frame in frames {
                    for (range, &value) in ranges.iter_mut().zip(frame) {
                        range.include(value);
                    }
                }
                if grouping == Grouping::PerGroup {
                    merge_group(&mut ranges, ACCEL_FEATURES);
                    merge_group(&mut ranges, GYRO_FEATURES);
                }
                ranges
            }
        }
    }

    /// Escribe los frames en `tensor` con layout [t][f].
    ///
    /// El tipo de elemento del tensor decide si se cuantiza.
    pub fn write_tensor(
        &self,
        frames: &[Frame],
        tensor: &mut FeatureTensor,
    ) -> Result<(), PipelineError> {
        let sequence_length = tensor.sequence_length();
        if frames.len() < sequence_length {
            return Err(PipelineError::InsufficientData {
                requested: sequence_length,
                available: frames.len(),
            });
        }
        let frames = &frames[..sequence_length];
        let ranges = self.compute_ranges(frames);

        for (feature, range) in ranges.iter().enumerate() {
            if range.is_degenerate() {
                debug!(feature, min = range.min, max = range.max, "Rango degenerado, usando epsilon");
            }
        }

        match &mut tensor.data {
            TensorData::F32(data) => {
                for (row, frame) in data.chunks_exact_mut(NUM_FEATURES).zip(frames) {
                    for ((dst, &value), range) in row.iter_mut().zip(frame).zip(&ranges) {
                        *dst = range.normalize(value);
                    }
                }
            }
            TensorData::I8(data) => {
                for (row, frame) in data.chunks_exact_mut(NUM_FEATURES).zip(frames) {
                    for ((dst, &value), range) in row.iter_mut().zip(frame).zip(&ranges) {
                        *dst = self.quantization.quantize(range.normalize(value));
                    }
                }
            }
        }
        Ok(())
    }
}

fn merge_group(ranges: &mut [FeatureRange; NUM_FEATURES], group: std::ops::Range<usize>) {
    let mut merged = FeatureRange::empty();
    for range in &ranges[group.clone()] {
        merged.include(range.min);
        merged.include(range.max);
    }
    for range in &mut ranges[group] {
        *range = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementType;

    fn ramp_frames(len: usize) -> Vec<Frame> {
        (0..len)
            .map(|t| {
                let t = t as f32;
                [t, 2.0 * t, -t, 10.0 + t, 0.5 * t, 3.0]
            })
            .collect()
    }

    #[test]
    fn test_batch_local_boundaries_exact() {
        let normalizer = Normalizer::new(RangingPolicy::default(), QuantizationParams::default());
        let frames = ramp_frames(20);
        let mut tensor = FeatureTensor::try_zeroed(20, ElementType::Float32).unwrap();
        normalizer.write_tensor(&frames, &mut tensor).unwrap();

        for feature in 0..5 {
            let values: Vec<f32> = (0..20).map(|t| tensor.get(t, feature)).collect();
            let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(min, 0.0, "feature {}", feature);
            assert_eq!(max, 1.0, "feature {}", feature);
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        // feature 0 crece con t: extremos en t=0 y t=19
        assert_eq!(tensor.get(0, 0), 0.0);
        assert_eq!(tensor.get(19, 0), 1.0);
        assert!(tensor.get(10, 0) > 0.0 && tensor.get(10, 0) < 1.0);
        // feature 2 decrece
        assert_eq!(tensor.get(0, 2), 1.0);
    }

    #[test]
    fn test_degenerate_range_maps_to_zero() {
        let normalizer = Normalizer::new(RangingPolicy::default(), QuantizationParams::default());
        let frames = ramp_frames(8);
        let mut tensor = FeatureTensor::try_zeroed(8, ElementType::Float32).unwrap();
        normalizer.write_tensor(&frames, &mut tensor).unwrap();
        // feature 5 es constante
        for t in 0..8 {
            assert_eq!(tensor.get(t, 5), 0.0);
        }
    }

    #[test]
    fn test_per_group_ranges_shared() {
        let normalizer = Normalizer::new(
            RangingPolicy::BatchLocal {
                grouping: Grouping::PerGroup,
            },
            QuantizationParams::default(),
        );
        let ranges = normalizer.compute_ranges(&ramp_frames(11));
        // acelerómetro: t in [0,10], 2t in [0,20], -t in [-10,0]
        for range in &ranges[0..3] {
            assert_eq!(*range, FeatureRange::new(-10.0, 20.0));
        }
        // giroscopio: 10+t in [10,20], t/2 in [0,5], 3
        for range in &ranges[3..6] {
            assert_eq!(*range, FeatureRange::new(0.0, 20.0));
        }
    }

    #[test]
    fn test_fixed_policy_ignores_batch() {
        let accel = FeatureRange::new(-20.0, 20.0);
        let gyro = FeatureRange::new(-5.0, 5.0);
        let normalizer = Normalizer::new(
            RangingPolicy::Fixed { accel, gyro },
            QuantizationParams::default(),
        );
        let frames = vec![[0.0, 40.0, -40.0, 0.0, 2.5, -10.0]];
        let mut tensor = FeatureTensor::try_zeroed(1, ElementType::Float32).unwrap();
        normalizer.write_tensor(&frames, &mut tensor).unwrap();
        assert_eq!(tensor.get(0, 0), 0.5);
        assert_eq!(tensor.get(0, 1), 1.0);
        assert_eq!(tensor.get(0, 2), 0.0);
        assert_eq!(tensor.get(0, 3), 0.5);
        assert_eq!(tensor.get(0, 4), 0.75);
        assert_eq!(tensor.get(0, 5), 0.0);
    }

    #[test]
    fn test_quantize_clamps_to_int8() {
        let params = QuantizationParams::default();
        assert_eq!(params.quantize(1.0), 127);
        assert_eq!(params.quantize(0.0), -128);
        assert_eq!(params.quantize(5.0), 127);
        assert_eq!(params.quantize(-3.0), -128);
        assert_eq!(params.quantize(f32::NAN), -128);

        // escala pequeña: mucho fuera de rango, nunca da la vuelta
        let tight = QuantizationParams {
            scale: 0.001,
            zero_point: 0,
        };
        assert_eq!(tight.quantize(1.0), 127);
        assert_eq!(tight.quantize(-1.0), -128);
    }

    #[test]
    fn test_quantized_tensor_in_int8_range() {
        let normalizer = Normalizer::new(RangingPolicy::default(), QuantizationParams::default());
        let frames = ramp_frames(50);
        let mut tensor = FeatureTensor::try_zeroed(50, ElementType::Int8).unwrap();
        normalizer.write_tensor(&frames, &mut tensor).unwrap();
        let TensorData::I8(data) = &tensor.data else {
            panic!("expected int8 tensor");
        };
        assert_eq!(data[0], -128);
        assert_eq!(data[49 * NUM_FEATURES], 127);
    }

    #[test]
    fn test_dequantize() {
        let params = QuantizationParams {
            scale: 0.5,
            zero_point: -10,
        };
        assert_eq!(params.dequantize(-10), 0.0);
        assert_eq!(params.dequantize(0), 5.0);
        assert_eq!(params.dequantize(-128), -59.0);
    }

    #[test]
    fn test_validate_params() {
        assert!(QuantizationParams::default().validate().is_ok());
        assert!(QuantizationParams { scale: 0.0, zero_point: 0 }.validate().is_err());
        assert!(QuantizationParams { scale: 1.0, zero_point: 300 }.validate().is_err());
    }

    #[test]
    fn test_tensor_stats() {
        let mut tensor = FeatureTensor::try_zeroed(2, ElementType::Float32).unwrap();
        if let TensorData::F32(data) = &mut tensor.data {
            data.copy_from_slice(&[0.0, 1.0, 0.5, 0.5, 0.25, 0.75, 0.0, 1.0, 0.5, 0.5, 0.25, 0.75]);
        }
        let stats = TensorStats::of(&tensor);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 1.0);
        assert_eq!(stats.mean, 0.5);
    }
}
