use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Constantes del sistema
pub const NUM_FEATURES: usize = 6; // ax, ay, az, gx, gy, gz
pub const BUFFER_LENGTH: usize = 1500; // 7.5 s a 5 ms por muestra
pub const GRAB_LEN: usize = 1000;
pub const OUTPUT_SEQUENCE_LENGTH: usize = 200;
pub const AVERAGING_WINDOW: usize = GRAB_LEN / OUTPUT_SEQUENCE_LENGTH;

/// Índices de features dentro de una muestra
pub const ACCEL_FEATURES: std::ops::Range<usize> = 0..3;
pub const GYRO_FEATURES: std::ops::Range<usize> = 3..6;

/// Una lectura de la IMU: aceleración (m/s²) y velocidad angular (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
}

impl Sample {
    pub fn new(ax: f32, ay: f32, az: f32, gx: f32, gy: f32, gz: f32) -> Self {
        Self { ax, ay, az, gx, gy, gz }
    }

    /// Muestra con el mismo valor en los seis canales
    pub fn splat(value: f32) -> Self {
        Self::from_array([value; NUM_FEATURES])
    }

    pub fn from_array(values: [f32; NUM_FEATURES]) -> Self {
        let [ax, ay, az, gx, gy, gz] = values;
        Self { ax, ay, az, gx, gy, gz }
    }

    /// Orden de features: [ax, ay, az, gx, gy, gz]
    pub fn to_array(&self) -> [f32; NUM_FEATURES] {
        [self.ax, self.ay, self.az, self.gx, self.gy, self.gz]
    }

    pub fn feature(&self, idx: usize) -> f32 {
        self.to_array()[idx]
    }
}

/// Tipo de elemento que espera el clasificador en sus tensores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Float32,
    Int8,
}

/// Datos del tensor de entrada, aplanados en orden [t][f]
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I8(Vec<i8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(data) => data.len(),
            TensorData::I8(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::Float32,
            TensorData::I8(_) => ElementType::Int8,
        }
    }

    /// Valor en la posición `idx` convertido a f32 (para inspección)
    pub fn value_at(&self, idx: usize) -> f32 {
        match self {
            TensorData::F32(data) => data[idx],
            TensorData::I8(data) => data[idx] as f32,
        }
    }
}

/// Tensor de entrada con forma (1, T, F)
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    pub shape: [usize; 3],
    pub data: TensorData,
}

impl FeatureTensor {
    /// Reserva un tensor de ceros; falla en vez de abortar si no hay memoria
    pub fn try_zeroed(
        sequence_length: usize,
        element_type: ElementType,
    ) -> Result<Self, std::collections::TryReserveError> {
        let len = sequence_length * NUM_FEATURES;
        let data = match element_type {
            ElementType::Float32 => {
                let mut data = Vec::new();
                data.try_reserve_exact(len)?;
                data.resize(len, 0.0);
                TensorData::F32(data)
            }
            ElementType::Int8 => {
                let mut data = Vec::new();
                data.try_reserve_exact(len)?;
                data.resize(len, 0);
                TensorData::I8(data)
            }
        };
        Ok(Self {
            shape: [1, sequence_length, NUM_FEATURES],
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.shape[1]
    }

    /// Valor en [t][f]
    pub fn get(&self, time_step: usize, feature: usize) -> f32 {
        self.data.value_at(time_step * NUM_FEATURES + feature)
    }
}

/// Salida cruda del clasificador (logits)
#[derive(Debug, Clone, PartialEq)]
pub enum Logits {
    F32(Vec<f32>),
    I8(Vec<i8>),
}

impl Logits {
    pub fn len(&self) -> usize {
        match self {
            Logits::F32(values) => values.len(),
            Logits::I8(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Logits::F32(_) => ElementType::Float32,
            Logits::I8(_) => ElementType::Int8,
        }
    }
}

/// Resultado de un ciclo de clasificación
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label_index: usize,
    pub label_name: String,
    pub confidence: f32,
    /// Distribución completa tras softmax (diagnóstico)
    pub probabilities: Vec<f32>,
}

/// Códigos de ejercicio de las capturas etiquetadas
pub const LIFT_CODES: [&str; 3] = [
    "dC", // curl con mancuerna
    "bP", // press de banca
    "dF", // aperturas con mancuerna
];

/// Códigos cortos de las etiquetas de forma, mismo orden que las del modelo
pub const LABEL_CODES: [&str; 6] = ["l_i", "n_l", "o_a", "p_f", "p_m", "s_w"];

/// Ejercicio y etiqueta de forma de una captura de entrenamiento
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTag {
    pub lift: String,
    pub label: String,
}

impl CaptureTag {
    pub fn new(lift: &str, label: &str) -> Result<Self, PipelineError> {
        if !LIFT_CODES.contains(&lift) {
            return Err(PipelineError::config(format!(
                "unknown lift {:?} (expected one of {:?})",
                lift, LIFT_CODES
            )));
        }
        if !LABEL_CODES.contains(&label) {
            return Err(PipelineError::config(format!(
                "unknown form label {:?} (expected one of {:?})",
                label, LABEL_CODES
            )));
        }
        Ok(Self {
            lift: lift.to_string(),
            label: label.to_string(),
        })
    }

    /// Índice de la etiqueta en la salida del modelo
    pub fn label_index(&self) -> Option<usize> {
        LABEL_CODES.iter().position(|code| *code == self.label)
    }
}
