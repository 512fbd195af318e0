//! Ciclo de inferencia completo.
//!
//! `PipelineContext` agrupa todo el estado que antes vivía en globales
//! (buffer, clasificador, memoria de trabajo) y se construye una sola vez al
//! arrancar. Cada llamada a `run_cycle` recorre
//! `AcquireSamples → Resample → Normalize → InvokeClassifier → Decode` y
//! termina en `Success` o `Aborted`; nunca reintenta por su cuenta.

use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::decision::DecisionLayer;
use crate::error::PipelineError;
use crate::history_buffer::HistoryBuffer;
use crate::normalizer::{Normalizer, TensorStats};
use crate::resampler::{Frame, WindowResampler};
use crate::types::{ClassificationResult, ElementType, FeatureTensor, Sample, NUM_FEATURES};

/// Etapa del ciclo en la que se produjo un fallo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AcquireSamples,
    Resample,
    Normalize,
    InvokeClassifier,
    Decode,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Success(ClassificationResult),
    Aborted { stage: Stage, error: PipelineError },
}

impl CycleOutcome {
    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            CycleOutcome::Success(result) => Some(result),
            CycleOutcome::Aborted { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<ClassificationResult, PipelineError> {
        match self {
            CycleOutcome::Success(result) => Ok(result),
            CycleOutcome::Aborted { error, .. } => Err(error),
        }
    }
}

/// Memoria de trabajo reservada una vez y reutilizada en cada ciclo
struct Scratch {
    recent: Vec<Sample>,
    frames: Vec<Frame>,
    tensor: FeatureTensor,
}

impl Scratch {
    fn try_new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let mut recent = Vec::new();
        recent
            .try_reserve_exact(config.grab_len)
            .map_err(|_| PipelineError::AllocationFailure { what: "raw samples" })?;
        recent.resize(config.grab_len, Sample::default());

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(config.sequence_length)
            .map_err(|_| PipelineError::AllocationFailure {
                what: "resampled frames",
            })?;
        frames.resize(config.sequence_length, [0.0; NUM_FEATURES]);

        let tensor = FeatureTensor::try_zeroed(config.sequence_length, config.input.element_type)
            .map_err(|_| PipelineError::AllocationFailure {
                what: "input tensor",
            })?;

        Ok(Self {
            recent,
            frames,
            tensor,
        })
    }
}

pub struct PipelineContext<C: Classifier> {
    buffer: HistoryBuffer,
    resampler: WindowResampler,
    normalizer: Normalizer,
    decision: DecisionLayer,
    classifier: C,
    scratch: Scratch,
    grab_len: usize,
    output_type: ElementType,
    reference_override: Option<FeatureTensor>,
    cycles: u64,
}

impl<C: Classifier> PipelineContext<C> {
    /// Valida la configuración contra el clasificador y reserva toda la
    /// memoria de trabajo. Cualquier error aquí es fatal.
    pub fn new(config: &PipelineConfig, classifier: C) -> Result<Self, PipelineError> {
        config.validate()?;

        let expected_shape = [1, config.sequence_length, NUM_FEATURES];
        if classifier.input_shape() != expected_shape {
            return Err(PipelineError::config(format!(
                "classifier expects input {:?}, pipeline produces {:?}",
                classifier.input_shape(),
                expected_shape
            )));
        }
        if classifier.input_type() != config.input.element_type {
            return Err(PipelineError::config(format!(
                "classifier expects {:?} input, configuration says {:?}",
                classifier.input_type(),
                config.input.element_type
            )));
        }
        // los parámetros de decuantización sólo se validan para salida int8
        if classifier.output_type() != config.output.element_type {
            return Err(PipelineError::config(format!(
                "classifier produces {:?} logits, configuration says {:?}",
                classifier.output_type(),
                config.output.element_type
            )));
        }
        if classifier.label_count() != config.labels.len() {
            return Err(PipelineError::config(format!(
                "classifier has {} labels, configuration lists {}",
                classifier.label_count(),
                config.labels.len()
            )));
        }

        let resampler = WindowResampler::new(config.grab_len, config.sequence_length)?;
        let buffer = HistoryBuffer::try_with_capacity(config.buffer_capacity)?;
        let scratch = Scratch::try_new(config)?;

        debug!(
            capacity = config.buffer_capacity,
            grab_len = config.grab_len,
            sequence_length = config.sequence_length,
            window = resampler.window(),
            "Pipeline inicializado"
        );

        Ok(Self {
            buffer,
            resampler,
            normalizer: Normalizer::new(config.ranging, config.input.quantization),
            decision: DecisionLayer::new(config.labels.clone(), config.output.quantization),
            classifier,
            scratch,
            grab_len: config.grab_len,
            output_type: config.output.element_type,
            reference_override: None,
            cycles: 0,
        })
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.buffer.push(sample);
    }

    pub fn buffer(&self) -> &HistoryBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut HistoryBuffer {
        &mut self.buffer
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn labels(&self) -> &[String] {
        self.decision.labels()
    }

    /// Ciclos ejecutados (con o sin éxito)
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Sólo depuración: sustituye el tensor de entrada por uno fijo.
    ///
    /// Desactivado por defecto; mientras esté activo cada ciclo lo avisa.
    pub fn set_reference_override(
        &mut self,
        tensor: Option<FeatureTensor>,
    ) -> Result<(), PipelineError> {
        if let Some(tensor) = &tensor {
            if tensor.shape != self.scratch.tensor.shape
                || tensor.data.element_type() != self.scratch.tensor.data.element_type()
            {
                return Err(PipelineError::config(format!(
                    "reference tensor {:?}/{:?} does not match input {:?}/{:?}",
                    tensor.shape,
                    tensor.data.element_type(),
                    self.scratch.tensor.shape,
                    self.scratch.tensor.data.element_type()
                )));
            }
            warn!("Override de tensor de referencia ACTIVADO (sólo depuración)");
        }
        self.reference_override = tensor;
        Ok(())
    }

    pub fn reference_override_active(&self) -> bool {
        self.reference_override.is_some()
    }

    /// Extrae, remuestrea y normaliza las últimas `grab_len` muestras en el
    /// tensor de trabajo sin invocar al clasificador.
    pub fn prepare_tensor(&mut self) -> Result<&FeatureTensor, PipelineError> {
        self.prepare_stages().map_err(|(_, error)| error)?;
        Ok(&self.scratch.tensor)
    }

    fn prepare_stages(&mut self) -> Result<(), (Stage, PipelineError)> {
        let scratch = &mut self.scratch;
        self.buffer
            .extract_recent(self.grab_len, &mut scratch.recent)
            .map_err(|e| (Stage::AcquireSamples, e))?;
        self.resampler
            .resample(&scratch.recent, &mut scratch.frames)
            .map_err(|e| (Stage::Resample, e))?;
        self.normalizer
            .write_tensor(&scratch.frames, &mut scratch.tensor)
            .map_err(|e| (Stage::Normalize, e))?;
        Ok(())
    }

    fn run_stages(&mut self) -> Result<ClassificationResult, (Stage, PipelineError)> {
        if self.reference_override.is_none() {
            self.prepare_stages()?;
        }
        let input = match &self.reference_override {
            Some(reference) => {
                warn!(cycle = self.cycles, "Usando tensor de referencia en lugar de datos de la IMU");
                reference
            }
            None => &self.scratch.tensor,
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let stats = TensorStats::of(input);
            debug!(min = stats.min, max = stats.max, mean = stats.mean, "Estadísticas de entrada");
        }

        let logits = self
            .classifier
            .invoke(input)
            .map_err(|e| (Stage::InvokeClassifier, PipelineError::InferenceFailure(e.to_string())))?;
        debug!(?logits, "Logits crudos");
        if logits.element_type() != self.output_type {
            return Err((
                Stage::Decode,
                PipelineError::InferenceFailure(format!(
                    "classifier returned {:?} logits, expected {:?}",
                    logits.element_type(),
                    self.output_type
                )),
            ));
        }

        self.decision.decode(&logits).map_err(|e| (Stage::Decode, e))
    }

    /// Ejecuta un ciclo completo. Un fallo no toca el buffer, así que el
    /// siguiente ciclo parte del mismo estado.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        match self.run_stages() {
            Ok(result) => {
                debug!(
                    cycle = self.cycles,
                    label = %result.label_name,
                    confidence = result.confidence,
                    "Ciclo completado"
                );
                CycleOutcome::Success(result)
            }
            Err((stage, error)) => {
                warn!(cycle = self.cycles, ?stage, %error, "Ciclo abortado");
                CycleOutcome::Aborted { stage, error }
            }
        }
    }
}
