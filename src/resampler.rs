use crate::error::PipelineError;
use crate::types::{Sample, NUM_FEATURES};

/// Un frame remuestreado: media de cada feature dentro de una ventana
pub type Frame = [f32; NUM_FEATURES];

/// Decimación por promedio en bloques sin solapamiento.
///
/// Reduce `grab_len` muestras crudas a `sequence_length` frames, cada uno la
/// media aritmética de `window` muestras consecutivas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowResampler {
    sequence_length: usize,
    window: usize,
}

impl WindowResampler {
    pub fn new(grab_len: usize, sequence_length: usize) -> Result<Self, PipelineError> {
        if sequence_length == 0 {
            return Err(PipelineError::config("sequence length must be > 0"));
        }
        let window = grab_len / sequence_length;
        if window == 0 {
            return Err(PipelineError::config(format!(
                "grab length {} is shorter than sequence length {}",
                grab_len, sequence_length
            )));
        }
        Ok(Self {
            sequence_length,
            window,
        })
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Muestras que consume una pasada completa
    pub fn required_samples(&self) -> usize {
        self.window * self.sequence_length
    }

    /// Promedia `samples` en `out[..sequence_length]`.
    ///
    /// Las muestras sobrantes al final (si `samples.len()` no es múltiplo de la
    /// ventana) se ignoran. Si no alcanzan para todas las ventanas no se
    /// escribe nada.
    pub fn resample(&self, samples: &[Sample], out: &mut [Frame]) -> Result<(), PipelineError> {
        let required = self.required_samples();
        if required > samples.len() {
            return Err(PipelineError::config(format!(
                "window {} x sequence {} needs {} samples, got {}",
                self.window,
                self.sequence_length,
                required,
                samples.len()
            )));
        }
        if out.len() < self.sequence_length {
            return Err(PipelineError::OutputTooShort {
                needed: self.sequence_length,
                len: out.len(),
            });
        }

        let window = self.window as f32;
        for (frame, block) in out
            .iter_mut()
            .zip(samples[..required].chunks_exact(self.window))
        {
            let mut sums = [0.0f32; NUM_FEATURES];
            for sample in block {
                for (sum, value) in sums.iter_mut().zip(sample.to_array()) {
                    *sum += value;
                }
            }
            for (dst, sum) in frame.iter_mut().zip(sums) {
                *dst = sum / window;
            }
        }
        Ok(())
    }
}
