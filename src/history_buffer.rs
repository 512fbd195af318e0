use crate::error::PipelineError;
use crate::types::{Sample, BUFFER_LENGTH};

/// Buffer circular de capacidad fija con las últimas N muestras de la IMU.
///
/// Al llenarse sobrescribe la muestra más antigua; `push` nunca falla.
/// El índice lógico 0 es siempre la muestra más antigua presente.
#[derive(Debug)]
pub struct HistoryBuffer {
    buffer: Vec<Sample>,
    head: usize,  // próxima posición de escritura
    tail: usize,  // muestra más antigua
    count: usize,
}

impl HistoryBuffer {
    /// Crea un buffer con la capacidad por defecto (1500 muestras)
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_LENGTH)
    }

    /// Crea un buffer de capacidad `capacity`. Una capacidad 0 se trata
    /// como 1 para que `push` siga siendo O(1) sin casos especiales; el
    /// pipeline usa `try_with_capacity`, que la rechaza.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![Sample::default(); capacity.max(1)],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Como `with_capacity`, pero una capacidad 0 es error de configuración
    /// y la falta de memoria se devuelve en vez de abortar
    pub fn try_with_capacity(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::config("history buffer capacity must be > 0"));
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| PipelineError::AllocationFailure { what: "history buffer" })?;
        buffer.resize(capacity, Sample::default());
        Ok(Self {
            buffer,
            head: 0,
            tail: 0,
            count: 0,
        })
    }

    /// Añade una muestra; si el buffer está lleno desplaza la más antigua
    pub fn push(&mut self, sample: Sample) {
        let capacity = self.buffer.len();
        self.buffer[self.head] = sample;
        self.head = (self.head + 1) % capacity;

        if self.count < capacity {
            self.count += 1;
        } else {
            self.tail = (self.tail + 1) % capacity;
        }
    }

    /// Devuelve la i-ésima muestra más antigua
    pub fn get(&self, index: usize) -> Result<Sample, PipelineError> {
        if index >= self.count {
            return Err(PipelineError::OutOfRange {
                index,
                len: self.count,
            });
        }
        Ok(self.buffer[(self.tail + index) % self.buffer.len()])
    }

    /// Copia las `k` muestras más recientes, en orden cronológico, a `out[..k]`
    pub fn extract_recent(&self, k: usize, out: &mut [Sample]) -> Result<(), PipelineError> {
        let capacity = self.buffer.len();
        if k > self.count || k > capacity {
            return Err(PipelineError::InsufficientData {
                requested: k,
                available: self.count,
            });
        }
        if out.len() < k {
            return Err(PipelineError::OutputTooShort {
                needed: k,
                len: out.len(),
            });
        }

        let start = (self.head + capacity - k) % capacity;
        for (i, slot) in out.iter_mut().take(k).enumerate() {
            *slot = self.buffer[(start + i) % capacity];
        }
        Ok(())
    }

    /// Itera desde la muestra más antigua a la más reciente
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        let capacity = self.buffer.len();
        (0..self.count).map(move |i| &self.buffer[(self.tail + i) % capacity])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Vacía el buffer sin liberar memoria
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(i: usize) -> Sample {
        Sample::splat(i as f32)
    }

    #[test]
    fn test_buffer_empty_initially() {
        let buffer = HistoryBuffer::with_capacity(8);
        assert!(buffer.is_empty());
        assert!(matches!(
            buffer.get(0),
            Err(PipelineError::OutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_eviction_keeps_count_at_capacity() {
        let mut buffer = HistoryBuffer::with_capacity(10);
        for i in 0..37 {
            buffer.push(ramp(i));
            assert!(buffer.len() <= 10);
            // get(0) siempre es la más antigua retenida
            let oldest = i.saturating_sub(9);
            assert_eq!(buffer.get(0).unwrap(), ramp(oldest));
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.get(9).unwrap(), ramp(36));
        assert!(buffer.get(10).is_err());
    }

    #[test]
    fn test_extract_recent_chronological() {
        let mut buffer = HistoryBuffer::with_capacity(16);
        for i in 0..12 {
            buffer.push(ramp(i));
        }
        let mut out = [Sample::default(); 12];
        buffer.extract_recent(12, &mut out).unwrap();
        for (i, sample) in out.iter().enumerate() {
            assert_eq!(*sample, ramp(i));
        }
    }

    #[test]
    fn test_extract_recent_after_wraparound() {
        let mut buffer = HistoryBuffer::with_capacity(5);
        for i in 0..13 {
            buffer.push(ramp(i));
        }
        let mut out = [Sample::default(); 3];
        buffer.extract_recent(3, &mut out).unwrap();
        assert_eq!(out, [ramp(10), ramp(11), ramp(12)]);
    }

    #[test]
    fn test_extract_recent_insufficient_data() {
        let mut buffer = HistoryBuffer::with_capacity(5);
        buffer.push(ramp(0));
        let mut out = [Sample::default(); 8];
        assert!(matches!(
            buffer.extract_recent(2, &mut out),
            Err(PipelineError::InsufficientData {
                requested: 2,
                available: 1
            })
        ));
        for i in 0..10 {
            buffer.push(ramp(i));
        }
        // más que la capacidad
        assert!(matches!(
            buffer.extract_recent(6, &mut out),
            Err(PipelineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buffer = HistoryBuffer::with_capacity(4);
        for i in 0..6 {
            buffer.push(ramp(i));
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 4);
        buffer.push(ramp(42));
        assert_eq!(buffer.get(0).unwrap(), ramp(42));
    }

    #[test]
    fn test_iter_oldest_first() {
        let mut buffer = HistoryBuffer::with_capacity(3);
        for i in 0..5 {
            buffer.push(ramp(i));
        }
        let values: Vec<f32> = buffer.iter().map(|s| s.ax).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_capacity() {
        assert!(HistoryBuffer::try_with_capacity(0).unwrap_err().is_fatal());
        assert_eq!(HistoryBuffer::try_with_capacity(3).unwrap().capacity(), 3);
        // la variante infalible redondea a 1
        assert_eq!(HistoryBuffer::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_extract_recent_short_output() {
        let mut buffer = HistoryBuffer::with_capacity(8);
        for i in 0..8 {
            buffer.push(ramp(i));
        }
        let mut out = [Sample::default(); 2];
        assert!(matches!(
            buffer.extract_recent(4, &mut out),
            Err(PipelineError::OutputTooShort { needed: 4, len: 2 })
        ));
    }
}
