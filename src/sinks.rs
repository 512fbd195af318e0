//! Destinos de resultados y de muestras crudas.

use std::io::Write;
use std::path::Path;

use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::info;

use crate::types::{CaptureTag, ClassificationResult, Sample};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result receiver disconnected")]
    Disconnected,

    #[error("indicator output failed: {0}")]
    Indicator(String),
}

/// Recibe los resultados que superan el umbral de confianza
pub trait ResultSink {
    fn publish(&mut self, result: &ClassificationResult) -> Result<(), SinkError>;
}

/// Publica cada resultado en el log
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn publish(&mut self, result: &ClassificationResult) -> Result<(), SinkError> {
        info!(
            label = %result.label_name,
            index = result.label_index,
            confidence = result.confidence,
            "Repetición clasificada"
        );
        Ok(())
    }
}

/// Reenvía resultados a otro hilo
pub struct ChannelSink {
    tx: Sender<ClassificationResult>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ClassificationResult>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn publish(&mut self, result: &ClassificationResult) -> Result<(), SinkError> {
        self.tx
            .send(result.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Una línea JSON por resultado
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn publish(&mut self, result: &ClassificationResult) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Salida física de indicadores: un canal (LED) por etiqueta
pub trait IndicatorOutput {
    fn set(&mut self, channel: usize, on: bool) -> Result<(), SinkError>;
}

/// Enciende sólo el indicador de la etiqueta ganadora
pub struct IndicatorSink<O: IndicatorOutput> {
    output: O,
    channels: usize,
    lit: Option<usize>,
}

impl<O: IndicatorOutput> IndicatorSink<O> {
    pub fn new(output: O, channels: usize) -> Self {
        Self {
            output,
            channels,
            lit: None,
        }
    }

    pub fn lit(&self) -> Option<usize> {
        self.lit
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Apaga todos los canales
    pub fn clear(&mut self) -> Result<(), SinkError> {
        for channel in 0..self.channels {
            self.output.set(channel, false)?;
        }
        self.lit = None;
        Ok(())
    }
}

impl<O: IndicatorOutput> ResultSink for IndicatorSink<O> {
    fn publish(&mut self, result: &ClassificationResult) -> Result<(), SinkError> {
        if result.label_index >= self.channels {
            return Err(SinkError::Indicator(format!(
                "label {} has no indicator ({} channels)",
                result.label_index, self.channels
            )));
        }
        for channel in 0..self.channels {
            self.output.set(channel, channel == result.label_index)?;
        }
        self.lit = Some(result.label_index);
        Ok(())
    }
}

/// Destino de las muestras crudas adquiridas (grabación)
pub trait SampleSink {
    fn record(&mut self, sample: &Sample) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Graba muestras en CSV `t,ax,ay,az,gx,gy,gz`, legible por `csv_loader`
pub struct CsvSampleRecorder<W: Write> {
    writer: csv::Writer<W>,
    index: u64,
}

impl CsvSampleRecorder<std::fs::File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = std::fs::File::create(path)?;
        Self::new(file)
    }
}

impl<W: Write> CsvSampleRecorder<W> {
    pub fn new(writer: W) -> Result<Self, SinkError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["t", "ax", "ay", "az", "gx", "gy", "gz"])?;
        Ok(Self { writer, index: 0 })
    }

    pub fn recorded(&self) -> u64 {
        self.index
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> SampleSink for CsvSampleRecorder<W> {
    fn record(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let mut row = Vec::with_capacity(7);
        row.push(self.index.to_string());
        row.extend(sample.to_array().iter().map(|v| v.to_string()));
        self.writer.write_record(&row)?;
        self.index += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Captura etiquetada para entrenamiento:
/// `t_ms,lift,label,ax,ay,az,gx,gy,gz`, con `t_ms` relativo al inicio
pub struct LabeledCaptureRecorder<W: Write> {
    writer: csv::Writer<W>,
    tag: CaptureTag,
    interval_ms: u64,
    index: u64,
}

impl LabeledCaptureRecorder<std::fs::File> {
    pub fn create(
        path: impl AsRef<Path>,
        tag: CaptureTag,
        interval_ms: u64,
    ) -> Result<Self, SinkError> {
        let file = std::fs::File::create(path)?;
        Self::new(file, tag, interval_ms)
    }
}

impl<W: Write> LabeledCaptureRecorder<W> {
    pub fn new(writer: W, tag: CaptureTag, interval_ms: u64) -> Result<Self, SinkError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["t_ms", "lift", "label", "ax", "ay", "az", "gx", "gy", "gz"])?;
        info!(lift = %tag.lift, label = %tag.label, "Captura iniciada");
        Ok(Self {
            writer,
            tag,
            interval_ms,
            index: 0,
        })
    }

    pub fn tag(&self) -> &CaptureTag {
        &self.tag
    }

    pub fn recorded(&self) -> u64 {
        self.index
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> SampleSink for LabeledCaptureRecorder<W> {
    fn record(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let mut row = Vec::with_capacity(9);
        row.push((self.index * self.interval_ms).to_string());
        row.push(self.tag.lift.clone());
        row.push(self.tag.label.clone());
        row.extend(sample.to_array().iter().map(|v| v.to_string()));
        self.writer.write_record(&row)?;
        self.index += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_loader::{load_labeled_capture_from_reader, load_samples_from_reader};
    use crossbeam_channel::unbounded;

    fn result(index: usize) -> ClassificationResult {
        ClassificationResult {
            label_index: index,
            label_name: format!("label-{}", index),
            confidence: 0.9,
            probabilities: vec![0.02, 0.03, 0.9, 0.05],
        }
    }

    #[derive(Default)]
    struct FakePins {
        state: Vec<bool>,
        writes: usize,
    }

    impl IndicatorOutput for FakePins {
        fn set(&mut self, channel: usize, on: bool) -> Result<(), SinkError> {
            if self.state.len() <= channel {
                self.state.resize(channel + 1, false);
            }
            self.state[channel] = on;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_indicator_lights_single_channel() {
        let mut sink = IndicatorSink::new(FakePins::default(), 6);
        sink.publish(&result(3)).unwrap();
        assert_eq!(sink.lit(), Some(3));
        assert_eq!(sink.output().state, vec![false, false, false, true, false, false]);

        sink.publish(&result(0)).unwrap();
        assert_eq!(sink.output().state.iter().filter(|on| **on).count(), 1);
        assert!(sink.output().state[0]);

        sink.clear().unwrap();
        assert_eq!(sink.lit(), None);
        assert!(sink.output().state.iter().all(|on| !on));
    }

    #[test]
    fn test_indicator_rejects_unknown_label() {
        let mut sink = IndicatorSink::new(FakePins::default(), 2);
        assert!(matches!(
            sink.publish(&result(5)),
            Err(SinkError::Indicator(_))
        ));
        assert_eq!(sink.output().writes, 0);
    }

    #[test]
    fn test_channel_sink_forwards_and_detects_disconnect() {
        let (tx, rx) = unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.publish(&result(2)).unwrap();
        assert_eq!(rx.recv().unwrap().label_index, 2);
        drop(rx);
        assert!(matches!(
            sink.publish(&result(2)),
            Err(SinkError::Disconnected)
        ));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&result(1)).unwrap();
        sink.publish(&result(2)).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["label_index"], 2);
        assert_eq!(parsed["label_name"], "label-2");
    }

    #[test]
    fn test_csv_recorder_readable_by_loader() {
        let mut recorder = CsvSampleRecorder::new(Vec::new()).unwrap();
        recorder
            .record(&Sample::new(1.0, -2.5, 9.81, 0.0, 0.125, -3.0))
            .unwrap();
        recorder.record(&Sample::splat(4.0)).unwrap();
        recorder.flush().unwrap();
        assert_eq!(recorder.recorded(), 2);

        let bytes = recorder.into_inner().unwrap();
        let samples = load_samples_from_reader(bytes.as_slice()).unwrap();
        assert_eq!(samples[0], Sample::new(1.0, -2.5, 9.81, 0.0, 0.125, -3.0));
        assert_eq!(samples[1], Sample::splat(4.0));
    }

    #[test]
    fn test_labeled_capture_readable_by_loader() {
        let tag = CaptureTag::new("dC", "s_w").unwrap();
        let mut recorder = LabeledCaptureRecorder::new(Vec::new(), tag.clone(), 5).unwrap();
        for i in 0..4 {
            recorder.record(&Sample::splat(i as f32 * 0.5)).unwrap();
        }
        recorder.flush().unwrap();
        assert_eq!(recorder.recorded(), 4);

        let bytes = recorder.into_inner().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.lines().nth(4).unwrap().starts_with("15,dC,s_w,"));

        let capture = load_labeled_capture_from_reader(bytes.as_slice()).unwrap();
        assert_eq!(capture.tag, tag);
        assert_eq!(capture.samples.len(), 4);
        assert_eq!(capture.samples[3], Sample::splat(1.5));

        // el formato etiquetado también sirve como flujo de muestras
        let samples = load_samples_from_reader(bytes.as_slice()).unwrap();
        assert_eq!(samples, capture.samples);
    }
}
