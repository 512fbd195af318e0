/*
RepMate - clasificación de forma de ejercicio en tiempo real - Rust + ONNX

Bucle de control:
1. Un hilo productor lee la IMU (simulada o un CSV grabado) a ritmo fijo
2. Las muestras llenan el buffer circular
3. Cada `samples_per_cycle` muestras se ejecuta un ciclo de inferencia
4. Los resultados con confianza suficiente se publican (log + indicadores)

Requiere onnxruntime disponible para `ort`.

Modo recolección (`--collect <lift> <label>`): graba una captura etiquetada de
`capture_duration_ms` para entrenamiento, sin clasificar. Ejercicios: dC, bP,
dF. Etiquetas: l_i, n_l, o_a, p_f, p_m, s_w.

Uso:
    RUST_LOG=repmate=debug ./target/release/repmate [config.json] [--replay grabacion.csv] [--record salida.csv]
    ./target/release/repmate --collect bP p_f [--record captura.csv]
*/

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use repmate::classifier::{load_labels, OnnxClassifier};
use repmate::csv_loader::load_reference_tensor;
use repmate::history_buffer::HistoryBuffer;
use repmate::sample_source::{
    acquire, spawn_producer, ChannelSource, CsvReplaySource, SampleSource, SourceError,
    SyntheticPattern, SyntheticSource,
};
use repmate::sinks::{
    CsvSampleRecorder, IndicatorOutput, IndicatorSink, LabeledCaptureRecorder, LogSink,
    ResultSink, SampleSink, SinkError,
};
use repmate::types::CaptureTag;
use repmate::{CycleOutcome, PipelineConfig, PipelineContext};

const DEFAULT_CONFIG: &str = "repmate.json";
const PRODUCER_QUEUE: usize = 100;

struct Args {
    config_path: Option<PathBuf>,
    replay: Option<PathBuf>,
    record: Option<PathBuf>,
    collect: Option<CaptureTag>,
}

const USAGE: &str = "Uso: repmate [config.json] [--replay archivo.csv] [--record salida.csv] [--collect <lift> <label>]";

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut replay = None;
    let mut record = None;
    let mut collect = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--replay" => {
                replay = Some(PathBuf::from(args.next().context(USAGE)?));
            }
            "--record" => {
                record = Some(PathBuf::from(args.next().context(USAGE)?));
            }
            "--collect" => {
                let lift = args.next().context(USAGE)?;
                let label = args.next().context(USAGE)?;
                collect = Some(CaptureTag::new(&lift, &label)?);
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => {
                if config_path.is_some() {
                    bail!(USAGE);
                }
                config_path = Some(PathBuf::from(arg));
            }
        }
    }

    Ok(Args {
        config_path,
        replay,
        record,
        collect,
    })
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repmate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => PipelineConfig::load(DEFAULT_CONFIG)?,
        None => {
            info!("Sin archivo de configuración, usando valores por defecto");
            PipelineConfig::default()
        }
    };

    if let Some(classes_path) = &config.classes_path {
        config.labels = load_labels(classes_path)
            .with_context(|| format!("No se pudieron cargar las clases de {:?}", classes_path))?;
        config.validate()?;
    }
    Ok(config)
}

/// Indicadores en consola: un "LED" por etiqueta
struct ConsoleLights {
    labels: Vec<String>,
    state: Vec<bool>,
}

impl ConsoleLights {
    fn new(labels: &[String]) -> Self {
        Self {
            labels: labels.to_vec(),
            state: vec![false; labels.len()],
        }
    }
}

impl IndicatorOutput for ConsoleLights {
    fn set(&mut self, channel: usize, on: bool) -> Result<(), SinkError> {
        let slot = self
            .state
            .get_mut(channel)
            .ok_or_else(|| SinkError::Indicator(format!("canal {} inexistente", channel)))?;
        if on && !*slot {
            println!("💡 {}", self.labels[channel]);
        }
        *slot = on;
        Ok(())
    }
}

/// IMU simulada, o un CSV grabado si se pasó `--replay`
fn open_source(replay: Option<&Path>) -> Result<Box<dyn SampleSource + Send>> {
    let source: Box<dyn SampleSource + Send> = match replay {
        Some(path) => {
            println!("🎞️  Reproduciendo muestras desde {:?}", path);
            Box::new(CsvReplaySource::open(path, false)?)
        }
        None => {
            println!("🧪 Sin sensor: usando IMU simulada");
            Box::new(SyntheticSource::new(
                SyntheticPattern::Sinusoid {
                    period: 400,
                    amplitude: 9.81,
                },
                0.2,
                0x5eed,
            ))
        }
    };
    Ok(source)
}

/// Graba una captura etiquetada de duración fija y termina
fn collect(config: &PipelineConfig, args: &Args, tag: CaptureTag) -> Result<()> {
    let count = config.capture_samples();
    let path = args
        .record
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("captura_{}_{}.csv", tag.lift, tag.label)));
    println!(
        "🎙️  Captura {}/{}: {} ms ({} muestras) → {:?}",
        tag.lift, tag.label, config.capture_duration_ms, count, path
    );

    let source = open_source(args.replay.as_deref())?;
    let (rx, producer) = spawn_producer(source, config.sample_interval(), PRODUCER_QUEUE);
    let mut source = ChannelSource::new(rx);
    let mut buffer = HistoryBuffer::try_with_capacity(count)?;
    let mut recorder = LabeledCaptureRecorder::create(&path, tag, config.sample_interval_ms)?;

    let captured = acquire(
        &mut source,
        &mut buffer,
        count,
        Duration::ZERO,
        Some(&mut recorder),
    );
    recorder.flush()?;
    drop(source);
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("El hilo productor terminó con pánico"))?;

    match captured {
        Ok(n) => println!("✅ Captura completa: {} muestras", n),
        Err(SourceError::Exhausted | SourceError::Disconnected) => {
            warn!(
                recorded = recorder.recorded(),
                requested = count,
                "La fuente terminó antes de completar la captura"
            );
            println!("⚠️  Captura parcial: {} muestras", recorder.recorded());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    println!("🏋️  RepMate - Clasificación de forma en tiempo real\n");

    let args = parse_args()?;
    let config = load_config(args.config_path.as_deref())?;

    if let Some(tag) = args.collect.clone() {
        return collect(&config, &args, tag);
    }

    println!("🔧 Inicializando clasificador ONNX...");
    let classifier = OnnxClassifier::new(
        &config.model_path,
        config.sequence_length,
        config.labels.len(),
    )
    .with_context(|| format!("No se pudo cargar el modelo {:?}", config.model_path))?;
    let mut pipeline = PipelineContext::new(&config, classifier)?;
    println!("✅ Clasificador cargado\n");

    if let Some(reference) = &config.debug_reference_csv {
        let tensor = load_reference_tensor(
            reference,
            config.sequence_length,
            config.input.element_type,
        )?;
        pipeline.set_reference_override(Some(tensor))?;
    }

    // Fuente de muestras en un hilo aparte
    let source = open_source(args.replay.as_deref())?;
    let (rx, producer) = spawn_producer(source, config.sample_interval(), PRODUCER_QUEUE);
    let mut source = ChannelSource::new(rx);

    let mut recorder = match &args.record {
        Some(path) => {
            println!("💾 Grabando muestras en {:?}", path);
            Some(CsvSampleRecorder::create(path)?)
        }
        None => None,
    };

    let mut sinks: Vec<Box<dyn ResultSink>> = vec![
        Box::new(LogSink),
        Box::new(IndicatorSink::new(
            ConsoleLights::new(pipeline.labels()),
            pipeline.labels().len(),
        )),
    ];

    println!("⏳ Cebando buffer con {} muestras...", config.prime_samples);
    let mut running = match acquire(
        &mut source,
        pipeline.buffer_mut(),
        config.prime_samples,
        Duration::ZERO,
        recorder.as_mut().map(|r| r as &mut dyn SampleSink),
    ) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "La fuente terminó antes de cebar el buffer");
            false
        }
    };
    if running {
        println!("🎬 Iniciando clasificación...\n");
    }

    let mut published = 0u64;
    let mut aborted = 0u64;

    while running {
        match pipeline.run_cycle() {
            CycleOutcome::Success(result) => {
                if result.confidence >= config.confidence_threshold {
                    published += 1;
                    for sink in sinks.iter_mut() {
                        if let Err(e) = sink.publish(&result) {
                            warn!(error = %e, "Error publicando resultado");
                        }
                    }
                } else {
                    debug!(
                        label = %result.label_name,
                        confidence = result.confidence,
                        threshold = config.confidence_threshold,
                        "Confianza insuficiente"
                    );
                }
            }
            CycleOutcome::Aborted { error, .. } => {
                aborted += 1;
                if error.is_fatal() {
                    return Err(error.into());
                }
            }
        }

        if let Err(e) = acquire(
            &mut source,
            pipeline.buffer_mut(),
            config.samples_per_cycle,
            Duration::ZERO,
            recorder.as_mut().map(|r| r as &mut dyn SampleSink),
        ) {
            match e {
                SourceError::Disconnected | SourceError::Exhausted => {
                    info!("Fuente de muestras finalizada")
                }
                other => warn!(error = %other, "Error adquiriendo muestras"),
            }
            running = false;
        }
    }

    if let Some(rec) = recorder.as_mut() {
        rec.flush()?;
        println!("💾 {} muestras grabadas", rec.recorded());
    }

    drop(source);
    let sent = producer
        .join()
        .map_err(|_| anyhow::anyhow!("El hilo productor terminó con pánico"))?;

    println!(
        "\n📊 Ciclos: {} | publicados: {} | abortados: {} | muestras: {}",
        pipeline.cycles(),
        published,
        aborted,
        sent
    );
    Ok(())
}
