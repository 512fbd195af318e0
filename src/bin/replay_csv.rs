use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use repmate::classifier::{load_labels, OnnxClassifier};
use repmate::csv_loader::{load_reference_tensor, load_samples_from_csv};
use repmate::normalizer::TensorStats;
use repmate::sample_source::{acquire, CsvReplaySource};
use repmate::types::NUM_FEATURES;
use repmate::{CycleOutcome, PipelineConfig, PipelineContext};

const DEFAULT_TOP_K: usize = 5;
const USAGE: &str =
    "Uso: replay_csv [--config config.json] [--top N] [--dump-tensor] <archivo.csv>";

struct ReplayOptions {
    config_path: Option<PathBuf>,
    top_k: usize,
    dump_tensor: bool,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut config_path = None;
    let mut top_k = DEFAULT_TOP_K;
    let mut dump_tensor = false;
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-tensor" => dump_tensor = true,
            "--config" => config_path = Some(PathBuf::from(args.next().context(USAGE)?)),
            "--top" => {
                let value = args.next().context(USAGE)?;
                top_k = value
                    .parse()
                    .with_context(|| format!("--top inválido: {}", value))?;
            }
            _ => {
                if csv_path.is_some() {
                    bail!(USAGE);
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV"))?;
    Ok((
        csv_path,
        ReplayOptions {
            config_path,
            top_k,
            dump_tensor,
        },
    ))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(classes_path) = &config.classes_path {
        config.labels = load_labels(classes_path)?;
        config.validate()?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repmate=warn")),
        )
        .init();

    let (csv_path, opts) = parse_args()?;
    println!("🎞️  Reproduciendo repetición desde {:?}", csv_path);

    let config = load_config(opts.config_path.as_deref())?;
    let samples = load_samples_from_csv(&csv_path)?;
    let total = samples.len();
    if total < config.grab_len {
        println!(
            "⚠️  El CSV tiene {} muestras; se necesitan al menos {}",
            total, config.grab_len
        );
    }

    let classifier = OnnxClassifier::new(
        &config.model_path,
        config.sequence_length,
        config.labels.len(),
    )?;
    let mut pipeline = PipelineContext::new(&config, classifier)?;

    if let Some(reference) = &config.debug_reference_csv {
        let tensor = load_reference_tensor(
            reference,
            config.sequence_length,
            config.input.element_type,
        )?;
        pipeline.set_reference_override(Some(tensor))?;
        println!(
            "⚠️  Tensor de referencia {:?} activo: la inferencia ignora las muestras del CSV",
            reference
        );
    }

    let mut source = CsvReplaySource::new(samples, false);
    acquire(&mut source, pipeline.buffer_mut(), total, Duration::ZERO, None)?;
    println!(
        "ℹ️  Buffer: {} de {} muestras (se usan las últimas {})",
        pipeline.buffer().len(),
        pipeline.buffer().capacity(),
        config.grab_len
    );

    if opts.dump_tensor {
        let tensor = pipeline.prepare_tensor()?;
        let stats = TensorStats::of(tensor);
        println!(
            "\n🧱 Tensor de entrada {:?} ({:?}) min={:.4} max={:.4} media={:.4}",
            tensor.shape,
            tensor.data.element_type(),
            stats.min,
            stats.max,
            stats.mean
        );
        for t in 0..tensor.sequence_length() {
            let row: Vec<String> = (0..NUM_FEATURES)
                .map(|f| format!("{:>10.4}", tensor.get(t, f)))
                .collect();
            println!("  {:03}: {}", t, row.join(" "));
        }
    }

    let result = match pipeline.run_cycle() {
        CycleOutcome::Success(result) => result,
        CycleOutcome::Aborted { stage, error } => {
            bail!("Ciclo abortado en {:?}: {}", stage, error);
        }
    };

    println!(
        "\n🥇 Predicción: {} ({:.1}%)",
        result.label_name,
        result.confidence * 100.0
    );
    if result.confidence < config.confidence_threshold {
        println!(
            "⚠️  Por debajo del umbral de confianza ({:.0}%)",
            config.confidence_threshold * 100.0
        );
    }

    let mut scores: Vec<(&str, f32)> = pipeline
        .labels()
        .iter()
        .map(String::as_str)
        .zip(result.probabilities.iter().copied())
        .collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("\nTop-{} probabilidades:", opts.top_k);
    for (idx, (label, score)) in scores.iter().take(opts.top_k).enumerate() {
        println!("  {:>2}. {:<25} {:>6.2}%", idx + 1, label, score * 100.0);
    }

    Ok(())
}
