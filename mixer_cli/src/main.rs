use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::{bail, Context};
use catalog::{SoundClass, StemCatalog};
use clap::Parser;
use futures::{stream, StreamExt};
use mixer::{
    audio_files, AnchorPolicy, Dataset, ExtractionOutcome, GenerationReport, MetadataExtractor,
    MixConfig, MixtureOrchestrator, StemOverrides,
};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, clap::Parser)]
#[command(name = "stem-mixer", version, about = "Builds tempo-synchronized multi-stem mixtures")]
enum Command {
    /// Writes a metadata document next to every stem in a directory.
    Analyze {
        #[arg(long)]
        data_home: PathBuf,
        /// Comma-separated dataset names whose file naming is trusted (brid, musdb).
        #[arg(long, value_delimiter = ',')]
        dataset: Vec<Dataset>,
        /// Replace existing documents instead of completing them.
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        tempo: Option<f64>,
        #[arg(long)]
        instrument_name: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        sound_class: Option<SoundClass>,
        /// Stems analysed at once.
        #[arg(short, long, default_value_t = 4)]
        jobs: usize,
    },
    /// Generates mixtures from an analysed stem directory.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// JSON file with a partial `MixConfig`; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_home: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Seconds per mixture.
    #[arg(short, long)]
    duration: Option<f64>,
    #[arg(short = 'n', long)]
    n_mixtures: Option<usize>,
    #[arg(long)]
    n_stems: Option<usize>,
    #[arg(long)]
    n_harmonic: Option<usize>,
    #[arg(long)]
    n_percussive: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    max_attempts: Option<usize>,
    /// Seconds one attempt may take.
    #[arg(long)]
    attempt_timeout: Option<f64>,
    #[arg(long)]
    anchor: Option<AnchorPolicy>,
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Decoded audio kept in memory, in MiB. 0 disables caching.
    #[arg(long)]
    audio_cache_mb: Option<usize>,
}

impl GenerateArgs {
    fn into_config(self) -> anyhow::Result<MixConfig> {
        let mut config = match &self.config {
            Some(path) => MixConfig::from_json_file(path)?,
            None => MixConfig::default(),
        };
        if let Some(data_home) = self.data_home {
            config.data_home = data_home;
        } else if self.config.is_none() {
            bail!("either --data-home or --config is required");
        }
        if self.output.is_some() {
            config.output_dir = self.output;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.attempt_timeout.is_some() {
            config.attempt_timeout = self.attempt_timeout;
        }
        config.sample_rate = self.sample_rate.unwrap_or(config.sample_rate);
        config.duration = self.duration.unwrap_or(config.duration);
        config.n_mixtures = self.n_mixtures.unwrap_or(config.n_mixtures);
        config.n_stems = self.n_stems.unwrap_or(config.n_stems);
        config.n_harmonic = self.n_harmonic.unwrap_or(config.n_harmonic);
        config.n_percussive = self.n_percussive.unwrap_or(config.n_percussive);
        config.max_attempts = self.max_attempts.unwrap_or(config.max_attempts);
        config.anchor = self.anchor.unwrap_or(config.anchor);
        config.jobs = self.jobs.unwrap_or(config.jobs);
        config.audio_cache_mb = self.audio_cache_mb.unwrap_or(config.audio_cache_mb);

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::prelude::*;

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init()
    }

    match Command::parse() {
        Command::Analyze {
            data_home,
            dataset,
            overwrite,
            tempo,
            instrument_name,
            key,
            sound_class,
            jobs,
        } => {
            let extractor = MetadataExtractor::default()
                .overwrite(overwrite)
                .datasets(dataset)
                .overrides(StemOverrides {
                    tempo,
                    instrument_name,
                    key,
                    sound_class,
                });
            analyze(data_home, extractor, jobs.max(1)).await
        }
        Command::Generate(args) => generate(args.into_config()?).await,
    }
}

#[instrument(skip(extractor))]
async fn analyze(data_home: PathBuf, extractor: MetadataExtractor, jobs: usize) -> anyhow::Result<()> {
    let files = audio_files(&data_home)?;
    info!(stems = files.len(), "analysing stems");

    let start = Instant::now();
    let extractor = Arc::new(extractor);
    let results: Vec<_> = stream::iter(files)
        .map(|path| {
            let extractor = extractor.clone();
            tokio::task::spawn_blocking(move || {
                let outcome = extractor.extract(&path);
                (path, outcome)
            })
        })
        .buffer_unordered(jobs)
        .collect()
        .await;

    let (mut created, mut updated, mut skipped, mut failed) = (0, 0, 0, 0);
    for joined in results {
        let (path, outcome) = joined.context("analysis task panicked")?;
        match outcome {
            Ok(ExtractionOutcome::Created(_)) => created += 1,
            Ok(ExtractionOutcome::Updated(_)) => updated += 1,
            Ok(ExtractionOutcome::Skipped(_)) => skipped += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata not written");
                failed += 1;
            }
        }
    }
    let elapsed = start.elapsed();
    info!(?elapsed, created, updated, skipped, failed, "completed analysis");
    Ok(())
}

#[instrument(skip_all)]
async fn generate(config: MixConfig) -> anyhow::Result<()> {
    let catalog = StemCatalog::load_dir(&config.data_home)?;
    let pending = catalog
        .records()
        .filter(|record| record.tempo.needs_computation() || record.sound_class == SoundClass::Unknown)
        .count();
    if pending > 0 {
        warn!(pending, "some stems were never analysed and cannot be drawn");
    }
    if catalog.index_by_tempo_bin().is_empty() {
        bail!(
            "no stem in {} has both a tempo and a sound class, run `analyze` first",
            config.data_home.display()
        );
    }
    let catalog = Arc::new(catalog);
    let orchestrator = MixtureOrchestrator::new(catalog, config.clone())?;

    let start = Instant::now();
    let shares = split_mixtures(config.n_mixtures, config.jobs);
    debug!(?shares, "dispatching orchestrators");
    let results: Vec<_> = stream::iter(shares.into_iter().enumerate())
        .map(|(job, count)| {
            let orchestrator = orchestrator.clone();
            let seed = config.seed.map(|seed| seed.wrapping_add(job as u64));
            tokio::task::spawn_blocking(move || orchestrator.generate(count, seed))
        })
        .buffer_unordered(config.jobs)
        .collect()
        .await;

    let mut report = GenerationReport::default();
    for joined in results {
        report.merge(joined.context("generation task panicked")??);
    }

    let elapsed = start.elapsed();
    info!(
        ?elapsed,
        mixtures = report.mixtures.len(),
        attempts = report.attempts,
        failures = ?report.failures,
        output = %config.output_dir().display(),
        cached_bytes = orchestrator.store().cached_bytes(),
        "completed generation"
    );
    for mixture in &report.mixtures {
        println!("{}", mixture.dir.display());
    }
    Ok(())
}

/// Spreads `total` mixtures over at most `jobs` orchestrators.
fn split_mixtures(total: usize, jobs: usize) -> Vec<usize> {
    let jobs = jobs.clamp(1, total.max(1));
    (0..jobs)
        .map(|job| total / jobs + usize::from(job < total % jobs))
        .filter(|&count| count > 0)
        .collect()
}
