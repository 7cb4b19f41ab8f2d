use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Instant,
};

use catalog::StemCatalog;
use process::{BeatTracker, OnsetBeatTracker, TimeStretcher, Wsola};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, info_span, instrument, warn};

use crate::{
    align::{AlignedStem, BeatAligner},
    assemble::{Mixture, MixtureAssembler, WrittenMixture},
    config::MixConfig,
    error::{Invalidity, MixError, Result},
    select::{SelectionSet, TrackSelector},
    store::{AudioStore, FileLoader},
    tempo::{StretchedStem, TempoAligner},
};

/// Where an attempt currently is. Every stage either hands its output to the
/// next state or moves straight to `Retry`.
#[derive(Debug)]
enum AttemptState {
    Selecting,
    Stretching(SelectionSet),
    Aligning(Vec<StretchedStem>),
    Assembling(Vec<AlignedStem>),
    Success(Mixture),
    Retry(Invalidity),
}

impl AttemptState {
    fn name(&self) -> &'static str {
        match self {
            AttemptState::Selecting => "selecting",
            AttemptState::Stretching(_) => "stretching",
            AttemptState::Aligning(_) => "aligning",
            AttemptState::Assembling(_) => "assembling",
            AttemptState::Success(_) => "success",
            AttemptState::Retry(_) => "retry",
        }
    }
}

/// Outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub mixtures: Vec<WrittenMixture>,
    /// Attempts made, successful ones included.
    pub attempts: usize,
    /// Discarded attempts by [`Invalidity::kind`].
    pub failures: BTreeMap<&'static str, usize>,
}

impl GenerationReport {
    pub fn merge(&mut self, other: GenerationReport) {
        self.mixtures.extend(other.mixtures);
        self.attempts += other.attempts;
        for (kind, count) in other.failures {
            *self.failures.entry(kind).or_default() += count;
        }
    }

    pub fn failed_attempts(&self) -> usize {
        self.failures.values().sum()
    }
}

/// Runs select, stretch, align and assemble attempts until the requested
/// number of mixtures exists.
///
/// Cloning is cheap and every clone shares the catalog and decoded audio, so
/// independent orchestrators can run on separate threads.
#[derive(Clone)]
pub struct MixtureOrchestrator {
    catalog: Arc<StemCatalog>,
    store: Arc<AudioStore>,
    stretcher: Arc<dyn TimeStretcher>,
    tracker: Arc<dyn BeatTracker>,
    config: MixConfig,
}

impl MixtureOrchestrator {
    pub fn new(catalog: Arc<StemCatalog>, config: MixConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            store: Arc::new(
                AudioStore::new(FileLoader, config.sample_rate).with_budget(config.audio_cache_bytes()),
            ),
            stretcher: Arc::new(Wsola::default()),
            tracker: Arc::new(OnsetBeatTracker::default()),
            config,
        })
    }

    pub fn with_store(mut self, store: Arc<AudioStore>) -> Result<Self> {
        if store.sample_rate() != self.config.sample_rate {
            return Err(MixError::Config(format!(
                "audio store runs at {} Hz, mixtures at {} Hz",
                store.sample_rate(),
                self.config.sample_rate
            )));
        }
        self.store = store;
        Ok(self)
    }

    pub fn with_stretcher(mut self, stretcher: Arc<dyn TimeStretcher>) -> Self {
        self.stretcher = stretcher;
        self
    }

    pub fn with_beat_tracker(mut self, tracker: Arc<dyn BeatTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    /// Generates `config.n_mixtures` mixtures seeded by `config.seed`.
    pub fn run(&self) -> Result<GenerationReport> {
        self.generate(self.config.n_mixtures, self.config.seed)
    }

    /// Generates `n_mixtures` mixtures. Without a seed the draw comes from
    /// system entropy.
    pub fn generate(&self, n_mixtures: usize, seed: Option<u64>) -> Result<GenerationReport> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.run_with_rng(&mut rng, n_mixtures)
    }

    /// Fails with [`MixError::CorpusStarvation`] once `max_attempts`
    /// consecutive attempts were invalid.
    #[instrument(skip(self, rng), level = "info")]
    pub fn run_with_rng<R: Rng + ?Sized>(&self, rng: &mut R, n_mixtures: usize) -> Result<GenerationReport> {
        let selector = TrackSelector::new(
            &self.catalog,
            self.config.n_stems,
            self.config.n_percussive,
            self.config.n_harmonic,
        );
        let assembler = MixtureAssembler::new(
            self.config.output_dir(),
            self.config.sample_rate,
            self.config.window_len(),
        );
        debug!(counts = ?selector.counts(), output = %assembler.output_dir().display(), "starting generation");

        let mut report = GenerationReport::default();
        let mut streak: BTreeMap<&'static str, (usize, Invalidity)> = BTreeMap::new();
        let mut consecutive = 0;

        while report.mixtures.len() < n_mixtures {
            report.attempts += 1;
            let span = info_span!("attempt", n = report.attempts);
            let _enter = span.enter();

            match self.attempt(&selector, &assembler, rng) {
                Ok(mixture) => {
                    let written = assembler.persist(&mixture)?;
                    report.mixtures.push(written);
                    consecutive = 0;
                    streak.clear();
                }
                Err(invalidity) => {
                    debug!(reason = %invalidity, "attempt discarded");
                    *report.failures.entry(invalidity.kind()).or_default() += 1;
                    consecutive += 1;
                    let entry = streak.entry(invalidity.kind()).or_insert((0, invalidity.clone()));
                    entry.0 += 1;
                    entry.1 = invalidity;

                    if consecutive >= self.config.max_attempts {
                        let reason = streak
                            .values()
                            .max_by_key(|(count, _)| *count)
                            .map(|(count, invalidity)| {
                                format!("most often ({count} times): {invalidity}")
                            })
                            .unwrap_or_default();
                        warn!(attempts = consecutive, %reason, "giving up");
                        return Err(MixError::CorpusStarvation {
                            attempts: consecutive,
                            reason,
                        });
                    }
                }
            }
        }

        info!(
            mixtures = report.mixtures.len(),
            attempts = report.attempts,
            failed = report.failed_attempts(),
            "generation finished"
        );
        Ok(report)
    }

    fn attempt<R: Rng + ?Sized>(
        &self,
        selector: &TrackSelector,
        assembler: &MixtureAssembler,
        rng: &mut R,
    ) -> std::result::Result<Mixture, Invalidity> {
        let deadline = self.config.attempt_deadline().map(|budget| Instant::now() + budget);
        let stretch = TempoAligner::new(&self.catalog, &self.store, self.stretcher.as_ref());
        let shift = BeatAligner::new(self.tracker.as_ref(), self.config.anchor, self.config.sample_rate);

        let mut state = AttemptState::Selecting;
        loop {
            let running = !matches!(state, AttemptState::Success(_) | AttemptState::Retry(_));
            if running && deadline.is_some_and(|deadline| Instant::now() > deadline) {
                debug!(state = state.name(), "attempt ran out of time");
                state = AttemptState::Retry(Invalidity::DeadlineExceeded);
            }
            state = match state {
                AttemptState::Selecting => match selector.select(rng) {
                    Ok(selection) => AttemptState::Stretching(selection),
                    Err(invalidity) => AttemptState::Retry(invalidity),
                },
                AttemptState::Stretching(selection) => match stretch.run(&selection) {
                    Ok(stems) => AttemptState::Aligning(stems),
                    Err(invalidity) => AttemptState::Retry(invalidity),
                },
                AttemptState::Aligning(stems) => match shift.run(stems) {
                    Ok(aligned) => AttemptState::Assembling(aligned),
                    Err(invalidity) => AttemptState::Retry(invalidity),
                },
                AttemptState::Assembling(aligned) => match assembler.assemble(aligned) {
                    Ok(mixture) => AttemptState::Success(mixture),
                    Err(invalidity) => AttemptState::Retry(invalidity),
                },
                AttemptState::Success(mixture) => return Ok(mixture),
                AttemptState::Retry(invalidity) => return Err(invalidity),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, time::Duration};

    use super::*;
    use crate::store::StemLoader;

    /// Clicks every half second from 0.1 s on, 8 s long.
    struct ClickLoader;

    impl StemLoader for ClickLoader {
        fn load(&self, _path: &Path, sample_rate: u32) -> process::Result<Vec<f32>> {
            let mut samples = vec![0.0; 8 * sample_rate as usize];
            for beat in 0..16 {
                let at = ((0.1 + beat as f64 * 0.5) * sample_rate as f64) as usize;
                samples[at] = 1.0;
            }
            Ok(samples)
        }
    }

    struct FirstNonZero;

    impl BeatTracker for FirstNonZero {
        fn first_downbeat(&self, samples: &[f32], sample_rate: u32) -> Option<f64> {
            samples
                .iter()
                .position(|&s| s != 0.0)
                .map(|i| i as f64 / sample_rate as f64)
        }
    }

    fn corpus(dir: &Path, stems: &[(&str, f64, &str)]) -> Arc<StemCatalog> {
        for (name, tempo, class) in stems {
            let document = serde_json::json!({
                "stem_name": name,
                "tempo": tempo,
                "sound_class": class,
            });
            fs::write(dir.join(format!("{name}.json")), document.to_string()).unwrap();
            fs::write(dir.join(format!("{name}.wav")), b"").unwrap();
        }
        Arc::new(StemCatalog::load_dir(dir).unwrap())
    }

    fn orchestrator(data_home: &Path, config: MixConfig) -> MixtureOrchestrator {
        let catalog = corpus(
            data_home,
            &[("kick", 100.0, "percussive"), ("keys", 98.0, "harmonic")],
        );
        let sample_rate = config.sample_rate;
        MixtureOrchestrator::new(catalog, config)
            .unwrap()
            .with_store(Arc::new(AudioStore::new(ClickLoader, sample_rate)))
            .unwrap()
            .with_beat_tracker(Arc::new(FirstNonZero))
    }

    fn config(data_home: &Path, output: &Path) -> MixConfig {
        MixConfig {
            data_home: data_home.to_path_buf(),
            output_dir: Some(output.to_path_buf()),
            sample_rate: 8000,
            duration: 2.0,
            n_mixtures: 2,
            n_stems: 2,
            n_percussive: 1,
            n_harmonic: 1,
            seed: Some(11),
            max_attempts: 5,
            ..Default::default()
        }
    }

    #[test]
    fn generates_the_requested_number_of_mixtures() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let report = orchestrator(data.path(), config(data.path(), out.path()))
            .run()
            .unwrap();

        assert_eq!(report.mixtures.len(), 2);
        assert_eq!(report.attempts, 2);
        assert!(report.failures.is_empty());
        for mixture in &report.mixtures {
            assert!(mixture.dir.join("mixture.wav").is_file());
            assert_eq!(mixture.stems.len(), 2);
        }
    }

    #[test]
    fn unsatisfiable_request_starves() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = MixConfig {
            n_stems: 3,
            n_percussive: 2,
            n_harmonic: 1,
            ..config(data.path(), out.path())
        };
        match orchestrator(data.path(), config).run() {
            Err(MixError::CorpusStarvation { attempts, reason }) => {
                assert_eq!(attempts, 5);
                assert!(reason.contains("percussive"), "{reason}");
            }
            other => panic!("expected starvation, got {other:?}"),
        }
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn expired_deadline_discards_attempts() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = MixConfig {
            attempt_timeout: Some(Duration::from_nanos(1).as_secs_f64()),
            ..config(data.path(), out.path())
        };
        let orchestrator = orchestrator(data.path(), config).with_stretcher(Arc::new(SlowStretcher));
        match orchestrator.run() {
            Err(MixError::CorpusStarvation { reason, .. }) => {
                assert!(reason.contains("deadline"), "{reason}")
            }
            other => panic!("expected starvation, got {other:?}"),
        }
    }

    struct SlowStretcher;

    impl TimeStretcher for SlowStretcher {
        fn stretch(&self, samples: &[f32], _sample_rate: u32, _rate: f64) -> process::Result<Vec<f32>> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(samples.to_vec())
        }
    }

    #[test]
    fn audio_cache_budget_comes_from_config() {
        let data = tempfile::tempdir().unwrap();
        let config = MixConfig {
            data_home: data.path().to_path_buf(),
            audio_cache_mb: 3,
            ..Default::default()
        };
        let orchestrator = MixtureOrchestrator::new(Arc::new(StemCatalog::default()), config).unwrap();
        assert_eq!(orchestrator.store().budget(), 3 * 1024 * 1024);
    }

    #[test]
    fn report_merge_adds_up() {
        let mut a = GenerationReport {
            attempts: 3,
            failures: BTreeMap::from([("empty_tempo_bin", 2)]),
            ..Default::default()
        };
        let b = GenerationReport {
            attempts: 4,
            failures: BTreeMap::from([("empty_tempo_bin", 1), ("no_downbeat", 2)]),
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.attempts, 7);
        assert_eq!(a.failed_attempts(), 5);
        assert_eq!(a.failures["empty_tempo_bin"], 3);
    }
}
