use std::{
    fs,
    path::{Path, PathBuf},
};

use catalog::{
    metadata_path_for, read_document, write_document, CatalogError, DerivedField,
    MetadataDocument, SoundClass,
};
use process::{estimate_tempo, harmonic_percussive_split, is_audio_file, Dominance};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{datasets::Dataset, error::Result};

/// Rate stems are analysed at.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;
/// Minimum harmonic/percussive percent difference for a decided class.
pub const DEFAULT_CLASS_THRESHOLD: f64 = 0.50;

/// Values applied to every stem in place of analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemOverrides {
    pub tempo: Option<f64>,
    pub instrument_name: Option<String>,
    pub key: Option<String>,
    pub sound_class: Option<SoundClass>,
}

/// Descriptors computed from audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analysis {
    pub tempo: Option<f64>,
    /// `Undetermined` when neither part dominates or the audio is unusable.
    pub sound_class: SoundClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Created(PathBuf),
    /// An existing document had unknown fields filled in.
    Updated(PathBuf),
    Skipped(PathBuf),
}

impl ExtractionOutcome {
    pub fn path(&self) -> &Path {
        match self {
            ExtractionOutcome::Created(path)
            | ExtractionOutcome::Updated(path)
            | ExtractionOutcome::Skipped(path) => path,
        }
    }
}

/// Writes a metadata document next to each stem's audio file.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    sample_rate: u32,
    threshold: f64,
    overwrite: bool,
    datasets: Vec<Dataset>,
    overrides: StemOverrides,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self {
            sample_rate: ANALYSIS_SAMPLE_RATE,
            threshold: DEFAULT_CLASS_THRESHOLD,
            overwrite: false,
            datasets: Vec::new(),
            overrides: StemOverrides::default(),
        }
    }
}

impl MetadataExtractor {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn datasets(mut self, datasets: impl IntoIterator<Item = Dataset>) -> Self {
        self.datasets = datasets.into_iter().collect();
        self
    }

    pub fn overrides(mut self, overrides: StemOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Never fails: unusable audio yields no tempo and an undetermined class.
    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Analysis {
        let tempo = estimate_tempo(samples, sample_rate);
        let sound_class = match harmonic_percussive_split(samples).map(|split| split.dominance(self.threshold)) {
            Some(Dominance::Harmonic) => SoundClass::Harmonic,
            Some(Dominance::Percussive) => SoundClass::Percussive,
            Some(Dominance::Balanced) | None => SoundClass::Undetermined,
        };
        Analysis { tempo, sound_class }
    }

    /// Decodes and analyses one file. Decode failures are logged and
    /// reported like silence.
    pub fn analyze_file(&self, audio_path: &Path) -> Analysis {
        match process::load_mono(audio_path, self.sample_rate) {
            Ok(mut samples) => {
                process::normalize_peak(&mut samples);
                self.analyze(&samples, self.sample_rate)
            }
            Err(e) => {
                warn!(path = %audio_path.display(), error = %e, "cannot analyse stem");
                Analysis {
                    tempo: None,
                    sound_class: SoundClass::Undetermined,
                }
            }
        }
    }

    /// Writes or completes the metadata document of `audio_path`.
    ///
    /// Only fields that are still unknown are computed. A field analysis
    /// cannot resolve is recorded as unresolved and left alone afterwards.
    #[instrument(skip(self), level = "debug")]
    pub fn extract(&self, audio_path: &Path) -> Result<ExtractionOutcome> {
        let json_path = metadata_path_for(audio_path);
        let existing = json_path.is_file() && !self.overwrite;

        let mut document = if existing {
            read_document(&json_path)?
        } else {
            MetadataDocument::default()
        };
        if document.stem_name.is_none() {
            document.stem_name = audio_path
                .file_stem()
                .map(|name| name.to_string_lossy().into_owned());
        }
        if !existing {
            self.prefill(&mut document, audio_path);
        }

        let tempo = document.tempo();
        let sound_class = document.sound_class();
        if !tempo.needs_computation() && !sound_class.needs_computation() {
            debug!(path = %json_path.display(), "metadata complete");
            return Ok(if existing {
                ExtractionOutcome::Skipped(json_path)
            } else {
                write_document(&json_path, &document)?;
                ExtractionOutcome::Created(json_path)
            });
        }

        let analysis = self.analyze_file(audio_path);
        if tempo.needs_computation() {
            match analysis.tempo {
                Some(bpm) => document.tempo = Some(bpm),
                None => document.mark_unresolved(DerivedField::Tempo),
            }
        }
        if sound_class.needs_computation() {
            document.sound_class = Some(analysis.sound_class);
        }

        write_document(&json_path, &document)?;
        info!(
            path = %json_path.display(),
            tempo = ?document.tempo,
            sound_class = ?document.sound_class,
            "wrote metadata"
        );
        Ok(if existing {
            ExtractionOutcome::Updated(json_path)
        } else {
            ExtractionOutcome::Created(json_path)
        })
    }

    /// Dataset naming first, uniform overrides on top.
    fn prefill(&self, document: &mut MetadataDocument, audio_path: &Path) {
        if let Some(known) = self
            .datasets
            .iter()
            .find_map(|dataset| dataset.prefill(audio_path))
        {
            document.tempo = document.tempo.or(known.tempo);
            document.sound_class = document.sound_class.or(known.sound_class);
            document.instrument_name = document.instrument_name.take().or(known.instrument_name);
            document.key = document.key.take().or(known.key);
        }

        let overrides = &self.overrides;
        if overrides.tempo.is_some() {
            document.tempo = overrides.tempo;
        }
        if overrides.sound_class.is_some() {
            document.sound_class = overrides.sound_class;
        }
        if overrides.instrument_name.is_some() {
            document.instrument_name = overrides.instrument_name.clone();
        }
        if overrides.key.is_some() {
            document.key = overrides.key.clone();
        }
    }
}

/// Eligible audio files directly inside `dir`, sorted.
pub fn audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && is_audio_file(path))
        .collect();
    files.sort();
    Ok(files)
}
