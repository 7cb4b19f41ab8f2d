use std::{fmt, path::PathBuf};

use catalog::{CatalogError, Role, StemId};
use process::ProcessError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MixError {
    #[error("corpus starvation: no valid mixture after {attempts} attempts, {reason}")]
    CorpusStarvation { attempts: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type Result<T> = std::result::Result<T, MixError>;

/// Why a mixture attempt was discarded. Never fatal on its own: the
/// orchestrator logs it and starts a new attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Invalidity {
    NoCandidateBin { role: Role },
    EmptyTempoBin { bin: u32, role: Role },
    NotEnoughCandidates { bin: u32, role: Role, wanted: usize, available: usize },
    InstrumentCollision { instrument: String },
    WrongStemCount { expected: usize, selected: usize },
    MissingTempo { stem: StemId },
    AudioUnavailable { stem: StemId },
    StretchFailed { stem: StemId },
    LostBuffer { expected: usize, produced: usize },
    NoDownbeat { stem: StemId },
    EmptyBuffer,
    InsufficientMaterial { available: usize, needed: usize },
    DeadlineExceeded,
}

impl Invalidity {
    /// Stable short name, used to tally failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Invalidity::NoCandidateBin { .. } => "no_candidate_bin",
            Invalidity::EmptyTempoBin { .. } => "empty_tempo_bin",
            Invalidity::NotEnoughCandidates { .. } => "not_enough_candidates",
            Invalidity::InstrumentCollision { .. } => "instrument_collision",
            Invalidity::WrongStemCount { .. } => "wrong_stem_count",
            Invalidity::MissingTempo { .. } => "missing_tempo",
            Invalidity::AudioUnavailable { .. } => "audio_unavailable",
            Invalidity::StretchFailed { .. } => "stretch_failed",
            Invalidity::LostBuffer { .. } => "lost_buffer",
            Invalidity::NoDownbeat { .. } => "no_downbeat",
            Invalidity::EmptyBuffer => "empty_buffer",
            Invalidity::InsufficientMaterial { .. } => "insufficient_material",
            Invalidity::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for Invalidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalidity::NoCandidateBin { role } => write!(f, "no tempo bin holds a {role} stem"),
            Invalidity::EmptyTempoBin { bin, role } => {
                write!(f, "tempo bin {bin} holds no {role} stem")
            }
            Invalidity::NotEnoughCandidates {
                bin,
                role,
                wanted,
                available,
            } => write!(
                f,
                "tempo bin {bin} holds {available} {role} stems, {wanted} requested"
            ),
            Invalidity::InstrumentCollision { instrument } => {
                write!(f, "instrument {instrument:?} selected twice")
            }
            Invalidity::WrongStemCount { expected, selected } => {
                write!(f, "selected {selected} stems, {expected} requested")
            }
            Invalidity::MissingTempo { stem } => write!(f, "stem {stem} has no usable tempo"),
            Invalidity::AudioUnavailable { stem } => write!(f, "audio for stem {stem} unavailable"),
            Invalidity::StretchFailed { stem } => write!(f, "time-stretch of stem {stem} failed"),
            Invalidity::LostBuffer { expected, produced } => {
                write!(f, "{produced} buffers produced, {expected} expected")
            }
            Invalidity::NoDownbeat { stem } => write!(f, "no downbeat found in stem {stem}"),
            Invalidity::EmptyBuffer => f.write_str("a stem buffer is empty"),
            Invalidity::InsufficientMaterial { available, needed } => write!(
                f,
                "shortest aligned stem has {available} samples, {needed} needed"
            ),
            Invalidity::DeadlineExceeded => f.write_str("attempt deadline exceeded"),
        }
    }
}
