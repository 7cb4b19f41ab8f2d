use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to read audio file {path}")]
    AudioRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("invalid stretch rate {0}")]
    InvalidRate(f64),

    #[error("input too short: {provided} samples provided, {minimum} required")]
    InputTooShort { provided: usize, minimum: usize },

    #[error("failed to write {path}")]
    WavWrite {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProcessError>;
