//! Signal processing behind stem mixing: decoding, resampling, onset and
//! downbeat detection, pitch-preserving time-stretch and stem analysis.

use std::path::Path;

use tracing::{debug, instrument};

pub mod analysis;
pub mod decode;
pub mod error;
pub mod onset;
pub mod resample;
pub mod spectrogram;
pub mod stretch;
pub mod wav;

pub use analysis::{estimate_tempo, harmonic_percussive_split, Dominance, EnergySplit};
pub use decode::{decode_file, is_audio_file, DecodedAudio, AUDIO_EXTENSIONS};
pub use error::{ProcessError, Result};
pub use onset::{BeatTracker, OnsetBeatTracker};
pub use spectrogram::{SpectrogramConfig, SpectrogramGenerator};
pub use stretch::{stretched_len, TimeStretcher, Wsola};
pub use wav::write_wav;

/// Decodes `path`, averages it to mono and resamples it to `sample_rate`.
#[instrument(level = "trace")]
pub fn load_mono(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let decoded = decode_file(path)?;
    let native_rate = decoded.sample_rate;
    let mono = decoded.into_mono();
    debug!(native_rate, frames = mono.len(), "decoded");
    resample::resample(&mono, native_rate, sample_rate)
}

/// Scales `samples` so the largest magnitude is 1.0. Silence is left alone.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak > f32::EPSILON {
        samples.iter_mut().for_each(|s| *s /= peak);
    }
}
