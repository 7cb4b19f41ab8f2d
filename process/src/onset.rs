use tracing::instrument;

use crate::spectrogram::{SpectrogramConfig, SpectrogramGenerator};

/// Fraction of the envelope maximum a peak must reach to count as an onset.
const DEFAULT_PEAK_THRESHOLD: f32 = 0.3;

/// Locates the first downbeat of a signal.
pub trait BeatTracker: Send + Sync {
    /// Time in seconds of the first downbeat, `None` when nothing rhythmic is found.
    fn first_downbeat(&self, samples: &[f32], sample_rate: u32) -> Option<f64>;
}

/// Half-wave rectified spectral flux, one value per spectrogram frame.
/// The first frame has no predecessor and is zero.
#[instrument(skip(generator, samples), level = "trace")]
pub fn onset_envelope(
    generator: &SpectrogramGenerator<f32>,
    samples: &[f32],
    config: &SpectrogramConfig,
) -> Vec<f32> {
    let spectrogram = generator.run(samples, config);

    let mut envelope = Vec::with_capacity(spectrogram.len());
    let mut previous: Option<&Vec<f32>> = None;
    for frame in &spectrogram {
        let flux = match previous {
            Some(previous) => frame
                .iter()
                .zip(previous)
                .map(|(current, previous)| (current - previous).max(0.0))
                .sum(),
            None => 0.0,
        };
        envelope.push(flux);
        previous = Some(frame);
    }
    envelope
}

/// Frames holding a local maximum of at least `threshold * max(envelope)`.
pub fn pick_peaks(envelope: &[f32], threshold: f32) -> Vec<usize> {
    let max = envelope.iter().copied().fold(0.0f32, f32::max);
    if max <= f32::EPSILON {
        return Vec::new();
    }
    let floor = max * threshold;

    (0..envelope.len())
        .filter(|&i| {
            let value = envelope[i];
            value >= floor
                && (i == 0 || value > envelope[i - 1])
                && envelope.get(i + 1).map_or(true, |&next| value >= next)
        })
        .collect()
}

/// Spectral-flux onset tracker; the first onset is taken as the first downbeat.
#[derive(Clone)]
pub struct OnsetBeatTracker {
    generator: SpectrogramGenerator<f32>,
    config: SpectrogramConfig,
    threshold: f32,
}

impl Default for OnsetBeatTracker {
    fn default() -> Self {
        Self::new(SpectrogramConfig::default(), DEFAULT_PEAK_THRESHOLD)
    }
}

impl OnsetBeatTracker {
    pub fn new(config: SpectrogramConfig, threshold: f32) -> Self {
        Self {
            generator: SpectrogramGenerator::default(),
            config,
            threshold,
        }
    }

    /// Resolution of the reported times, in samples.
    pub fn hop(&self) -> usize {
        self.config.hop()
    }

    /// Onset times in seconds, in order.
    pub fn onsets(&self, samples: &[f32], sample_rate: u32) -> Vec<f64> {
        let envelope = onset_envelope(&self.generator, samples, &self.config);
        pick_peaks(&envelope, self.threshold)
            .into_iter()
            .map(|frame| self.config.frame_time(frame, sample_rate))
            .collect()
    }
}

impl BeatTracker for OnsetBeatTracker {
    fn first_downbeat(&self, samples: &[f32], sample_rate: u32) -> Option<f64> {
        self.onsets(samples, sample_rate).first().copied()
    }
}
