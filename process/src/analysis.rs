//! Stem-level descriptors: tempo and harmonic/percussive balance.

use tracing::{debug, instrument};

use crate::{
    onset::onset_envelope,
    spectrogram::{Spectrogram, SpectrogramConfig, SpectrogramGenerator},
};

const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;
/// Centre of the log-normal tempo prior, resolves octave ambiguity.
const PRIOR_BPM: f64 = 120.0;
/// Median filter length for both the harmonic and the percussive estimate.
const HPSS_KERNEL: usize = 17;

/// Estimates the tempo of a signal in BPM from the autocorrelation of its
/// onset envelope. `None` when the signal is too short or has no onsets.
#[instrument(skip(samples), fields(len = samples.len()), level = "trace")]
pub fn estimate_tempo(samples: &[f32], sample_rate: u32) -> Option<f64> {
    let config = SpectrogramConfig::default();
    let envelope = smooth(&onset_envelope(
        &SpectrogramGenerator::default(),
        samples,
        &config,
    ));

    let frame_rate = sample_rate as f64 / config.hop() as f64;
    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() < 2 * max_lag + 2 {
        return None;
    }

    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / envelope.len() as f64;
    let centred: Vec<f64> = envelope.iter().map(|&v| v as f64 - mean).collect();
    let energy: f64 = centred.iter().map(|v| v * v).sum();
    if energy <= f64::EPSILON {
        return None;
    }

    let autocorrelation = |lag: usize| -> f64 {
        centred
            .iter()
            .zip(&centred[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / energy
    };
    let weighted = |lag: usize| -> f64 {
        let bpm = 60.0 * frame_rate / lag as f64;
        let octaves = (bpm / PRIOR_BPM).log2();
        autocorrelation(lag) * (-0.5 * octaves * octaves).exp()
    };

    let (best_lag, best_score) = (min_lag..=max_lag)
        .map(|lag| (lag, weighted(lag)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if best_score <= 0.0 {
        return None;
    }

    // parabolic refinement around the peak
    let lag = if best_lag > min_lag && best_lag < max_lag {
        let (left, centre, right) = (
            autocorrelation(best_lag - 1),
            autocorrelation(best_lag),
            autocorrelation(best_lag + 1),
        );
        let denominator = left - 2.0 * centre + right;
        if denominator.abs() > f64::EPSILON {
            best_lag as f64 + (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
        } else {
            best_lag as f64
        }
    } else {
        best_lag as f64
    };

    let bpm = 60.0 * frame_rate / lag;
    debug!(bpm, lag, "estimated tempo");
    Some(bpm)
}

/// Which component dominates a harmonic/percussive split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dominance {
    Harmonic,
    Percussive,
    Balanced,
}

/// RMS magnitudes of the harmonic and percussive parts of a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySplit {
    pub harmonic: f64,
    pub percussive: f64,
}

impl EnergySplit {
    /// `|h - p| / mean(h, p)`
    pub fn percent_difference(&self) -> f64 {
        let mean = (self.harmonic + self.percussive) / 2.0;
        if mean <= 0.0 {
            return 0.0;
        }
        (self.harmonic - self.percussive).abs() / mean
    }

    /// The louder part when the percent difference exceeds `threshold`.
    pub fn dominance(&self, threshold: f64) -> Dominance {
        if self.percent_difference() <= threshold {
            Dominance::Balanced
        } else if self.percussive > self.harmonic {
            Dominance::Percussive
        } else {
            Dominance::Harmonic
        }
    }
}

/// Median-filtering harmonic/percussive separation on the magnitude
/// spectrogram: filtering along time keeps sustained partials, filtering
/// along frequency keeps broadband hits. Soft masks split the energy.
#[instrument(skip(samples), fields(len = samples.len()), level = "trace")]
pub fn harmonic_percussive_split(samples: &[f32]) -> Option<EnergySplit> {
    let spectrogram: Spectrogram<f32> =
        SpectrogramGenerator::default().run(samples, &SpectrogramConfig::default());
    let frames = spectrogram.len();
    let bins = spectrogram.first()?.len();
    if bins == 0 {
        return None;
    }

    let percussive: Spectrogram<f32> = spectrogram
        .iter()
        .map(|frame| median_filter(frame, HPSS_KERNEL))
        .collect();
    let harmonic_by_bin: Vec<Vec<f32>> = (0..bins)
        .map(|bin| {
            let track: Vec<f32> = spectrogram.iter().map(|frame| frame[bin]).collect();
            median_filter(&track, HPSS_KERNEL)
        })
        .collect();

    let (mut harmonic_energy, mut percussive_energy) = (0.0f64, 0.0f64);
    for (frame, row) in spectrogram.iter().enumerate() {
        for (bin, &magnitude) in row.iter().enumerate() {
            let h = harmonic_by_bin[bin][frame] as f64;
            let p = percussive[frame][bin] as f64;
            let total = h * h + p * p;
            if total <= 0.0 {
                continue;
            }
            let power = magnitude as f64 * magnitude as f64;
            harmonic_energy += power * h * h / total;
            percussive_energy += power * p * p / total;
        }
    }

    let cells = (frames * bins) as f64;
    let split = EnergySplit {
        harmonic: (harmonic_energy / cells).sqrt(),
        percussive: (percussive_energy / cells).sqrt(),
    };
    if split.harmonic + split.percussive <= f64::EPSILON {
        return None;
    }
    debug!(?split, "harmonic/percussive split");
    Some(split)
}

/// Triangular 5-tap smoothing so pulses a frame apart still correlate.
fn smooth(envelope: &[f32]) -> Vec<f32> {
    const TAPS: [f32; 5] = [1.0, 2.0, 3.0, 2.0, 1.0];
    (0..envelope.len())
        .map(|i| {
            let (mut sum, mut weight) = (0.0, 0.0);
            for (k, &tap) in TAPS.iter().enumerate() {
                if let Some(&value) = (i + k).checked_sub(2).and_then(|j| envelope.get(j)) {
                    sum += value * tap;
                    weight += tap;
                }
            }
            sum / weight
        })
        .collect()
}

/// Running median with the window clipped at the edges.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let half = kernel / 2;
    let mut window = Vec::with_capacity(kernel);
    (0..values.len())
        .map(|i| {
            window.clear();
            window.extend_from_slice(&values[i.saturating_sub(half)..(i + half + 1).min(values.len())]);
            let mid = window.len() / 2;
            *window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 22050;

    fn click_train(bpm: f64, secs: f64) -> Vec<f32> {
        let len = (secs * SAMPLE_RATE as f64) as usize;
        let interval = (60.0 * SAMPLE_RATE as f64 / bpm) as usize;
        let mut samples = vec![0.0f32; len];
        for pos in (0..len).step_by(interval) {
            for i in 0..64.min(len - pos) {
                samples[pos + i] = 0.9 * (-0.08 * i as f32).exp();
            }
        }
        samples
    }

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        let len = (secs * SAMPLE_RATE as f32) as usize;
        (0..len)
            .map(|i| 0.5 * (std::f32::consts::TAU * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    #[test]
    fn click_train_tempo() {
        let bpm = estimate_tempo(&click_train(120.0, 8.0), SAMPLE_RATE).unwrap();
        assert!((bpm - 120.0).abs() < 3.0, "expected ~120 BPM, got {bpm}");
    }

    #[test]
    fn silence_has_no_tempo() {
        assert_eq!(estimate_tempo(&vec![0.0; 8 * SAMPLE_RATE as usize], SAMPLE_RATE), None);
    }

    #[test]
    fn short_signal_has_no_tempo() {
        assert_eq!(estimate_tempo(&click_train(120.0, 0.5), SAMPLE_RATE), None);
    }

    #[test]
    fn sustained_tone_is_harmonic() {
        let split = harmonic_percussive_split(&sine(440.0, 3.0)).unwrap();
        assert_eq!(split.dominance(0.5), Dominance::Harmonic);
    }

    #[test]
    fn clicks_are_percussive() {
        let split = harmonic_percussive_split(&click_train(100.0, 4.0)).unwrap();
        assert_eq!(split.dominance(0.5), Dominance::Percussive);
    }

    #[test]
    fn close_energies_are_balanced() {
        let split = EnergySplit {
            harmonic: 1.0,
            percussive: 0.8,
        };
        assert!((split.percent_difference() - 0.2 / 0.9).abs() < 1e-12);
        assert_eq!(split.dominance(0.5), Dominance::Balanced);
    }

    #[test]
    fn median_filter_removes_spikes() {
        let filtered = median_filter(&[0.0, 0.0, 5.0, 0.0, 0.0], 3);
        assert_eq!(filtered, vec![0.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
