use tracing::{debug, instrument};

use crate::{
    error::{ProcessError, Result},
    spectrogram::hanning_window,
};

/// Changes the tempo of a signal without changing its pitch.
pub trait TimeStretcher: Send + Sync {
    /// Plays `samples` back `rate` times faster. The result always holds
    /// [`stretched_len`]`(samples.len(), rate)` samples.
    fn stretch(&self, samples: &[f32], sample_rate: u32, rate: f64) -> Result<Vec<f32>>;
}

/// Output length of a stretch by `rate`.
pub fn stretched_len(len: usize, rate: f64) -> usize {
    (len as f64 / rate).round() as usize
}

/// Waveform-similarity overlap-add.
///
/// Segments of `segment_secs` are laid down at a fixed 50% synthesis hop while
/// the read position advances `rate` times as fast. Each segment start is
/// moved within `±search_secs` of its nominal position to the offset whose
/// first half best continues the previously copied segment.
#[derive(Debug, Clone)]
pub struct Wsola {
    pub segment_secs: f64,
    pub search_secs: f64,
}

impl Default for Wsola {
    fn default() -> Self {
        Self {
            segment_secs: 0.04,
            search_secs: 0.005,
        }
    }
}

impl Wsola {
    fn segment_len(&self, sample_rate: u32) -> usize {
        let len = (self.segment_secs * sample_rate as f64).round() as usize;
        len.max(32) & !1
    }
}

impl TimeStretcher for Wsola {
    #[instrument(skip(self, samples), fields(len = samples.len()), level = "trace")]
    fn stretch(&self, samples: &[f32], sample_rate: u32, rate: f64) -> Result<Vec<f32>> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ProcessError::InvalidRate(rate));
        }
        if samples.is_empty() || (rate - 1.0).abs() < 1e-9 {
            return Ok(samples.to_vec());
        }

        let segment = self.segment_len(sample_rate);
        if samples.len() < segment {
            return Err(ProcessError::InputTooShort {
                provided: samples.len(),
                minimum: segment,
            });
        }

        let hop = segment / 2;
        let search = (self.search_secs * sample_rate as f64).round() as usize;
        let window = hanning_window(segment);
        let last_start = samples.len() - segment;
        let target = stretched_len(samples.len(), rate);
        let mut output = vec![0.0f32; target + segment];

        // no fade-in on the first segment
        for (i, (out, &sample)) in output.iter_mut().zip(&samples[..segment]).enumerate() {
            let gain = if i < hop { 1.0 } else { window[i] };
            *out += sample * gain;
        }

        let mut previous = 0;
        for k in 1.. {
            let out_pos = k * hop;
            if out_pos >= target {
                break;
            }
            let nominal = (k as f64 * hop as f64 * rate).round() as usize;
            if nominal > last_start {
                break;
            }

            let template = &samples[previous + hop..previous + segment];
            let start = best_match(samples, template, nominal, search, last_start);
            for ((out, &sample), &gain) in output[out_pos..out_pos + segment]
                .iter_mut()
                .zip(&samples[start..start + segment])
                .zip(&window)
            {
                *out += sample * gain;
            }
            previous = start;
        }

        output.truncate(target);
        debug!(rate, input = samples.len(), output = output.len(), "stretched");
        Ok(output)
    }
}

/// Start position within `nominal ± search` whose opening best correlates with `template`.
fn best_match(
    samples: &[f32],
    template: &[f32],
    nominal: usize,
    search: usize,
    last_start: usize,
) -> usize {
    let from = nominal.saturating_sub(search);
    let to = (nominal + search).min(last_start);

    (from..=to)
        .map(|pos| {
            let correlation: f64 = samples[pos..pos + template.len()]
                .iter()
                .zip(template)
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum();
            (pos, correlation)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(nominal, |(pos, _)| pos)
}
