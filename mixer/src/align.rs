use catalog::StemId;
use process::BeatTracker;
use tracing::{debug, instrument};

use crate::{config::AnchorPolicy, error::Invalidity, tempo::StretchedStem};

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedStem {
    pub id: StemId,
    /// First downbeat of the stretched buffer, in seconds.
    pub downbeat: f64,
    /// Samples added (positive) or removed (negative) at the front.
    pub shift: isize,
    pub samples: Vec<f32>,
}

/// Moves every stem so that all first downbeats share one sample offset.
pub struct BeatAligner<'a> {
    tracker: &'a dyn BeatTracker,
    policy: AnchorPolicy,
    sample_rate: u32,
}

impl<'a> BeatAligner<'a> {
    pub fn new(tracker: &'a dyn BeatTracker, policy: AnchorPolicy, sample_rate: u32) -> Self {
        Self {
            tracker,
            policy,
            sample_rate,
        }
    }

    #[instrument(skip_all, fields(policy = ?self.policy), level = "debug")]
    pub fn run(&self, stems: Vec<StretchedStem>) -> Result<Vec<AlignedStem>, Invalidity> {
        let mut downbeats = Vec::with_capacity(stems.len());
        for stem in &stems {
            let downbeat = self
                .tracker
                .first_downbeat(&stem.samples, self.sample_rate)
                .filter(|t| t.is_finite() && *t >= 0.0)
                .ok_or_else(|| Invalidity::NoDownbeat {
                    stem: stem.id.clone(),
                })?;
            downbeats.push(downbeat);
        }

        let anchor = match self.policy {
            AnchorPolicy::Earliest => downbeats.iter().copied().fold(f64::INFINITY, f64::min),
            AnchorPolicy::Latest => downbeats.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };

        let mut aligned = Vec::with_capacity(stems.len());
        for (stem, downbeat) in stems.into_iter().zip(downbeats) {
            let offset = ((downbeat - anchor).abs() * self.sample_rate as f64).round() as usize;
            let (shift, samples) = match self.policy {
                AnchorPolicy::Earliest => (-(offset as isize), trim_front(stem.samples, offset)),
                AnchorPolicy::Latest => (offset as isize, pad_front(stem.samples, offset)),
            };
            if samples.is_empty() {
                return Err(Invalidity::EmptyBuffer);
            }
            debug!(id = %stem.id, downbeat, anchor, shift, "aligned stem");
            aligned.push(AlignedStem {
                id: stem.id,
                downbeat,
                shift,
                samples,
            });
        }
        Ok(aligned)
    }
}

fn trim_front(mut samples: Vec<f32>, count: usize) -> Vec<f32> {
    samples.drain(..count.min(samples.len()));
    samples
}

fn pad_front(samples: Vec<f32>, count: usize) -> Vec<f32> {
    let mut padded = vec![0.0; count];
    padded.extend(samples);
    padded
}
