use catalog::{StemCatalog, StemId};
use process::{stretched_len, TimeStretcher};
use tracing::{debug, instrument, warn};

use crate::{
    error::Invalidity,
    select::SelectionSet,
    store::AudioStore,
};

/// One stem played back at the selection's base tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct StretchedStem {
    pub id: StemId,
    /// Playback speed factor, `base_tempo / stem_tempo`.
    pub rate: f64,
    pub original_len: usize,
    pub samples: Vec<f32>,
}

/// Brings every selected stem to the base stem's tempo.
pub struct TempoAligner<'a> {
    catalog: &'a StemCatalog,
    store: &'a AudioStore,
    stretcher: &'a dyn TimeStretcher,
}

impl<'a> TempoAligner<'a> {
    pub fn new(catalog: &'a StemCatalog, store: &'a AudioStore, stretcher: &'a dyn TimeStretcher) -> Self {
        Self {
            catalog,
            store,
            stretcher,
        }
    }

    /// Returns one buffer per selected stem, in selection order. The base stem
    /// is copied through unchanged.
    #[instrument(skip_all, fields(base_tempo = selection.base_tempo), level = "debug")]
    pub fn run(&self, selection: &SelectionSet) -> Result<Vec<StretchedStem>, Invalidity> {
        let mut stretched = Vec::with_capacity(selection.len());

        for (i, stem) in selection.stems.iter().enumerate() {
            let missing_tempo = || Invalidity::MissingTempo {
                stem: stem.id.clone(),
            };
            let record = self.catalog.get(&stem.id).ok_or_else(missing_tempo)?;
            let tempo = record
                .tempo()
                .filter(|tempo| tempo.is_finite() && *tempo > 0.0)
                .ok_or_else(missing_tempo)?;

            let audio = self.store.audio(record).map_err(|e| {
                warn!(id = %stem.id, error = %e, "cannot load stem audio");
                Invalidity::AudioUnavailable {
                    stem: stem.id.clone(),
                }
            })?;

            let rate = if i == 0 { 1.0 } else { selection.base_tempo / tempo };
            let samples = self
                .stretcher
                .stretch(&audio, self.store.sample_rate(), rate)
                .map_err(|e| {
                    warn!(id = %stem.id, rate, error = %e, "stretch failed");
                    Invalidity::StretchFailed {
                        stem: stem.id.clone(),
                    }
                })?;
            if samples.is_empty() {
                return Err(Invalidity::EmptyBuffer);
            }

            debug!(
                id = %stem.id,
                tempo,
                rate,
                from = audio.len(),
                to = samples.len(),
                expected = stretched_len(audio.len(), rate),
                "stretched stem"
            );
            stretched.push(StretchedStem {
                id: stem.id.clone(),
                rate,
                original_len: audio.len(),
                samples,
            });
        }

        if stretched.len() != selection.len() {
            return Err(Invalidity::LostBuffer {
                expected: selection.len(),
                produced: stretched.len(),
            });
        }
        Ok(stretched)
    }
}
