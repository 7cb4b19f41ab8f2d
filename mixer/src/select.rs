use std::collections::HashSet;

use catalog::{Role, StemCatalog, StemId};
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, instrument};

use crate::error::Invalidity;

/// Requested number of stems per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StemCounts {
    pub total: usize,
    pub percussive: usize,
    pub harmonic: usize,
}

impl StemCounts {
    /// A split that does not add up to `total` is replaced by
    /// `harmonic = total / 2`, `percussive = total - harmonic`.
    pub fn reconcile(total: usize, percussive: usize, harmonic: usize) -> Self {
        if percussive + harmonic == total {
            return Self {
                total,
                percussive,
                harmonic,
            };
        }
        let harmonic = total / 2;
        Self {
            total,
            percussive: total - harmonic,
            harmonic,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedStem {
    pub id: StemId,
    pub role: Role,
    pub tempo: Option<f64>,
    pub instrument: Option<String>,
}

/// Stems chosen for one attempt. The first entry is the base stem.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSet {
    pub stems: Vec<SelectedStem>,
    pub tempo_bin: u32,
    /// Tempo of the base stem; every other stem is stretched to it.
    pub base_tempo: f64,
}

impl SelectionSet {
    pub fn base(&self) -> &SelectedStem {
        &self.stems[0]
    }

    pub fn ids(&self) -> Vec<StemId> {
        self.stems.iter().map(|stem| stem.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

/// Draws a tempo-compatible, instrument-distinct combination of stems.
pub struct TrackSelector<'a> {
    catalog: &'a StemCatalog,
    counts: StemCounts,
}

impl<'a> TrackSelector<'a> {
    pub fn new(catalog: &'a StemCatalog, n_stems: usize, n_percussive: usize, n_harmonic: usize) -> Self {
        Self {
            catalog,
            counts: StemCounts::reconcile(n_stems, n_percussive, n_harmonic),
        }
    }

    pub fn counts(&self) -> StemCounts {
        self.counts
    }

    /// Picks a bin holding the leading role (percussive whenever any is
    /// requested), then draws each role's stems from it without replacement.
    #[instrument(skip_all, level = "trace")]
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SelectionSet, Invalidity> {
        let index = self.catalog.index_by_tempo_bin();
        let leading = if self.counts.percussive > 0 {
            Role::Percussive
        } else {
            Role::Harmonic
        };
        let tempo_bin = *index
            .bins_with(leading)
            .choose(rng)
            .ok_or(Invalidity::NoCandidateBin { role: leading })?;

        let mut stems = Vec::with_capacity(self.counts.total);
        for (role, wanted) in [
            (Role::Percussive, self.counts.percussive),
            (Role::Harmonic, self.counts.harmonic),
        ] {
            if wanted == 0 {
                continue;
            }
            let candidates = index.candidates(tempo_bin, role);
            if candidates.is_empty() {
                return Err(Invalidity::EmptyTempoBin { bin: tempo_bin, role });
            }
            if candidates.len() < wanted {
                return Err(Invalidity::NotEnoughCandidates {
                    bin: tempo_bin,
                    role,
                    wanted,
                    available: candidates.len(),
                });
            }
            stems.extend(
                candidates
                    .choose_multiple(rng, wanted)
                    .filter_map(|id| self.catalog.get(id))
                    .map(|record| SelectedStem {
                        id: record.id.clone(),
                        role,
                        tempo: record.tempo(),
                        instrument: record.instrument.clone(),
                    }),
            );
        }

        check_instruments(&stems)?;
        if stems.len() != self.counts.total {
            return Err(Invalidity::WrongStemCount {
                expected: self.counts.total,
                selected: stems.len(),
            });
        }

        let base = &stems[0];
        let base_tempo = base
            .tempo
            .filter(|tempo| tempo.is_finite() && *tempo > 0.0)
            .ok_or_else(|| Invalidity::MissingTempo {
                stem: base.id.clone(),
            })?;

        debug!(tempo_bin, base_tempo, stems = ?stems.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), "selected stems");
        Ok(SelectionSet {
            stems,
            tempo_bin,
            base_tempo,
        })
    }
}

/// Known instrument names must be pairwise distinct, compared exactly as
/// stored.
fn check_instruments(stems: &[SelectedStem]) -> Result<(), Invalidity> {
    let mut seen = HashSet::new();
    for instrument in stems.iter().filter_map(|stem| stem.instrument.as_deref()) {
        if !seen.insert(instrument) {
            return Err(Invalidity::InstrumentCollision {
                instrument: instrument.to_string(),
            });
        }
    }
    Ok(())
}
