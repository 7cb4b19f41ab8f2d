use std::collections::BTreeMap;

use crate::models::{Role, StemId, StemRecord};

/// Stems grouped by tempo bin, then by selection role.
///
/// Bins and candidate lists are kept in sorted order so that a seeded draw
/// over the index is reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempoBinIndex {
    bins: BTreeMap<u32, BTreeMap<Role, Vec<StemId>>>,
}

impl TempoBinIndex {
    /// Records without a tempo bin or a selectable sound class are left out.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a StemRecord>) -> Self {
        let mut bins: BTreeMap<u32, BTreeMap<Role, Vec<StemId>>> = BTreeMap::new();
        for record in records {
            let (Some(bin), Some(role)) = (record.tempo_bin, record.role()) else {
                continue;
            };
            bins.entry(bin)
                .or_default()
                .entry(role)
                .or_default()
                .push(record.id.clone());
        }
        for ids in bins.values_mut().flat_map(|roles| roles.values_mut()) {
            ids.sort();
            ids.dedup();
        }
        Self { bins }
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Every populated bin, ascending.
    pub fn bins(&self) -> impl Iterator<Item = u32> + '_ {
        self.bins.keys().copied()
    }

    /// Bins holding at least one stem of `role`, ascending.
    pub fn bins_with(&self, role: Role) -> Vec<u32> {
        self.bins
            .iter()
            .filter(|(_, roles)| roles.get(&role).is_some_and(|ids| !ids.is_empty()))
            .map(|(&bin, _)| bin)
            .collect()
    }

    /// Stems of `role` in `bin`; empty when the bin or role is absent.
    pub fn candidates(&self, bin: u32, role: Role) -> &[StemId] {
        self.bins
            .get(&bin)
            .and_then(|roles| roles.get(&role))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of indexed stems.
    pub fn len(&self) -> usize {
        self.bins
            .values()
            .flat_map(|roles| roles.values())
            .map(Vec::len)
            .sum()
    }
}
