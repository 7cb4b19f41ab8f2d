use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};

pub mod error;
pub mod index;
pub mod models;

pub use error::{CatalogError, Result};
pub use index::TempoBinIndex;
pub use models::{
    tempo_bin, Derived, DerivedField, MetadataDocument, Role, SoundClass, StemId, StemRecord,
};

/// Every stem record of a corpus plus the tempo-bin index over them.
///
/// Read-only once loaded, so one catalog can back any number of concurrent
/// mixing runs.
#[derive(Debug, Default)]
pub struct StemCatalog {
    records: BTreeMap<StemId, StemRecord>,
    index: TempoBinIndex,
    rejected: Vec<CatalogError>,
}

impl StemCatalog {
    /// Loads every `.json` document in `dir`.
    #[instrument(level = "debug")]
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|source| CatalogError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(Self::load(paths))
    }

    /// Parses one document per path. A malformed document is logged, kept in
    /// [`rejected`](Self::rejected) and skipped; it never aborts the load.
    pub fn load<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut records = BTreeMap::new();
        let mut rejected = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let record = match parse_record(path) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping stem");
                    rejected.push(e);
                    continue;
                }
            };
            if records.contains_key(&record.id) {
                let e = CatalogError::MalformedMetadata {
                    path: path.to_path_buf(),
                    reason: format!("duplicate stem name {}", record.id),
                };
                warn!(error = %e, "skipping stem");
                rejected.push(e);
                continue;
            }
            debug!(id = %record.id, bin = ?record.tempo_bin, class = ?record.sound_class, "loaded stem");
            records.insert(record.id.clone(), record);
        }

        let index = TempoBinIndex::build(records.values());
        let unresolved = records
            .values()
            .filter(|record| record.tempo.is_permanently_unknown())
            .count();
        info!(
            loaded = records.len(),
            rejected = rejected.len(),
            indexed = index.len(),
            unresolved,
            "loaded stem catalog"
        );
        Self {
            records,
            index,
            rejected,
        }
    }

    pub fn get(&self, id: &StemId) -> Option<&StemRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &StemRecord> {
        self.records.values()
    }

    pub fn index_by_tempo_bin(&self) -> &TempoBinIndex {
        &self.index
    }

    pub fn rejected(&self) -> &[CatalogError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Location of the metadata document belonging to an audio file.
pub fn metadata_path_for(audio_path: &Path) -> PathBuf {
    audio_path.with_extension("json")
}

/// The audio file sharing `metadata_path`'s base name, if any.
pub fn find_audio(metadata_path: &Path) -> Option<PathBuf> {
    process::AUDIO_EXTENSIONS
        .iter()
        .map(|ext| metadata_path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

pub fn read_document(path: &Path) -> Result<MetadataDocument> {
    let text = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| CatalogError::MalformedMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes `document` with `tempo_bin` derived from its tempo.
pub fn write_document(path: &Path, document: &MetadataDocument) -> Result<()> {
    let mut document = document.clone();
    document.tempo_bin = document.tempo.and_then(tempo_bin);
    let text = serde_json::to_string_pretty(&document).map_err(|source| CatalogError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and validates one stem's metadata document.
pub fn parse_record(path: &Path) -> Result<StemRecord> {
    let document = read_document(path)?;

    let id = match document.stem_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => StemId::new(name),
        _ => {
            return Err(CatalogError::MalformedMetadata {
                path: path.to_path_buf(),
                reason: "missing stem_name".to_string(),
            })
        }
    };
    let tempo = document.tempo();
    let sound_class = match document.sound_class() {
        Derived::Computed(class) => class,
        Derived::PermanentlyUnknown => SoundClass::Undetermined,
        Derived::Unknown => SoundClass::Unknown,
    };

    Ok(StemRecord {
        id,
        tempo_bin: tempo.value().copied().and_then(tempo_bin),
        tempo,
        sound_class,
        instrument: document.instrument_name,
        key: document.key,
        metadata_path: path.to_path_buf(),
        audio_path: find_audio(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn malformed_documents_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "kick.json",
            r#"{"stem_name": "kick", "tempo": 78.0, "sound_class": "percussive", "instrument_name": "drumA"}"#,
        );
        write(dir.path(), "broken.json", r#"{"stem_name": "broken", "tempo": "#);
        write(dir.path(), "nameless.json", r#"{"tempo": 90.0}"#);
        write(dir.path(), "typed.json", r#"{"stem_name": "typed", "key": 5}"#);
        write(dir.path(), "notes.txt", "not metadata");

        let catalog = StemCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.rejected().len(), 3);
        assert!(catalog
            .rejected()
            .iter()
            .all(|e| matches!(e, CatalogError::MalformedMetadata { .. })));

        let kick = catalog.get(&StemId::from("kick")).unwrap();
        assert_eq!(kick.tempo_bin, Some(80));
        assert_eq!(kick.instrument.as_deref(), Some("drumA"));
    }

    #[test]
    fn duplicate_names_keep_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.json", r#"{"stem_name": "same", "tempo": 100.0}"#);
        let b = write(dir.path(), "b.json", r#"{"stem_name": "same", "tempo": 120.0}"#);

        let catalog = StemCatalog::load([a, b]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.rejected().len(), 1);
        assert_eq!(catalog.get(&StemId::from("same")).unwrap().tempo(), Some(100.0));
    }

    #[test]
    fn index_excludes_unknown_tempo_and_class() {
        let dir = tempfile::tempdir().unwrap();
        let paths = [
            write(dir.path(), "a.json", r#"{"stem_name": "a", "tempo": null, "sound_class": "harmonic"}"#),
            write(dir.path(), "b.json", r#"{"stem_name": "b", "tempo": 100.0}"#),
            write(dir.path(), "c.json", r#"{"stem_name": "c", "tempo": 100.0, "sound_class": "undetermined"}"#),
            write(dir.path(), "d.json", r#"{"stem_name": "d", "tempo": 100.0, "sound_class": "vocal"}"#),
        ];
        let catalog = StemCatalog::load(paths);
        assert_eq!(catalog.len(), 4);

        let index = catalog.index_by_tempo_bin();
        assert_eq!(index.len(), 1);
        assert_eq!(index.candidates(100, Role::Harmonic), &[StemId::from("d")]);
    }

    #[test]
    fn audio_sibling_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let json = write(dir.path(), "loop.json", r#"{"stem_name": "loop", "tempo": 120.0}"#);
        assert_eq!(parse_record(&json).unwrap().audio_path, None);

        fs::write(dir.path().join("loop.mp3"), b"").unwrap();
        assert_eq!(
            parse_record(&json).unwrap().audio_path,
            Some(dir.path().join("loop.mp3"))
        );
    }

    #[test]
    fn written_documents_carry_a_derived_bin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        let mut document = MetadataDocument {
            stem_name: Some("x".to_string()),
            tempo: Some(81.0),
            sound_class: Some(SoundClass::Harmonic),
            ..Default::default()
        };
        document.mark_unresolved(DerivedField::Key);
        write_document(&path, &document).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["tempo_bin"], 85);
        assert_eq!(raw["sound_class"], "harmonic");
        assert_eq!(raw["unresolved"][0], "key");

        let record = parse_record(&path).unwrap();
        assert_eq!(record.tempo_bin, Some(85));
        assert_eq!(record.sound_class, SoundClass::Harmonic);
    }
}
