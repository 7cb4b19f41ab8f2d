use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Width of a tempo bin in BPM.
pub const TEMPO_BIN_WIDTH: f64 = 5.0;

/// Rounds a tempo up to the next multiple of five BPM.
/// Non-finite and non-positive tempos have no bin.
pub fn tempo_bin(tempo: f64) -> Option<u32> {
    if !tempo.is_finite() || tempo <= 0.0 {
        return None;
    }
    Some(((tempo / TEMPO_BIN_WIDTH).ceil() * TEMPO_BIN_WIDTH) as u32)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StemId(String);

impl StemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundClass {
    Percussive,
    Harmonic,
    #[serde(alias = "vocals")]
    Vocal,
    Undetermined,
    #[serde(skip)]
    Unknown,
}

/// Accepts the stored names; `unknown` is not a value a user can assign.
impl FromStr for SoundClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percussive" => Ok(SoundClass::Percussive),
            "harmonic" => Ok(SoundClass::Harmonic),
            "vocal" | "vocals" => Ok(SoundClass::Vocal),
            "undetermined" => Ok(SoundClass::Undetermined),
            other => Err(format!("unknown sound class {other:?}")),
        }
    }
}

impl SoundClass {
    /// Selection group of the class. Vocals are drawn with harmonic stems;
    /// undetermined and unknown stems are never drawn.
    pub fn role(self) -> Option<Role> {
        match self {
            SoundClass::Percussive => Some(Role::Percussive),
            SoundClass::Harmonic | SoundClass::Vocal => Some(Role::Harmonic),
            SoundClass::Undetermined | SoundClass::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Percussive,
    Harmonic,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Percussive => f.write_str("percussive"),
            Role::Harmonic => f.write_str("harmonic"),
        }
    }
}

/// A field filled in by analysis.
///
/// `PermanentlyUnknown` marks a field analysis already gave up on, so it is
/// not recomputed on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Derived<T> {
    #[default]
    Unknown,
    Computed(T),
    PermanentlyUnknown,
}

impl<T> Derived<T> {
    pub fn from_stored(value: Option<T>, unresolved: bool) -> Self {
        match (value, unresolved) {
            (Some(value), _) => Derived::Computed(value),
            (None, true) => Derived::PermanentlyUnknown,
            (None, false) => Derived::Unknown,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Derived::Computed(value) => Some(value),
            _ => None,
        }
    }

    pub fn needs_computation(&self) -> bool {
        matches!(self, Derived::Unknown)
    }

    pub fn is_permanently_unknown(&self) -> bool {
        matches!(self, Derived::PermanentlyUnknown)
    }
}

/// Names of the derived fields, as listed in a document's `unresolved` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedField {
    Tempo,
    SoundClass,
    Key,
    InstrumentName,
}

/// On-disk metadata document, one per stem, stored next to the audio file.
///
/// Absent optional fields read as `null`; unrecognised keys are ignored.
/// `tempo_bin` is written for readers of the file but recomputed on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub stem_name: Option<String>,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub sound_class: Option<SoundClass>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default, skip_deserializing)]
    pub tempo_bin: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<DerivedField>,
}

impl MetadataDocument {
    pub fn is_unresolved(&self, field: DerivedField) -> bool {
        self.unresolved.contains(&field)
    }

    pub fn mark_unresolved(&mut self, field: DerivedField) {
        if !self.is_unresolved(field) {
            self.unresolved.push(field);
        }
    }

    pub fn tempo(&self) -> Derived<f64> {
        Derived::from_stored(self.tempo, self.is_unresolved(DerivedField::Tempo))
    }

    /// `undetermined` is the stored form of a class analysis could not decide.
    pub fn sound_class(&self) -> Derived<SoundClass> {
        match self.sound_class {
            Some(SoundClass::Undetermined) => Derived::PermanentlyUnknown,
            stored => Derived::from_stored(stored, self.is_unresolved(DerivedField::SoundClass)),
        }
    }
}

/// A validated catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StemRecord {
    pub id: StemId,
    pub tempo: Derived<f64>,
    pub tempo_bin: Option<u32>,
    pub sound_class: SoundClass,
    pub instrument: Option<String>,
    pub key: Option<String>,
    pub metadata_path: PathBuf,
    /// Sibling audio file with the same base name, if one exists.
    pub audio_path: Option<PathBuf>,
}

impl StemRecord {
    pub fn tempo(&self) -> Option<f64> {
        self.tempo.value().copied()
    }

    pub fn role(&self) -> Option<Role> {
        self.sound_class.role()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_class_names_parse() {
        assert_eq!("Percussive".parse(), Ok(SoundClass::Percussive));
        assert_eq!("vocals".parse(), Ok(SoundClass::Vocal));
        assert_eq!("undetermined".parse(), Ok(SoundClass::Undetermined));
        assert!("unknown".parse::<SoundClass>().is_err());
        assert!("drums".parse::<SoundClass>().is_err());
    }

    #[test]
    fn tempo_bins_round_up_to_five() {
        assert_eq!(tempo_bin(77.0), Some(80));
        assert_eq!(tempo_bin(80.0), Some(80));
        assert_eq!(tempo_bin(81.0), Some(85));
        assert_eq!(tempo_bin(0.4), Some(5));
        assert_eq!(tempo_bin(127.999), Some(130));
    }

    #[test]
    fn unusable_tempos_have_no_bin() {
        assert_eq!(tempo_bin(0.0), None);
        assert_eq!(tempo_bin(-90.0), None);
        assert_eq!(tempo_bin(f64::NAN), None);
        assert_eq!(tempo_bin(f64::INFINITY), None);
    }

    #[test]
    fn vocals_select_as_harmonic() {
        assert_eq!(SoundClass::Vocal.role(), Some(Role::Harmonic));
        assert_eq!(SoundClass::Harmonic.role(), Some(Role::Harmonic));
        assert_eq!(SoundClass::Percussive.role(), Some(Role::Percussive));
        assert_eq!(SoundClass::Undetermined.role(), None);
        assert_eq!(SoundClass::Unknown.role(), None);
    }

    #[test]
    fn absent_and_null_fields_read_as_unknown() {
        let document: MetadataDocument =
            serde_json::from_str(r#"{"stem_name": "a", "tempo": null, "data_home": "/x"}"#)
                .unwrap();
        assert_eq!(document.tempo(), Derived::Unknown);
        assert_eq!(document.sound_class(), Derived::Unknown);
        assert_eq!(document.instrument_name, None);
    }

    #[test]
    fn unresolved_fields_are_permanently_unknown() {
        let document: MetadataDocument = serde_json::from_str(
            r#"{"stem_name": "a", "sound_class": "undetermined", "unresolved": ["tempo"]}"#,
        )
        .unwrap();
        assert_eq!(document.tempo(), Derived::PermanentlyUnknown);
        assert_eq!(document.sound_class(), Derived::PermanentlyUnknown);
    }

    #[test]
    fn musdb_vocals_spelling_is_accepted() {
        let document: MetadataDocument =
            serde_json::from_str(r#"{"stem_name": "a", "sound_class": "vocals"}"#).unwrap();
        assert_eq!(document.sound_class, Some(SoundClass::Vocal));
    }

    #[test]
    fn stored_tempo_bin_is_not_trusted() {
        let document: MetadataDocument =
            serde_json::from_str(r#"{"stem_name": "a", "tempo": 81.0, "tempo_bin": 80}"#)
                .unwrap();
        assert_eq!(document.tempo_bin, None);
    }

    #[test]
    fn wrong_types_fail_to_parse() {
        assert!(serde_json::from_str::<MetadataDocument>(r#"{"stem_name": "a", "tempo": "fast"}"#)
            .is_err());
        assert!(
            serde_json::from_str::<MetadataDocument>(r#"{"stem_name": "a", "sound_class": 3}"#)
                .is_err()
        );
    }
}
