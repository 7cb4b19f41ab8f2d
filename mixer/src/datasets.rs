//! Metadata known from the naming conventions of public stem datasets.

use std::{fmt, path::Path, str::FromStr};

use catalog::{MetadataDocument, SoundClass};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Brazilian Rhythmic Instruments Dataset, `[GID#] MX-YY-ZZ.wav`.
    Brid,
    /// MUSDB18 stems saved as `artist - title - stem.wav`.
    Musdb,
}

impl Dataset {
    /// Fields implied by the file name of a stem, or `None` when the name does
    /// not follow the dataset's convention.
    pub fn prefill(self, audio_path: &Path) -> Option<MetadataDocument> {
        let name = audio_path.file_stem()?.to_str()?;
        match self {
            Dataset::Brid => brid(name),
            Dataset::Musdb => musdb(name),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Brid => f.write_str("brid"),
            Dataset::Musdb => f.write_str("musdb"),
        }
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brid" => Ok(Dataset::Brid),
            "musdb" => Ok(Dataset::Musdb),
            other => Err(format!("unsupported dataset {other:?}, expected brid or musdb")),
        }
    }
}

fn brid(name: &str) -> Option<MetadataDocument> {
    let fields: Vec<&str> = name.split('-').map(str::trim).collect();
    if fields.len() < 3 {
        return None;
    }
    // instrument code followed by the player number
    let code = fields[1].get(..2)?.to_ascii_uppercase();
    let instrument = match code.as_str() {
        "PD" => Some("pandeiro"),
        "TB" => Some("tamborim"),
        "RR" => Some("reco-reco"),
        "CX" => Some("caixa"),
        "RP" => Some("repique"),
        "CU" => Some("cuica"),
        "AG" => Some("agogo"),
        "SK" => Some("shaker"),
        "TT" => Some("tanta"),
        "SU" => Some("surdo"),
        _ => None,
    };
    let tempo = match fields[fields.len() - 1].to_ascii_uppercase().as_str() {
        "SA" => Some(80.0),
        "PA" => Some(100.0),
        "CA" => Some(65.0),
        "SE" => Some(130.0),
        "MA" => Some(120.0),
        _ => None,
    };
    if instrument.is_none() && tempo.is_none() {
        return None;
    }

    Some(MetadataDocument {
        tempo,
        sound_class: Some(SoundClass::Percussive),
        instrument_name: instrument.map(str::to_string),
        ..Default::default()
    })
}

fn musdb(name: &str) -> Option<MetadataDocument> {
    let stem = name.rsplit(" - ").next()?.trim().to_ascii_lowercase();
    if !name.contains(" - ") {
        return None;
    }
    let sound_class = match stem.as_str() {
        "vocals" => SoundClass::Vocal,
        "drums" => SoundClass::Percussive,
        "bass" | "other" => SoundClass::Harmonic,
        _ => return None,
    };

    Some(MetadataDocument {
        sound_class: Some(sound_class),
        instrument_name: (stem != "other").then_some(stem),
        ..Default::default()
    })
}
