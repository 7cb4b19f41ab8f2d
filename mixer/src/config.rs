use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{MixError, Result},
    store::DEFAULT_CACHE_MB,
};

/// Which first downbeat the other stems are moved onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorPolicy {
    /// Every later stem loses the lead-in before its downbeat.
    #[default]
    Earliest,
    /// Every earlier stem is left-padded with silence.
    Latest,
}

impl FromStr for AnchorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(AnchorPolicy::Earliest),
            "latest" => Ok(AnchorPolicy::Latest),
            other => Err(format!("unknown anchor {other:?}, expected earliest or latest")),
        }
    }
}

/// Settings for one generation run.
///
/// Every field has a default, so a partial JSON document is a valid base
/// for command-line overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub data_home: PathBuf,
    /// Defaults to `<data_home>/../mixtures`.
    pub output_dir: Option<PathBuf>,
    pub sample_rate: u32,
    /// Mixture length in seconds.
    pub duration: f64,
    pub n_mixtures: usize,
    pub n_stems: usize,
    pub n_harmonic: usize,
    pub n_percussive: usize,
    pub seed: Option<u64>,
    /// Consecutive invalid attempts tolerated before giving up.
    pub max_attempts: usize,
    /// Per-attempt budget in seconds.
    pub attempt_timeout: Option<f64>,
    pub anchor: AnchorPolicy,
    /// Concurrent orchestrators sharing one catalog.
    pub jobs: usize,
    /// Decoded audio kept in memory across attempts, in MiB. Zero disables
    /// caching.
    pub audio_cache_mb: usize,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            data_home: PathBuf::from("."),
            output_dir: None,
            sample_rate: 44_100,
            duration: 5.0,
            n_mixtures: 5,
            n_stems: 3,
            n_harmonic: 0,
            n_percussive: 0,
            seed: None,
            max_attempts: 1000,
            attempt_timeout: None,
            anchor: AnchorPolicy::default(),
            jobs: 1,
            audio_cache_mb: DEFAULT_CACHE_MB,
        }
    }
}

impl MixConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MixError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| MixError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MixError::Config(msg));

        if !self.data_home.is_dir() {
            return fail(format!("{} is not a directory", self.data_home.display()));
        }
        if self.sample_rate == 0 {
            return fail("sample rate must be positive".to_string());
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return fail(format!("duration must be positive, got {}", self.duration));
        }
        if self.window_len() == 0 {
            return fail(format!(
                "duration {} s is shorter than one sample at {} Hz",
                self.duration, self.sample_rate
            ));
        }
        if self.n_mixtures == 0 {
            return fail("at least one mixture must be requested".to_string());
        }
        if self.n_stems == 0 {
            return fail("a mixture needs at least one stem".to_string());
        }
        if self.max_attempts == 0 {
            return fail("max attempts must be at least 1".to_string());
        }
        if let Some(timeout) = self.attempt_timeout {
            if !timeout.is_finite() || timeout <= 0.0 {
                return fail(format!("attempt timeout must be positive, got {timeout}"));
            }
        }
        if self.jobs == 0 {
            return fail("jobs must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_home.join("..").join("mixtures"))
    }

    /// Samples per output file: `round(duration * sample_rate)`.
    pub fn window_len(&self) -> usize {
        (self.duration * self.sample_rate as f64).round() as usize
    }

    pub fn audio_cache_bytes(&self) -> usize {
        self.audio_cache_mb.saturating_mul(1024 * 1024)
    }

    pub fn attempt_deadline(&self) -> Option<Duration> {
        self.attempt_timeout.map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MixConfig {
        MixConfig {
            data_home: std::env::temp_dir(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_validate() {
        valid().validate().unwrap();
        assert_eq!(valid().window_len(), 5 * 44_100);
        assert_eq!(valid().anchor, AnchorPolicy::Earliest);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            MixConfig { sample_rate: 0, ..valid() },
            MixConfig { duration: 0.0, ..valid() },
            MixConfig { duration: f64::NAN, ..valid() },
            MixConfig { n_mixtures: 0, ..valid() },
            MixConfig { n_stems: 0, ..valid() },
            MixConfig { max_attempts: 0, ..valid() },
            MixConfig { attempt_timeout: Some(-1.0), ..valid() },
            MixConfig { jobs: 0, ..valid() },
            MixConfig { data_home: PathBuf::from("/no/such/dir"), ..valid() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(MixError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn anchor_names_parse() {
        assert_eq!("earliest".parse(), Ok(AnchorPolicy::Earliest));
        assert_eq!("Latest".parse(), Ok(AnchorPolicy::Latest));
        assert!("middle".parse::<AnchorPolicy>().is_err());
    }

    #[test]
    fn output_dir_defaults_next_to_data_home() {
        let config = MixConfig {
            data_home: PathBuf::from("/corpus/stems"),
            ..Default::default()
        };
        assert_eq!(config.output_dir(), PathBuf::from("/corpus/stems/../mixtures"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.json");
        fs::write(&path, r#"{"data_home": "/corpus", "n_stems": 4, "anchor": "latest"}"#).unwrap();

        let config = MixConfig::from_json_file(&path).unwrap();
        assert_eq!(config.n_stems, 4);
        assert_eq!(config.anchor, AnchorPolicy::Latest);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.max_attempts, 1000);
        assert_eq!(config.audio_cache_bytes(), DEFAULT_CACHE_MB * 1024 * 1024);
    }
}
