//! Builds fixed-length multi-stem mixtures from a catalog of analysed stems.
//!
//! An attempt selects tempo-compatible stems, stretches them to one tempo,
//! lines up their first downbeats and cuts a common window; see
//! [`MixtureOrchestrator`].

use std::sync::Arc;

use catalog::StemCatalog;

pub mod align;
pub mod assemble;
pub mod config;
pub mod datasets;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod select;
pub mod store;
pub mod tempo;

pub use align::{AlignedStem, BeatAligner};
pub use assemble::{centered_window, Mixture, MixtureAssembler, WrittenMixture};
pub use config::{AnchorPolicy, MixConfig};
pub use datasets::Dataset;
pub use error::{Invalidity, MixError, Result};
pub use extract::{audio_files, Analysis, ExtractionOutcome, MetadataExtractor, StemOverrides};
pub use orchestrator::{GenerationReport, MixtureOrchestrator};
pub use select::{SelectedStem, SelectionSet, StemCounts, TrackSelector};
pub use store::{AudioStore, FileLoader, StemLoader};
pub use tempo::{StretchedStem, TempoAligner};

/// Loads the catalog in `config.data_home` and runs one orchestrator over it.
pub fn generate(config: MixConfig) -> Result<GenerationReport> {
    config.validate()?;
    let catalog = Arc::new(StemCatalog::load_dir(&config.data_home)?);
    MixtureOrchestrator::new(catalog, config)?.run()
}
