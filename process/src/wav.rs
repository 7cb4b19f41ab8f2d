use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::instrument;

use crate::error::{ProcessError, Result};

/// Writes a mono 32-bit float WAV. Float samples are stored as-is, so a
/// signal outside ±1.0 is not clipped on disk.
#[instrument(skip(samples), fields(len = samples.len()), level = "trace")]
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let wrap = |source: hound::Error| ProcessError::WavWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = WavWriter::create(path, spec).map_err(wrap)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wrap)?;
    }
    writer.finalize().map_err(wrap)
}
