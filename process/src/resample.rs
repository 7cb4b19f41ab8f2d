use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, instrument};

use crate::error::{ProcessError, Result};

/// Converts a mono signal from `from_rate` to `to_rate`.
///
/// The whole signal is processed as one chunk, so the output length is
/// `round(len * to_rate / from_rate)`.
#[instrument(skip(samples), fields(len = samples.len()), level = "trace")]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(ProcessError::Resample(format!(
            "cannot resample between {from_rate} Hz and {to_rate} Hz"
        )));
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| ProcessError::Resample(e.to_string()))?;

    let planar = vec![samples.to_vec()];
    let mut output = resampler
        .process(&planar, None)
        .map_err(|e| ProcessError::Resample(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();

    let expected = (samples.len() as f64 * ratio).round() as usize;
    output.resize(expected, 0.0);
    debug!(from_rate, to_rate, frames = output.len(), "resampled");
    Ok(output)
}
