use std::{
    fs, io,
    ops::Range,
    path::{Path, PathBuf},
};

use catalog::StemId;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    align::AlignedStem,
    error::{Invalidity, MixError, Result},
};

/// Fixed-length stems and their sum, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Mixture {
    pub stems: Vec<(StemId, Vec<f32>)>,
    /// Sample-wise sum of `stems`. Not normalized, may exceed ±1.0.
    pub mix: Vec<f32>,
    /// Window taken from every aligned buffer.
    pub window: Range<usize>,
}

/// A mixture on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenMixture {
    pub id: Uuid,
    pub dir: PathBuf,
    pub stems: Vec<StemId>,
}

/// `len` samples centered on the middle of `min_length`.
pub fn centered_window(min_length: usize, len: usize) -> Option<Range<usize>> {
    let start = min_length.checked_sub(len)? / 2;
    Some(start..start + len)
}

pub struct MixtureAssembler {
    output_dir: PathBuf,
    sample_rate: u32,
    window_len: usize,
}

impl MixtureAssembler {
    pub fn new(output_dir: impl Into<PathBuf>, sample_rate: u32, window_len: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            sample_rate,
            window_len,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Cuts the same centered window from every buffer and sums them.
    #[instrument(skip_all, level = "debug")]
    pub fn assemble(&self, aligned: Vec<AlignedStem>) -> std::result::Result<Mixture, Invalidity> {
        let min_length = aligned
            .iter()
            .map(|stem| stem.samples.len())
            .min()
            .ok_or(Invalidity::EmptyBuffer)?;
        let window =
            centered_window(min_length, self.window_len).ok_or(Invalidity::InsufficientMaterial {
                available: min_length,
                needed: self.window_len,
            })?;

        let mut mix = vec![0.0f32; self.window_len];
        let mut stems = Vec::with_capacity(aligned.len());
        for stem in aligned {
            let truncated = stem.samples[window.clone()].to_vec();
            if truncated.is_empty() {
                return Err(Invalidity::EmptyBuffer);
            }
            for (out, sample) in mix.iter_mut().zip(&truncated) {
                *out += sample;
            }
            stems.push((stem.id, truncated));
        }

        debug!(min_length, start = window.start, end = window.end, "assembled mixture");
        Ok(Mixture { stems, mix, window })
    }

    /// Writes `stem1.wav`..`stemN.wav` and `mixture.wav` into a fresh
    /// directory named by a random identifier. On failure the directory is
    /// removed again.
    pub fn persist(&self, mixture: &Mixture) -> Result<WrittenMixture> {
        self.persist_with(mixture, process::write_wav)
    }

    #[instrument(skip_all, level = "debug")]
    fn persist_with<W>(&self, mixture: &Mixture, write: W) -> Result<WrittenMixture>
    where
        W: Fn(&Path, &[f32], u32) -> process::Result<()>,
    {
        fs::create_dir_all(&self.output_dir).map_err(|source| MixError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })?;
        let (id, dir) = self.create_mixture_dir()?;

        let written = mixture
            .stems
            .iter()
            .enumerate()
            .try_for_each(|(k, (_, samples))| {
                write(&dir.join(format!("stem{}.wav", k + 1)), samples, self.sample_rate)
            })
            .and_then(|()| write(&dir.join("mixture.wav"), &mixture.mix, self.sample_rate));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %cleanup, "cannot remove partial mixture");
            }
            return Err(e.into());
        }

        let stems: Vec<StemId> = mixture.stems.iter().map(|(id, _)| id.clone()).collect();
        info!(%id, dir = %dir.display(), stems = ?stems.iter().map(StemId::as_str).collect::<Vec<_>>(), "wrote mixture");
        Ok(WrittenMixture { id, dir, stems })
    }

    fn create_mixture_dir(&self) -> Result<(Uuid, PathBuf)> {
        loop {
            let id = Uuid::new_v4();
            let dir = self.output_dir.join(id.to_string());
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(MixError::CreateDir { path: dir, source }),
            }
        }
    }
}
