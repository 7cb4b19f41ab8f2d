use std::{
    io, mem,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use catalog::{StemId, StemRecord};
use lru::LruCache;
use process::ProcessError;
use tracing::{debug, instrument, trace};

/// Default bound on decoded audio kept in memory, in MiB.
pub const DEFAULT_CACHE_MB: usize = 512;

/// Produces a stem's mono samples at a given rate.
pub trait StemLoader: Send + Sync {
    fn load(&self, path: &Path, sample_rate: u32) -> process::Result<Vec<f32>>;
}

/// Decodes from disk, resamples and peak-normalizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl StemLoader for FileLoader {
    fn load(&self, path: &Path, sample_rate: u32) -> process::Result<Vec<f32>> {
        let mut samples = process::load_mono(path, sample_rate)?;
        process::normalize_peak(&mut samples);
        Ok(samples)
    }
}

fn byte_len(samples: &[f32]) -> usize {
    mem::size_of_val(samples)
}

struct Cached {
    entries: LruCache<StemId, Arc<[f32]>>,
    bytes: usize,
}

/// Decoded stem audio, loaded on first use and shared afterwards.
///
/// The cache holds at most `budget` bytes of samples; the least recently
/// used stems are dropped first. A stem larger than the whole budget is
/// never cached.
pub struct AudioStore {
    loader: Box<dyn StemLoader>,
    sample_rate: u32,
    budget: usize,
    cache: Mutex<Cached>,
}

impl AudioStore {
    pub fn new(loader: impl StemLoader + 'static, sample_rate: u32) -> Self {
        Self {
            loader: Box::new(loader),
            sample_rate,
            budget: DEFAULT_CACHE_MB * 1024 * 1024,
            cache: Mutex::new(Cached {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    pub fn with_budget(mut self, bytes: usize) -> Self {
        self.budget = bytes;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes of samples currently cached.
    pub fn cached_bytes(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).bytes
    }

    pub fn cached_stems(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[instrument(skip(self, record), fields(id = %record.id), level = "trace")]
    pub fn audio(&self, record: &StemRecord) -> process::Result<Arc<[f32]>> {
        if let Some(samples) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(&record.id)
        {
            return Ok(samples.clone());
        }

        let path = record
            .audio_path
            .as_deref()
            .ok_or_else(|| ProcessError::AudioRead {
                path: record.metadata_path.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no audio file beside metadata"),
            })?;
        let samples: Arc<[f32]> = self.loader.load(path, self.sample_rate)?.into();
        debug!(frames = samples.len(), "loaded stem audio");

        self.insert(&record.id, &samples);
        Ok(samples)
    }

    fn insert(&self, id: &StemId, samples: &Arc<[f32]>) {
        let size = byte_len(samples);
        if size > self.budget {
            return;
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(replaced) = cache.entries.put(id.clone(), samples.clone()) {
            cache.bytes -= byte_len(&replaced);
        }
        cache.bytes += size;
        while cache.bytes > self.budget {
            let Some((evicted, dropped)) = cache.entries.pop_lru() else {
                break;
            };
            cache.bytes -= byte_len(&dropped);
            trace!(id = %evicted, "evicted stem audio");
        }
    }
}
