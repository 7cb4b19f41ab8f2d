use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use rustfft::{FftNum, FftPlanner};
use tracing::instrument;

pub trait Float: FftNum + num_traits::Float {}
impl Float for f32 {}
impl Float for f64 {}

/// One row per analysis frame, `fft_len / 2` magnitude bins per row.
pub type Spectrogram<T> = Vec<Vec<T>>;

#[derive(Clone)]
pub struct SpectrogramGenerator<T: Float> {
    planner: Arc<Mutex<FftPlanner<T>>>,
    hanns: Arc<RwLock<HashMap<usize, Arc<Vec<f32>>>>>,
}

impl<T: Float> Default for SpectrogramGenerator<T> {
    fn default() -> Self {
        Self {
            planner: Arc::new(Mutex::new(FftPlanner::new())),
            hanns: Default::default(),
        }
    }
}

impl<T: Float> SpectrogramGenerator<T> {
    /// Magnitude spectrogram of `samples`.
    ///
    /// When `config.center` is set the signal is padded with `fft_len / 2`
    /// zeros on both sides so frame `i` is centred on sample `i * hop`.
    #[instrument(skip(self, samples), level = "trace")]
    pub fn run(&self, samples: &[f32], config: &SpectrogramConfig) -> Spectrogram<T> {
        let fft_len = config.fft_len;
        if fft_len < 2 {
            return Vec::new();
        }

        let padded;
        let samples = if config.center {
            let pad = fft_len / 2;
            let mut buf = vec![0.0; samples.len() + 2 * pad];
            buf[pad..pad + samples.len()].copy_from_slice(samples);
            padded = buf;
            padded.as_slice()
        } else {
            samples
        };
        if samples.len() < fft_len {
            return Vec::new();
        }

        let fft = self
            .planner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .plan_fft_forward(fft_len);
        let hann = self.get_hann(fft_len);
        let hann_slice = hann.as_slice();

        samples
            .windows(fft_len)
            .step_by(config.hop())
            .map(|window| {
                window
                    .iter()
                    .zip(hann_slice)
                    .map(|(sample, hann)| sample * hann)
                    .map(|scaled| {
                        num_complex::Complex::new(
                            T::from_f32(scaled).unwrap_or_else(T::zero),
                            T::zero(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .map(|mut window| {
                fft.process(window.as_mut_slice());
                window
            })
            .map(|complex| {
                complex
                    .into_iter()
                    // half the the fft is mirrored due to real inputs
                    .take(fft_len / 2)
                    .map(|val| val.norm_sqr().sqrt())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    }

    fn get_hann(&self, size: usize) -> Arc<Vec<f32>> {
        let read = self.hanns.read().unwrap_or_else(PoisonError::into_inner);

        match read.get(&size) {
            Some(hann) => hann.clone(),
            None => {
                drop(read);
                self.generate_hann(size)
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    fn generate_hann(&self, size: usize) -> Arc<Vec<f32>> {
        let hann = Arc::new(hanning_window(size));
        let mut write = self.hanns.write().unwrap_or_else(PoisonError::into_inner);
        write.insert(size, hann.clone());
        hann
    }
}

#[derive(Debug, Clone)]
pub struct SpectrogramConfig {
    pub fft_len: usize,
    pub overlap: usize,
    pub center: bool,
}

impl SpectrogramConfig {
    /// Samples between the starts of consecutive frames, never zero.
    pub fn hop(&self) -> usize {
        self.fft_len.saturating_sub(self.overlap).max(1)
    }

    /// Start time of frame `frame` in seconds (centre time when `center` is set).
    pub fn frame_time(&self, frame: usize, sample_rate: u32) -> f64 {
        (frame * self.hop()) as f64 / sample_rate as f64
    }
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            fft_len: 2048,
            overlap: 1536,
            center: true,
        }
    }
}

/// Periodic Hann window; overlapping copies at 50% hop sum to one.
pub fn hanning_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (std::f32::consts::TAU * (i as f32 / size as f32)).cos()))
        .collect()
}
