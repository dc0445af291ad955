//! Magnitude spectrum of the most recent processed block
//!
//! A lazy consumer of the engine's visualization tap: the control side calls
//! [`SpectrumAnalyzer::analyze`] at its own pace, never the audio thread.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Blocks whose peak is below this are treated as silence
const SILENCE_THRESHOLD: f32 = 1e-9;

/// One analyzed block
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies, 0 up to Nyquist
    pub frequencies: Vec<f32>,
    /// Magnitudes normalized so the largest is 1.0
    pub magnitudes: Vec<f32>,
}

impl Spectrum {
    /// Frequency of the strongest bin
    pub fn peak_frequency(&self) -> f32 {
        self.magnitudes
            .iter()
            .zip(&self.frequencies)
            .fold((0.0f32, 0.0f32), |best, (&m, &f)| if m > best.0 { (m, f) } else { best })
            .1
    }

    /// Normalized magnitude of the bin closest to `hz`
    pub fn magnitude_at(&self, hz: f32) -> f32 {
        self.frequencies
            .iter()
            .zip(&self.magnitudes)
            .min_by(|a, b| (a.0 - hz).abs().total_cmp(&(b.0 - hz).abs()))
            .map(|(_, &m)| m)
            .unwrap_or(0.0)
    }

    /// Mean normalized magnitude per band, for a coarse text display
    pub fn bands(&self, count: usize) -> Vec<f32> {
        if count == 0 || self.magnitudes.is_empty() {
            return Vec::new();
        }
        let per_band = self.magnitudes.len().div_ceil(count);
        self.magnitudes
            .chunks(per_band)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    }
}

/// Real-input FFT analyzer
///
/// The plan is cached and rebuilt only when the block length changes.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    planner: FftPlanner<f32>,
    fft: Option<Arc<dyn Fft<f32>>>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: FftPlanner::new(),
            fft: None,
            buffer: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Spectrum of `block`, or `None` when it is empty or silent
    pub fn analyze(&mut self, block: &[f32]) -> Option<Spectrum> {
        let peak = block.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        if block.is_empty() || peak <= SILENCE_THRESHOLD {
            return None;
        }

        let len = block.len();
        let fft = match &self.fft {
            Some(fft) if fft.len() == len => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(len);
                self.fft = Some(Arc::clone(&fft));
                fft
            }
        };

        self.buffer.clear();
        self.buffer.extend(block.iter().map(|&x| Complex::new(x, 0.0)));
        fft.process(&mut self.buffer);

        // Only the non-negative frequencies of a real signal
        let bins = len / 2 + 1;
        let mut magnitudes: Vec<f32> = self.buffer[..bins].iter().map(|c| c.norm()).collect();
        let max = magnitudes.iter().fold(0.0f32, |m, &x| m.max(x));
        if max > 0.0 {
            magnitudes.iter_mut().for_each(|m| *m /= max);
        }

        let resolution = self.sample_rate as f32 / len as f32;
        let frequencies = (0..bins).map(|i| i as f32 * resolution).collect();

        Some(Spectrum {
            frequencies,
            magnitudes,
        })
    }
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("fft_len", &self.fft.as_ref().map(|fft| fft.len()))
            .finish()
    }
}
