//! Real-time execution of second-order-section cascades
//!
//! This module provides:
//! - The [`Effect`] trait every in-place processor implements
//! - [`SosStage`], one biquad in Transposed Direct Form II
//! - [`SosCascade`], a chain of stages with streaming state
//! - [`zero_phase`], offline forward-backward filtering for export
//!
//! Hot-path rules:
//! - Zero allocations in `process`
//! - Coefficients and state registers are f64, samples are f32
//! - State persists across blocks so splitting a signal into blocks of
//!   any size yields the same output

use crate::domain::audio::{AudioError, Result};
use crate::domain::design::SosCoeffs;

/// Core trait for all in-place processors
///
/// Effects process mono f32 buffers in place.
pub trait Effect: Send + Sync {
    /// Process a buffer of audio samples in-place
    ///
    /// # Requirements
    /// - No allocations in the hot path
    /// - Handle buffer of any size, including empty
    fn process(&mut self, buffer: &mut [f32]) -> Result<()>;

    /// Reset state registers to zero
    fn reset(&mut self);
}

// ============================================================================
// SOS STAGE (one biquad, Transposed Direct Form II)
// ============================================================================

/// Single biquad with its two state registers
///
/// Transposed Direct Form II keeps two registers per section and has
/// good numerical behavior in floating point:
///
/// ```text
/// y  = b0*x + z1
/// z1 = b1*x - a1*y + z2
/// z2 = b2*x - a2*y
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SosStage {
    coeffs: SosCoeffs,
    z1: f64,
    z2: f64,
}

impl SosStage {
    pub fn new(coeffs: SosCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Start from explicit register values
    pub fn with_state(coeffs: SosCoeffs, z1: f64, z2: f64) -> Self {
        Self { coeffs, z1, z2 }
    }

    pub fn coeffs(&self) -> &SosCoeffs {
        &self.coeffs
    }

    /// Current (z1, z2)
    pub fn state(&self) -> (f64, f64) {
        (self.z1, self.z2)
    }

    /// Replace coefficients, keeping the registers
    pub fn set_coeffs(&mut self, coeffs: SosCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    /// Registers matching the steady state for a constant unit input
    pub fn step_state(coeffs: &SosCoeffs) -> (f64, f64) {
        let gain = coeffs.dc_gain();
        let z2 = coeffs.b2 - coeffs.a2 * gain;
        let z1 = coeffs.b1 - coeffs.a1 * gain + z2;
        (z1, z2)
    }
}

// ============================================================================
// SOS CASCADE
// ============================================================================

/// Chain of biquads sharing one stream
///
/// Each sample runs through every stage in f64 before being narrowed
/// back to f32.
#[derive(Debug, Clone, PartialEq)]
pub struct SosCascade {
    name: String,
    stages: Vec<SosStage>,
}

impl SosCascade {
    pub fn new(name: impl Into<String>, sections: &[SosCoeffs]) -> Self {
        Self {
            name: name.into(),
            stages: sections.iter().copied().map(SosStage::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[SosStage] {
        &self.stages
    }

    /// Copy of the current coefficients, one entry per stage
    pub fn coeffs(&self) -> Vec<SosCoeffs> {
        self.stages.iter().map(|s| s.coeffs).collect()
    }

    /// Swap coefficients in place without touching the state registers
    ///
    /// The section count must not change, so the call never allocates and
    /// is safe on the audio thread. Carrying the registers over keeps the
    /// output continuous across the swap.
    pub fn set_coeffs(&mut self, sections: &[SosCoeffs]) -> Result<()> {
        if sections.len() != self.stages.len() {
            return Err(AudioError::InvalidState(format!(
                "{}: expected {} sections, got {}",
                self.name,
                self.stages.len(),
                sections.len()
            )));
        }
        for (stage, coeffs) in self.stages.iter_mut().zip(sections) {
            stage.set_coeffs(*coeffs);
        }
        Ok(())
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let mut y = x as f64;
        for stage in self.stages.iter_mut() {
            y = stage.process_sample(y);
        }
        y as f32
    }

    /// Run `input` through the cascade into `output`
    ///
    /// Only the overlapping prefix of the two slices is processed.
    pub fn process_into(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x);
        }
    }

    /// Set every stage to the steady state for a constant input of `level`
    fn prime(&mut self, level: f64) {
        let mut scale = level;
        for stage in self.stages.iter_mut() {
            let (z1, z2) = SosStage::step_state(&stage.coeffs);
            stage.z1 = z1 * scale;
            stage.z2 = z2 * scale;
            scale *= stage.coeffs.dc_gain();
        }
    }
}

impl Effect for SosCascade {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
        Ok(())
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}

// ============================================================================
// ZERO-PHASE FILTERING (offline)
// ============================================================================

/// Number of samples reflected on each side before forward-backward filtering
pub fn zero_phase_padding(sections: &[SosCoeffs], len: usize) -> usize {
    let first_order = sections
        .iter()
        .filter(|s| s.b2 == 0.0 && s.a2 == 0.0)
        .count();
    let taps = 2 * sections.len() + 1 - first_order;
    (3 * taps).min(len.saturating_sub(1))
}

/// Forward-backward filtering with odd-extension padding
///
/// The signal is filtered once forward and once reversed, so the result
/// has zero phase distortion and squared magnitude response. Both passes
/// start from the steady state for the edge sample, which keeps the ends
/// free of start-up transients. Intended for offline export only: the
/// whole signal must be available.
pub fn zero_phase(sections: &[SosCoeffs], input: &[f32]) -> Vec<f32> {
    if input.is_empty() {
        return Vec::new();
    }

    let len = input.len();
    let pad = zero_phase_padding(sections, len);
    let first = input[0] as f64;
    let last = input[len - 1] as f64;

    let mut work: Vec<f64> = Vec::with_capacity(len + 2 * pad);
    work.extend((1..=pad).rev().map(|i| 2.0 * first - input[i] as f64));
    work.extend(input.iter().map(|&x| x as f64));
    work.extend((1..=pad).map(|i| 2.0 * last - input[len - 1 - i] as f64));

    let mut cascade = SosCascade::new("zero-phase", sections);
    for _ in 0..2 {
        cascade.prime(work[0]);
        for sample in work.iter_mut() {
            let mut y = *sample;
            for stage in cascade.stages.iter_mut() {
                y = stage.process_sample(y);
            }
            *sample = y;
        }
        work.reverse();
    }

    work[pad..pad + len].iter().map(|&y| y as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::design::{design, FilterSpec};
    use proptest::prelude::*;

    const SAMPLE_RATE: f32 = 44100.0;

    fn sine(samples: usize, frequency: f32, amplitude: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE).sin()
            })
            .collect()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|x| x * x).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    fn lowpass(order: u32, hz: f32) -> Vec<SosCoeffs> {
        design(&FilterSpec::lowpass(order, hz, SAMPLE_RATE)).unwrap()
    }

    // -------------------------------------------------------------------------
    // Stage Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_unity_stage_passes_through() {
        let mut stage = SosStage::new(SosCoeffs::UNITY);
        for x in [0.5, -0.3, 0.7] {
            assert_eq!(stage.process_sample(x), x);
        }
    }

    #[test]
    fn test_stage_impulse_response() {
        let coeffs = SosCoeffs {
            b0: 0.5,
            b1: 0.25,
            b2: 0.125,
            a1: -0.5,
            a2: 0.0,
        };
        let mut stage = SosStage::new(coeffs);
        let y: Vec<f64> = [1.0, 0.0, 0.0]
            .iter()
            .map(|&x| stage.process_sample(x))
            .collect();
        // y0 = 0.5, y1 = 0.25 + 0.5*0.5, y2 = 0.125 + 0.5*y1
        assert!((y[0] - 0.5).abs() < 1e-12);
        assert!((y[1] - 0.5).abs() < 1e-12);
        assert!((y[2] - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_step_state_is_steady() {
        for coeffs in lowpass(4, 3000.0) {
            let (z1, z2) = SosStage::step_state(&coeffs);
            let mut stage = SosStage::with_state(coeffs, z1, z2);
            let gain = coeffs.dc_gain();
            for _ in 0..16 {
                assert!((stage.process_sample(1.0) - gain).abs() < 1e-12);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cascade Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_cascade_passband_and_stopband() {
        let mut cascade = SosCascade::new("lowpass", &lowpass(4, 4000.0));

        let mut pass = sine(8192, 500.0, 0.5);
        cascade.process(&mut pass).unwrap();
        assert!((rms(&pass[4096..]) - 0.5 / 2.0_f32.sqrt()).abs() < 0.01);

        cascade.reset();
        let mut stop = sine(8192, 15000.0, 0.5);
        cascade.process(&mut stop).unwrap();
        assert!(rms(&stop[4096..]) < 0.005);
    }

    #[test]
    fn test_cascade_reset_clears_state() {
        let mut cascade = SosCascade::new("lowpass", &lowpass(2, 1000.0));
        let mut buffer = vec![1.0; 64];
        cascade.process(&mut buffer).unwrap();
        assert!(cascade.stages().iter().any(|s| s.state() != (0.0, 0.0)));

        cascade.reset();
        assert!(cascade.stages().iter().all(|s| s.state() == (0.0, 0.0)));

        let mut silence = vec![0.0; 64];
        cascade.process(&mut silence).unwrap();
        assert!(silence.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_set_coeffs_keeps_state() {
        let mut cascade = SosCascade::new("custom", &lowpass(2, 4000.0));
        let mut buffer = sine(512, 200.0, 0.5);
        cascade.process(&mut buffer).unwrap();
        let before = cascade.stages()[0].state();

        cascade.set_coeffs(&lowpass(2, 2000.0)).unwrap();
        assert_eq!(cascade.stages()[0].state(), before);
        assert_eq!(cascade.coeffs(), lowpass(2, 2000.0));
    }

    #[test]
    fn test_set_coeffs_rejects_count_mismatch() {
        let mut cascade = SosCascade::new("custom", &lowpass(2, 4000.0));
        assert!(matches!(
            cascade.set_coeffs(&lowpass(4, 4000.0)),
            Err(AudioError::InvalidState(_))
        ));
    }

    #[test]
    fn test_empty_buffer() {
        let mut cascade = SosCascade::new("lowpass", &lowpass(2, 1000.0));
        let mut empty: Vec<f32> = Vec::new();
        assert!(cascade.process(&mut empty).is_ok());
    }

    proptest! {
        #[test]
        fn prop_block_splitting_is_invisible(
            splits in proptest::collection::vec(1usize..300, 1..12),
            seed in 0u32..1000,
        ) {
            let sections = lowpass(4, 3000.0);
            let total: usize = splits.iter().sum();
            let input: Vec<f32> = (0..total)
                .map(|i| (((i as u32).wrapping_mul(2654435761).wrapping_add(seed) >> 8) as f32
                    / (1u32 << 24) as f32) * 2.0 - 1.0)
                .collect();

            let mut whole = input.clone();
            SosCascade::new("whole", &sections).process(&mut whole).unwrap();

            let mut split = input.clone();
            let mut cascade = SosCascade::new("split", &sections);
            let mut offset = 0;
            for len in splits {
                cascade.process(&mut split[offset..offset + len]).unwrap();
                offset += len;
            }
            prop_assert_eq!(whole, split);
        }
    }

    // -------------------------------------------------------------------------
    // Zero-Phase Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_zero_phase_preserves_length() {
        let sections = lowpass(4, 2000.0);
        for len in [0, 1, 2, 5, 100, 4096] {
            let input = sine(len, 440.0, 0.5);
            assert_eq!(zero_phase(&sections, &input).len(), len);
        }
    }

    #[test]
    fn test_zero_phase_has_no_delay() {
        let sections = lowpass(4, 2000.0);
        let input = sine(8192, 200.0, 0.5);
        let output = zero_phase(&sections, &input);
        for i in 1000..7000 {
            assert!((output[i] - input[i]).abs() < 0.01, "sample {i}");
        }
    }

    #[test]
    fn test_zero_phase_constant_has_no_edge_transient() {
        let sections = lowpass(4, 2000.0);
        let input = vec![0.25; 1000];
        let output = zero_phase(&sections, &input);
        assert!(output.iter().all(|&y| (y - 0.25).abs() < 1e-5));
    }

    #[test]
    fn test_zero_phase_attenuates_stopband() {
        let sections = lowpass(4, 2000.0);
        let input = sine(8192, 12000.0, 0.5);
        let output = zero_phase(&sections, &input);
        assert!(rms(&output[1000..7000]) < 0.001);
    }

    #[test]
    fn test_padding_length() {
        let sections = lowpass(4, 2000.0);
        assert_eq!(zero_phase_padding(&sections, 10_000), 15);
        assert_eq!(zero_phase_padding(&sections, 8), 7);
        assert_eq!(zero_phase_padding(&lowpass(3, 2000.0), 10_000), 12);
        assert_eq!(zero_phase_padding(&sections, 0), 0);
    }
}
