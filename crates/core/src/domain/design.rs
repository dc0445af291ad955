//! Butterworth filter design in second-order sections
//!
//! A full Butterworth transfer function is never realized as one high-order
//! direct-form filter: its coefficients lose precision quickly and the
//! result turns unstable near Nyquist. Instead the analog prototype poles
//! are transformed to the requested kind, mapped through the bilinear
//! transform (with pre-warped cutoffs) and grouped into biquads.
//!
//! Design may allocate and has no latency bound. It runs at startup and on
//! control-side threads, never inside the audio callback.

use crate::domain::audio::{AudioError, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Highest order accepted by [`design`]
pub const MAX_ORDER: u32 = 16;

/// Imaginary parts below this are treated as real poles
const REAL_POLE_EPSILON: f64 = 1e-10;

/// Response shape of a Butterworth design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    Low,
    High,
    BandPass,
    BandStop,
}

impl FilterKind {
    pub fn is_band(&self) -> bool {
        matches!(self, FilterKind::BandPass | FilterKind::BandStop)
    }
}

/// Cutoff frequency (or band edges) in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cutoff {
    Single(f32),
    Band { low: f32, high: f32 },
}

/// Complete description of one Butterworth design
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub kind: FilterKind,
    pub order: u32,
    pub cutoff: Cutoff,
    pub sample_rate: f32,
}

impl FilterSpec {
    pub fn lowpass(order: u32, cutoff_hz: f32, sample_rate: f32) -> Self {
        Self {
            kind: FilterKind::Low,
            order,
            cutoff: Cutoff::Single(cutoff_hz),
            sample_rate,
        }
    }

    pub fn highpass(order: u32, cutoff_hz: f32, sample_rate: f32) -> Self {
        Self {
            kind: FilterKind::High,
            order,
            cutoff: Cutoff::Single(cutoff_hz),
            sample_rate,
        }
    }

    pub fn bandpass(order: u32, low_hz: f32, high_hz: f32, sample_rate: f32) -> Self {
        Self {
            kind: FilterKind::BandPass,
            order,
            cutoff: Cutoff::Band {
                low: low_hz,
                high: high_hz,
            },
            sample_rate,
        }
    }

    pub fn bandstop(order: u32, low_hz: f32, high_hz: f32, sample_rate: f32) -> Self {
        Self {
            kind: FilterKind::BandStop,
            order,
            cutoff: Cutoff::Band {
                low: low_hz,
                high: high_hz,
            },
            sample_rate,
        }
    }

    /// Same design with a different single cutoff
    ///
    /// Band designs are returned unchanged.
    #[must_use]
    pub fn with_cutoff(&self, cutoff_hz: f32) -> Self {
        match self.cutoff {
            Cutoff::Single(_) => Self {
                cutoff: Cutoff::Single(cutoff_hz),
                ..*self
            },
            Cutoff::Band { .. } => *self,
        }
    }

    /// Single cutoff, or the lower band edge
    pub fn primary_cutoff(&self) -> f32 {
        match self.cutoff {
            Cutoff::Single(hz) => hz,
            Cutoff::Band { low, .. } => low,
        }
    }

    /// Number of biquads [`design`] produces for this spec
    pub fn section_count(&self) -> usize {
        let order = self.order as usize;
        if self.kind.is_band() {
            order
        } else {
            order.div_ceil(2)
        }
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }

    /// Check every invariant the designer relies on
    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(AudioError::InvalidSpec(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.order == 0 || self.order > MAX_ORDER {
            return Err(AudioError::InvalidSpec(format!(
                "order must be within 1..={MAX_ORDER}, got {}",
                self.order
            )));
        }

        let nyquist = self.nyquist();
        let check = |hz: f32| -> Result<()> {
            if !hz.is_finite() || hz <= 0.0 || hz >= nyquist {
                return Err(AudioError::InvalidSpec(format!(
                    "cutoff {hz} Hz must lie strictly between 0 and {nyquist} Hz"
                )));
            }
            Ok(())
        };

        match (self.kind.is_band(), self.cutoff) {
            (false, Cutoff::Single(hz)) => check(hz),
            (true, Cutoff::Band { low, high }) => {
                check(low)?;
                check(high)?;
                if low >= high {
                    return Err(AudioError::InvalidSpec(format!(
                        "band edges must satisfy low < high, got {low} >= {high}"
                    )));
                }
                Ok(())
            }
            (false, Cutoff::Band { .. }) => Err(AudioError::InvalidSpec(format!(
                "{:?} filter takes a single cutoff",
                self.kind
            ))),
            (true, Cutoff::Single(_)) => Err(AudioError::InvalidSpec(format!(
                "{:?} filter takes two band edges",
                self.kind
            ))),
        }
    }
}

/// Biquad coefficients, normalized so a0 = 1
///
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for SosCoeffs {
    fn default() -> Self {
        Self::UNITY
    }
}

impl SosCoeffs {
    /// Pass-through section
    pub const UNITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Leading denominator coefficient, always 1 after normalization
    pub const A0: f64 = 1.0;

    /// Complex response at `z^-1 = z_inv`
    pub fn response(&self, z_inv: Complex64) -> Complex64 {
        let z_inv2 = z_inv * z_inv;
        let num = self.b0 + z_inv * self.b1 + z_inv2 * self.b2;
        let den = Self::A0 + z_inv * self.a1 + z_inv2 * self.a2;
        num / den
    }

    /// Both poles strictly inside the unit circle (Jury criterion)
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    /// DC gain of the section
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (Self::A0 + self.a1 + self.a2)
    }

    fn scaled(self, gain: f64) -> Self {
        Self {
            b0: self.b0 * gain,
            b1: self.b1 * gain,
            b2: self.b2 * gain,
            ..self
        }
    }
}

/// Magnitude of the cascade response at `hz`
pub fn frequency_response(sections: &[SosCoeffs], hz: f64, sample_rate: f64) -> f64 {
    let z_inv = Complex64::from_polar(1.0, -2.0 * PI * hz / sample_rate);
    sections
        .iter()
        .map(|s| s.response(z_inv))
        .fold(Complex64::new(1.0, 0.0), |acc, h| acc * h)
        .norm()
}

/// Cascade magnitude at `hz` in dB
pub fn response_db(sections: &[SosCoeffs], hz: f64, sample_rate: f64) -> f64 {
    let magnitude = frequency_response(sections, hz, sample_rate);
    if magnitude <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * magnitude.log10()
    }
}

/// Design a Butterworth filter as a cascade of second-order sections
///
/// Sections come out ordered from the least to the most resonant pole
/// pair, each normalized to unit gain at the passband reference
/// frequency, so the cascade has unity passband gain.
pub fn design(spec: &FilterSpec) -> Result<Vec<SosCoeffs>> {
    spec.validate()?;

    let fs = spec.sample_rate as f64;
    let fs2 = 2.0 * fs;
    let prewarp = |hz: f32| fs2 * (PI * hz as f64 / fs).tan();
    let prototype = prototype_poles(spec.order);

    // Analog poles of the target response plus its reference frequency
    // (radians per sample) and band-stop notch angle.
    let (analog, reference, notch) = match (spec.kind, spec.cutoff) {
        (FilterKind::Low, Cutoff::Single(hz)) => {
            let wc = prewarp(hz);
            (prototype.iter().map(|&p| p * wc).collect::<Vec<_>>(), 0.0, 0.0)
        }
        (FilterKind::High, Cutoff::Single(hz)) => {
            let wc = prewarp(hz);
            (prototype.iter().map(|&p| wc / p).collect(), PI, 0.0)
        }
        (kind, Cutoff::Band { low, high }) => {
            let (w1, w2) = (prewarp(low), prewarp(high));
            let bw = w2 - w1;
            let wo = (w1 * w2).sqrt();
            let centre = 2.0 * (wo / fs2).atan();
            let mut poles = Vec::with_capacity(prototype.len() * 2);
            for &p in &prototype {
                let shifted = if kind == FilterKind::BandPass {
                    p * (bw / 2.0)
                } else {
                    (bw / 2.0) / p
                };
                let offset = (shifted * shifted - wo * wo).sqrt();
                poles.push(shifted + offset);
                poles.push(shifted - offset);
            }
            if kind == FilterKind::BandPass {
                (poles, centre, 0.0)
            } else {
                (poles, 0.0, centre)
            }
        }
        (kind, Cutoff::Single(_)) => {
            return Err(AudioError::InvalidSpec(format!(
                "{kind:?} filter takes two band edges"
            )))
        }
    };

    let digital: Vec<Complex64> = analog
        .iter()
        .map(|&s| (fs2 + s) / (fs2 - s))
        .collect();

    let reference_z = Complex64::from_polar(1.0, -reference);
    let mut sections = Vec::with_capacity(spec.section_count());
    for group in group_poles(&digital) {
        let (a1, a2, radius, second_order) = match group {
            PoleGroup::Conjugate(p) => (-2.0 * p.re, p.norm_sqr(), p.norm(), true),
            PoleGroup::RealPair(r1, r2) => (-(r1 + r2), r1 * r2, r1.abs().max(r2.abs()), true),
            PoleGroup::Single(r) => (-r, 0.0, r.abs(), false),
        };

        let (b0, b1, b2) = match (spec.kind, second_order) {
            (FilterKind::Low, true) => (1.0, 2.0, 1.0),
            (FilterKind::Low, false) => (1.0, 1.0, 0.0),
            (FilterKind::High, true) => (1.0, -2.0, 1.0),
            (FilterKind::High, false) => (1.0, -1.0, 0.0),
            (FilterKind::BandPass, _) => (1.0, 0.0, -1.0),
            (FilterKind::BandStop, _) => (1.0, -2.0 * notch.cos(), 1.0),
        };

        let raw = SosCoeffs { b0, b1, b2, a1, a2 };
        let magnitude = raw.response(reference_z).norm();
        if !magnitude.is_finite() || magnitude <= f64::EPSILON {
            return Err(AudioError::InvalidSpec(format!(
                "degenerate section for {:?} at {} Hz",
                spec.kind,
                spec.primary_cutoff()
            )));
        }

        let section = raw.scaled(1.0 / magnitude);
        if !section.is_stable() {
            return Err(AudioError::InvalidSpec(format!(
                "unstable section (a1={:.6}, a2={:.6}) for {:?}",
                section.a1, section.a2, spec.kind
            )));
        }
        sections.push((radius, section));
    }

    sections.sort_by(|a, b| a.0.total_cmp(&b.0));

    debug!(
        kind = ?spec.kind,
        order = spec.order,
        cutoff = spec.primary_cutoff(),
        sections = sections.len(),
        "Designed Butterworth cascade"
    );

    Ok(sections.into_iter().map(|(_, s)| s).collect())
}

/// Left-half-plane poles of the normalized analog Butterworth prototype
fn prototype_poles(order: u32) -> Vec<Complex64> {
    let n = order as f64;
    (0..order)
        .map(|k| Complex64::from_polar(1.0, PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n)))
        .collect()
}

enum PoleGroup {
    /// Upper member of a conjugate pair
    Conjugate(Complex64),
    RealPair(f64, f64),
    Single(f64),
}

fn group_poles(poles: &[Complex64]) -> Vec<PoleGroup> {
    let mut groups: Vec<PoleGroup> = poles
        .iter()
        .filter(|p| p.im > REAL_POLE_EPSILON)
        .map(|p| PoleGroup::Conjugate(*p))
        .collect();

    let mut reals: Vec<f64> = poles
        .iter()
        .filter(|p| p.im.abs() <= REAL_POLE_EPSILON)
        .map(|p| p.re)
        .collect();
    reals.sort_by(|a, b| b.abs().total_cmp(&a.abs()));

    let mut chunks = reals.chunks_exact(2);
    for pair in &mut chunks {
        groups.push(PoleGroup::RealPair(pair[0], pair[1]));
    }
    if let [single] = chunks.remainder() {
        groups.push(PoleGroup::Single(*single));
    }
    groups
}
