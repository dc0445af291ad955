//! Control-surface parameters shared with the audio thread
//!
//! The control surface never talks to the filter chain directly. It builds
//! a [`ControlSnapshot`] and publishes it through a [`SnapshotCell`], which
//! packs the whole record into a single `AtomicU64` so the audio callback
//! reads a consistent value with one load and never waits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one of the five filter slots, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotId {
    Low,
    High,
    BandPass,
    BandStop,
    Custom,
}

impl SlotId {
    pub const COUNT: usize = 5;

    /// Every slot in processing order
    pub const ALL: [SlotId; Self::COUNT] = [
        SlotId::Low,
        SlotId::High,
        SlotId::BandPass,
        SlotId::BandStop,
        SlotId::Custom,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SlotId::Low => "lowpass",
            SlotId::High => "highpass",
            SlotId::BandPass => "bandpass",
            SlotId::BandStop => "bandstop",
            SlotId::Custom => "custom",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "lp" | "lowpass" => Ok(SlotId::Low),
            "high" | "hp" | "highpass" => Ok(SlotId::High),
            "bp" | "bandpass" | "band_pass" => Ok(SlotId::BandPass),
            "bs" | "bandstop" | "band_stop" => Ok(SlotId::BandStop),
            "custom" => Ok(SlotId::Custom),
            other => Err(format!("unknown filter slot '{other}'")),
        }
    }
}

/// One consistent set of control values
///
/// Constructors clamp every field, so a snapshot is always valid: the
/// custom cutoff lies in [`Self::CUTOFF_MIN_HZ`, `Self::CUTOFF_MAX_HZ`] on a
/// quarter-hertz grid and the gain lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlSnapshot {
    enabled: [bool; SlotId::COUNT],
    custom_cutoff_hz: f32,
    gain: f32,
}

impl ControlSnapshot {
    pub const CUTOFF_MIN_HZ: f32 = 100.0;
    pub const CUTOFF_MAX_HZ: f32 = 15000.0;
    pub const DEFAULT_CUTOFF_HZ: f32 = 4000.0;

    /// Cutoff resolution carried through the packed representation
    pub const CUTOFF_STEP_HZ: f32 = 0.25;

    const ENABLED_MASK: u64 = 0xFF;
    const CUTOFF_SHIFT: u32 = 16;
    const GAIN_SHIFT: u32 = 32;

    pub fn new(enabled: [bool; SlotId::COUNT], custom_cutoff_hz: f32, gain: f32) -> Self {
        Self {
            enabled,
            custom_cutoff_hz: Self::clamp_cutoff(custom_cutoff_hz),
            gain: Self::clamp_gain(gain),
        }
    }

    pub fn clamp_cutoff(hz: f32) -> f32 {
        if hz.is_nan() {
            return Self::CUTOFF_MIN_HZ;
        }
        let hz = hz.clamp(Self::CUTOFF_MIN_HZ, Self::CUTOFF_MAX_HZ);
        (hz / Self::CUTOFF_STEP_HZ).round() * Self::CUTOFF_STEP_HZ
    }

    pub fn clamp_gain(gain: f32) -> f32 {
        if gain.is_nan() {
            0.0
        } else {
            gain.clamp(0.0, 1.0)
        }
    }

    pub fn is_enabled(&self, slot: SlotId) -> bool {
        self.enabled[slot.index()]
    }

    pub fn enabled(&self) -> [bool; SlotId::COUNT] {
        self.enabled
    }

    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }

    pub fn custom_cutoff_hz(&self) -> f32 {
        self.custom_cutoff_hz
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[must_use]
    pub fn with_enabled(mut self, slot: SlotId, enabled: bool) -> Self {
        self.enabled[slot.index()] = enabled;
        self
    }

    #[must_use]
    pub fn with_custom_cutoff(mut self, hz: f32) -> Self {
        self.custom_cutoff_hz = Self::clamp_cutoff(hz);
        self
    }

    #[must_use]
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = Self::clamp_gain(gain);
        self
    }

    /// Layout: bits 0..5 enable flags, 16..32 cutoff in quarter hertz,
    /// 32..64 gain as f32 bits.
    pub fn pack(&self) -> u64 {
        let flags = self
            .enabled
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &on)| acc | ((on as u64) << i));
        let quarters = (self.custom_cutoff_hz / Self::CUTOFF_STEP_HZ).round() as u16;
        flags
            | ((quarters as u64) << Self::CUTOFF_SHIFT)
            | ((self.gain.to_bits() as u64) << Self::GAIN_SHIFT)
    }

    pub fn unpack(bits: u64) -> Self {
        let mut enabled = [false; SlotId::COUNT];
        for (i, flag) in enabled.iter_mut().enumerate() {
            *flag = ((bits & Self::ENABLED_MASK) >> i) & 1 == 1;
        }
        let quarters = (bits >> Self::CUTOFF_SHIFT) as u16;
        let gain = f32::from_bits((bits >> Self::GAIN_SHIFT) as u32);
        Self::new(enabled, quarters as f32 * Self::CUTOFF_STEP_HZ, gain)
    }
}

impl Default for ControlSnapshot {
    /// Every slot off, custom cutoff at 4 kHz, unity gain
    fn default() -> Self {
        Self::new([false; SlotId::COUNT], Self::DEFAULT_CUTOFF_HZ, 1.0)
    }
}

/// Single-writer, single-reader publication point for [`ControlSnapshot`]
///
/// Rust pattern: there is no atomic struct, so the snapshot is bit-packed
/// into a u64 and moved with one store and one load.
#[derive(Debug)]
pub struct SnapshotCell {
    bits: AtomicU64,
}

impl SnapshotCell {
    pub fn new(snapshot: ControlSnapshot) -> Self {
        Self {
            bits: AtomicU64::new(snapshot.pack()),
        }
    }

    pub fn publish(&self, snapshot: ControlSnapshot) {
        self.bits.store(snapshot.pack(), Ordering::Release);
    }

    /// Never blocks; returns whatever was published last
    pub fn load(&self) -> ControlSnapshot {
        ControlSnapshot::unpack(self.bits.load(Ordering::Acquire))
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(ControlSnapshot::default())
    }
}
