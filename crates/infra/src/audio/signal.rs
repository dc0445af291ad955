//! Test signals for exercising the equalizer by ear or in tests

use cascade_core::domain::audio::{AudioError, Result};
use std::f64::consts::TAU;
use std::str::FromStr;

/// Length of generated signals unless asked otherwise
pub const DEFAULT_DURATION_SECS: f32 = 3.0;

/// Frequencies mixed by [`TestSignal::Multitone`] when none are given
pub const DEFAULT_MULTITONE_HZ: [f32; 4] = [440.0, 1000.0, 5000.0, 10000.0];

#[derive(Debug, Clone, PartialEq)]
pub enum TestSignal {
    /// Pure tone at amplitude 0.5
    Sine { hz: f32 },
    /// Sum of tones at amplitude 0.2 each
    Multitone { hz: Vec<f32> },
    /// Linear sweep from `start_hz` to `end_hz` at amplitude 0.5
    Chirp { start_hz: f32, end_hz: f32 },
}

impl TestSignal {
    pub fn render(&self, sample_rate: u32, duration_secs: f32) -> Vec<f32> {
        let len = (sample_rate as f64 * duration_secs.max(0.0) as f64) as usize;
        let fs = sample_rate as f64;
        let duration = len as f64 / fs;

        (0..len)
            .map(|i| {
                let t = i as f64 / fs;
                let value = match self {
                    TestSignal::Sine { hz } => 0.5 * (TAU * *hz as f64 * t).sin(),
                    TestSignal::Multitone { hz } => hz
                        .iter()
                        .map(|&f| 0.2 * (TAU * f as f64 * t).sin())
                        .sum(),
                    TestSignal::Chirp { start_hz, end_hz } => {
                        let f0 = *start_hz as f64;
                        let slope = (*end_hz as f64 - f0) / duration.max(f64::EPSILON);
                        0.5 * (TAU * (f0 * t + 0.5 * slope * t * t)).cos()
                    }
                };
                value as f32
            })
            .collect()
    }
}

impl FromStr for TestSignal {
    type Err = AudioError;

    /// `sine:440`, `multitone:440,1000`, `multitone`, `chirp:20-20000`
    fn from_str(s: &str) -> Result<Self> {
        let (kind, args) = s.split_once(':').unwrap_or((s, ""));
        let bad = || AudioError::InvalidConfiguration(format!("invalid test signal: {s}"));
        let number = |v: &str| v.trim().parse::<f32>().ok().filter(|x| *x > 0.0).ok_or_else(bad);

        match kind.trim().to_ascii_lowercase().as_str() {
            "sine" => Ok(TestSignal::Sine { hz: number(args)? }),
            "multitone" if args.is_empty() => Ok(TestSignal::Multitone {
                hz: DEFAULT_MULTITONE_HZ.to_vec(),
            }),
            "multitone" => Ok(TestSignal::Multitone {
                hz: args.split(',').map(number).collect::<Result<_>>()?,
            }),
            "chirp" => {
                let (start, end) = args.split_once('-').ok_or_else(bad)?;
                Ok(TestSignal::Chirp {
                    start_hz: number(start)?,
                    end_hz: number(end)?,
                })
            }
            _ => Err(bad()),
        }
    }
}
