//! Platform audio, file codecs and the control-side session
//!
//! Device access goes through CPAL, which abstracts platform-specific APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod cpal_backend;
pub mod engine;
pub mod lockfree_buffer;
pub mod resample;
pub mod signal;
pub mod spectrum;
pub mod stream;
pub mod wav;

pub use cpal_backend::{CpalEnumerator, DeviceRole};
pub use engine::{export_file, EqualizerSession, ExportJob};
pub use signal::TestSignal;
pub use spectrum::{Spectrum, SpectrumAnalyzer};
pub use stream::{DeviceSelection, DuplexStream};
