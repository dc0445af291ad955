//! Infrastructure for the Cascade equalizer: audio devices, WAV files,
//! resampling, spectrum analysis and the control-side session.

pub mod audio;
