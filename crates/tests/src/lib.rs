//! Cross-crate scenarios for the Cascade equalizer
//!
//! Everything here drives a detached session: the test plays the role of the
//! audio driver and calls the engine block by block.

#[cfg(test)]
mod engine_integration;

#[cfg(test)]
mod file_integration;
