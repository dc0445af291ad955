//! Core domain of the Cascade equalizer
//!
//! Everything here is platform independent: filter design, the real-time
//! engine and its control surface, and configuration. Audio device and
//! file I/O live in `cascade-infra`.

pub mod domain;
