//! Domain entities and business rules

pub mod audio;
pub mod chain;
pub mod config;
pub mod control;
pub mod design;
pub mod dsp;
pub mod engine;
pub mod source;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioEnumerator, AudioError, DeviceId, DeviceInfo, DeviceType, SampleRate, StreamConfig,
};
pub use chain::{render_offline, FilterBank, FilterChain, FilterSlot, Redesigner};
pub use config::{
    ConfigError, ConfigManager, ControlConfig, EqualizerConfig, FilterBankConfig, PresetManager,
};
pub use control::{ControlSnapshot, SlotId, SnapshotCell};
pub use design::{design, frequency_response, response_db, FilterKind, FilterSpec, SosCoeffs};
pub use dsp::{zero_phase, Effect, SosCascade, SosStage};
pub use engine::{
    AudioEngine, EngineEvent, EngineHandle, EngineParts, FaultKind, VisualizationTap,
};
pub use source::{SourceLabel, SourceState};
