//! Heartbeat detection for a stethoscope microphone.
//!
//! raw samples → `FilterChain` → `SpectrumTap` → `SpectralAnalyzer` →
//! `RollingStore` → `PeakDetector` → `BpmEstimator`, driven one tick at a
//! time by a `Session`.

pub mod logger;

pub mod bpm;
pub mod config;
pub mod detector;
pub mod dsp;
pub mod error;
pub mod session;
pub mod store;
pub mod synth;

pub use bpm::{ BpmEstimator, BpmSample };
pub use config::Config;
pub use detector::{ count_peaks, find_peaks, DebouncePolicy, PeakDetector, PeakEvent };
pub use dsp::filter::{ BiquadStage, FilterChain, FilterStage, Gain };
pub use dsp::spectrum::{ SpectralAnalyzer, SpectralFrame, SpectrumTap, DB_OFFSET };
pub use error::ConfigError;
pub use logger::{ LogLevel, Logger };
pub use session::{ replay, Phase, Session, SessionEvent, SessionSummary, TickOutcome };
pub use store::RollingStore;
