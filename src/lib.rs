//! Real-time DSP core of an audio analysis toolkit.
//!
//! Three subsystems make up the crate:
//!
//! - [`biquad`] — cascaded IIR filtering with x1/x2/x4/x8 lane parallelism
//!   and staggered pipeline fill/drain at stream boundaries.
//! - [`analyzer`] — a streaming FFT spectrum analyzer with per-channel
//!   phase-staggered acquisition, windowed real-to-complex transforms,
//!   exponential magnitude smoothing and noise-envelope compensation.
//! - [`oscilloscope`] — a triggered capture engine with oversampled
//!   ingestion, a circular pre-trigger ring and contiguous sweep assembly
//!   across the trigger point.
//!
//! Everything is single-threaded and allocation-free outside of
//! construction: each `process` call performs bounded per-sample work and
//! no I/O, so the cores can be driven directly from an audio callback.

pub mod analyzer;
pub mod biquad;
pub mod dump;
pub mod envelope;
pub mod kernel;
pub mod oscilloscope;
pub mod oversampler;
pub mod trigger;
pub mod window;

pub use analyzer::{Analyzer, FreqScale};
pub use biquad::{BiquadCoeff, BiquadX1, BiquadX2, BiquadX4, BiquadX8};
pub use dump::{StateSink, TextDump};
pub use envelope::NoiseEnvelope;
pub use oscilloscope::{Oscilloscope, OutputMode};
pub use oversampler::{Oversampler, OversamplerMode};
pub use trigger::{Trigger, TriggerState, TriggerType};
pub use window::Window;

/// Errors reported by fallible constructors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}
