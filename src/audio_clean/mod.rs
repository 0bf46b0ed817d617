//! Audio enhancement pipeline module
//!
//! Provides the DSP stages and their orchestration:
//! 1. Band-limiting filters (zero-phase Butterworth high-pass/low-pass)
//! 2. Spectral de-reverberation (STFT spectral gating)
//! 3. Equalization (zero-phase Butterworth band-pass)
//! 4. Dynamic range compression

pub mod compressor;
pub mod filters;
pub mod pipeline;
pub mod spectral;

pub use pipeline::{EnhanceOptions, Pipeline, RunState, StageFailure, StageKind, StageOutput};
