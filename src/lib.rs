//! Speech-oriented audio enhancement: band-limiting, spectral
//! de-reverberation, equalization and dynamic range compression over
//! decoded audio files.

pub mod audio_clean;
pub mod audio_util;
pub mod commands;
pub mod error;

pub use audio_clean::{EnhanceOptions, Pipeline, RunState, StageFailure, StageKind, StageOutput};
pub use audio_util::Signal;
pub use error::EnhanceError;
