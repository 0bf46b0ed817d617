use crate::audio_clean::StageFailure;

/// Typed errors for decoding, processing and exporting audio.
#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("Invalid parameter '{name}' = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: String,
    },
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Spectral processing failed: {0}")]
    Spectral(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Stage(Box<StageFailure>),
}

impl From<StageFailure> for EnhanceError {
    fn from(failure: StageFailure) -> Self {
        EnhanceError::Stage(Box::new(failure))
    }
}

impl EnhanceError {
    pub(crate) fn invalid(name: &'static str, value: impl Into<f64>, reason: impl Into<String>) -> Self {
        EnhanceError::InvalidParameter {
            name,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a parameter precondition violation
    pub fn is_invalid_parameter(&self) -> bool {
        match self {
            EnhanceError::InvalidParameter { .. } => true,
            EnhanceError::Stage(failure) => failure.source.is_invalid_parameter(),
            _ => false,
        }
    }
}
