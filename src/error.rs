use crate::postprocess::PostStage;
use crate::BackendKind;

/// Terminal failure of a synthesis request.
///
/// Every request that does not complete ends in exactly one of these. The
/// originating backend is kept on adapter failures for diagnostics.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("Voice '{0}' not found")]
    NotFound(String),
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },
    #[error("Text is {len} characters long; {backend} accepts at most {max}")]
    TextTooLong {
        backend: BackendKind,
        len: usize,
        max: usize,
    },
    #[error("{backend} engine failure: {message}")]
    EngineFailure {
        backend: BackendKind,
        message: String,
    },
    #[error("Post-processing failed at {stage}: {message}")]
    EncodingFailure { stage: PostStage, message: String },
    #[error("Request cancelled")]
    Cancelled,
}

impl SynthesisError {
    pub(crate) fn encoding(stage: PostStage, message: impl Into<String>) -> Self {
        SynthesisError::EncodingFailure {
            stage,
            message: message.into(),
        }
    }

    /// The backend this failure is attributed to, if any.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            SynthesisError::BackendUnavailable { backend, .. }
            | SynthesisError::TextTooLong { backend, .. }
            | SynthesisError::EngineFailure { backend, .. } => Some(*backend),
            _ => None,
        }
    }
}
