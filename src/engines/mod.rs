//! Speech synthesis backends.
//!
//! Every backend implements [`SpeechBackend`] and returns audio at
//! [`CANONICAL_SAMPLE_RATE`](crate::CANONICAL_SAMPLE_RATE), whatever its
//! engine produces natively.
//!
//! # Available Backends
//!
//! - [`cloud`] - cloud neural voices over HTTP (the HTTP client needs the `cloud` feature)
//! - [`clone`] - zero-shot voice cloning through a local engine worker

pub mod clone;
pub mod cloud;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::AudioBuffer;
use crate::error::SynthesisError;
use crate::postprocess::{Mood, Tone};
use crate::profile::VoiceProfile;
use crate::BackendKind;

/// Static limits a backend declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLimits {
    /// Longest accepted input, in characters. Longer text is rejected, never truncated.
    pub max_text_chars: usize,
    /// Whether concurrent `synthesize` calls may overlap.
    pub reentrant: bool,
}

/// Progress phases a backend reports while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    /// One-time engine load; can take minutes on first use.
    WarmingUp,
    Generating,
}

/// Cooperative cancellation flag shared between the orchestrator and a backend.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type PhaseReporter = Arc<dyn Fn(GenerationPhase) + Send + Sync>;

/// Per-call context handed to [`SpeechBackend::synthesize`].
#[derive(Clone, Default)]
pub struct GenerationContext {
    pub abort: AbortSignal,
    reporter: Option<PhaseReporter>,
}

impl GenerationContext {
    pub fn new(abort: AbortSignal) -> Self {
        Self {
            abort,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: impl Fn(GenerationPhase) + Send + Sync + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn report(&self, phase: GenerationPhase) {
        if let Some(reporter) = &self.reporter {
            reporter(phase);
        }
    }

    /// `Err(BackendError::Aborted)` once cancellation was requested.
    pub fn check_abort(&self) -> Result<(), BackendError> {
        if self.abort.is_aborted() {
            Err(BackendError::Aborted)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for GenerationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("abort", &self.abort)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Text is {len} characters long; at most {max} accepted")]
    TextTooLong { len: usize, max: usize },
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Engine error: {0}")]
    Engine(String),
    #[error("Aborted")]
    Aborted,
}

impl BackendError {
    /// Attach the backend identity.
    pub fn into_synthesis_error(self, backend: BackendKind) -> SynthesisError {
        match self {
            BackendError::TextTooLong { len, max } => {
                SynthesisError::TextTooLong { backend, len, max }
            }
            BackendError::Unavailable(reason) => {
                SynthesisError::BackendUnavailable { backend, reason }
            }
            BackendError::Engine(message) => SynthesisError::EngineFailure { backend, message },
            BackendError::Aborted => SynthesisError::Cancelled,
        }
    }
}

/// Common interface for all synthesis backends.
///
/// `synthesize` runs on the async runtime, never on the caller's thread.
/// Implementations apply the voice in `profile` and must not apply tone or
/// mood themselves; that happens once in post-processing. The values are
/// passed for engines that need to condition on them.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn limits(&self) -> BackendLimits;

    async fn synthesize(
        &self,
        text: &str,
        profile: &VoiceProfile,
        tone: Tone,
        mood: Mood,
        ctx: &GenerationContext,
    ) -> Result<AudioBuffer, BackendError>;
}

/// Reject text longer than the backend accepts.
pub fn ensure_text_fits(text: &str, limits: &BackendLimits) -> Result<(), BackendError> {
    let len = text.chars().count();
    if len > limits.max_text_chars {
        return Err(BackendError::TextTooLong {
            len,
            max: limits.max_text_chars,
        });
    }
    Ok(())
}

/// Backends registered with an orchestrator, keyed by kind.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<BackendKind, Arc<dyn SpeechBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own kind, replacing any previous one.
    pub fn insert(&mut self, backend: Arc<dyn SpeechBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn SpeechBackend>> {
        self.backends.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_limit_counts_characters() {
        let limits = BackendLimits {
            max_text_chars: 3,
            reentrant: true,
        };
        assert!(ensure_text_fits("äöü", &limits).is_ok());
        assert_eq!(
            ensure_text_fits("abcd", &limits),
            Err(BackendError::TextTooLong { len: 4, max: 3 })
        );
    }

    #[test]
    fn backend_errors_carry_identity() {
        let err = BackendError::Engine("boom".into()).into_synthesis_error(BackendKind::CloneEnglish);
        assert_eq!(err.backend(), Some(BackendKind::CloneEnglish));
        assert_eq!(
            BackendError::Aborted.into_synthesis_error(BackendKind::CloudNeural),
            SynthesisError::Cancelled
        );
    }

    #[test]
    fn reporter_sees_phases() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = GenerationContext::default().with_reporter(move |p| sink.lock().push(p));
        ctx.report(GenerationPhase::WarmingUp);
        ctx.report(GenerationPhase::Generating);
        assert_eq!(
            *seen.lock(),
            vec![GenerationPhase::WarmingUp, GenerationPhase::Generating]
        );
    }

    #[test]
    fn abort_is_shared_between_clones() {
        let ctx = GenerationContext::default();
        let other = ctx.clone();
        other.abort.abort();
        assert_eq!(ctx.check_abort(), Err(BackendError::Aborted));
    }
}
