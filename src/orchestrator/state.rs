use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioArtifact;
use crate::error::SynthesisError;
use crate::BackendKind;

/// Lifecycle of a request.
///
/// `Pending → Resolving → Generating → PostProcessing → Done`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Resolving,
    Generating,
    PostProcessing,
    Done,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestState::Pending => "pending",
            RequestState::Resolving => "resolving",
            RequestState::Generating => "generating",
            RequestState::PostProcessing => "post-processing",
            RequestState::Done => "done",
            RequestState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form is enough to tell requests apart in logs
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Returned by `submit`; used to cancel or query a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    pub(crate) id: RequestId,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

/// Record of a backend substitution made under the fallback policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub requested_voice: String,
    pub requested_backend: BackendKind,
    /// Built-in voice actually used.
    pub fallback_voice: String,
    /// Why the requested backend could not be used.
    pub reason: String,
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub artifact: AudioArtifact,
    /// Backend that produced the audio.
    pub backend: BackendKind,
    /// Voice that produced the audio; differs from the request when substituted.
    pub voice_id: String,
    /// Length of the generated audio before trimming and shaping.
    pub pre_trim_duration: Duration,
    pub substitution: Option<Substitution>,
}

impl SynthesisOutcome {
    pub fn substituted(&self) -> bool {
        self.substitution.is_some()
    }
}

pub type SynthesisResult = Result<SynthesisOutcome, SynthesisError>;

/// Notifications for the UI, delivered in order per request.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    StateChanged {
        request: RequestId,
        state: RequestState,
    },
    /// The backend is loading its engine; the first request can take minutes.
    WarmingUp {
        request: RequestId,
        backend: BackendKind,
    },
    /// Sent exactly once per request.
    Finished {
        request: RequestId,
        result: SynthesisResult,
    },
}

impl SynthesisEvent {
    pub fn request(&self) -> RequestId {
        match self {
            SynthesisEvent::StateChanged { request, .. }
            | SynthesisEvent::WarmingUp { request, .. }
            | SynthesisEvent::Finished { request, .. } => *request,
        }
    }
}
