//! Per-request synthesis pipeline.
//!
//! [`Orchestrator::submit`] returns immediately; the request then runs on the
//! async runtime through resolution, generation and post-processing. Progress
//! and the single terminal result are delivered on the event channel returned
//! by [`OrchestratorBuilder::build`], and to [`Orchestrator::synthesize`]
//! callers.
//!
//! Each request owns its pipeline. Requests share nothing mutable apart from
//! the backends' internal caches, and finish in completion order.

mod request;
mod state;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::audio::AudioArtifact;
use crate::capability::CapabilityMap;
use crate::engines::{
    AbortSignal, BackendSet, GenerationContext, GenerationPhase, SpeechBackend,
};
use crate::error::SynthesisError;
use crate::postprocess::{PostProcessor, PostStage};
use crate::profile::{VoiceProfile, VoiceProfileStore};
use crate::BackendKind;

pub use request::{SynthesisRequest, SynthesisRequestBuilder, SynthesisRequestBuilderError};
pub use state::{
    RequestHandle, RequestId, RequestState, Substitution, SynthesisEvent, SynthesisOutcome,
    SynthesisResult,
};

/// Receiving end of the orchestrator's event stream.
pub type Events = mpsc::UnboundedReceiver<SynthesisEvent>;

/// What to do when a profile's backend is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Fail the request with `BackendUnavailable`.
    #[default]
    Disabled,
    /// Use the closest built-in cloud voice and report the substitution.
    CloudNeural,
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("No tokio runtime: call build() inside a runtime or pass one with runtime()")]
    NoRuntime,
}

pub struct OrchestratorBuilder {
    store: Arc<VoiceProfileStore>,
    capabilities: Arc<CapabilityMap>,
    backends: BackendSet,
    post: PostProcessor,
    fallback: FallbackPolicy,
    runtime: Option<Handle>,
}

impl OrchestratorBuilder {
    pub fn backend(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.backends.insert(backend);
        self
    }

    pub fn post_processor(mut self, post: PostProcessor) -> Self {
        self.post = post;
        self
    }

    pub fn fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Runtime the pipelines are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<(Orchestrator, Events), BuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        for kind in BackendKind::ALL {
            if self.capabilities.is_available(kind) && self.backends.get(kind).is_none() {
                log::warn!("Backend {kind} is available but no adapter is registered");
            }
        }
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            store: self.store,
            capabilities: self.capabilities,
            backends: self.backends,
            post: Arc::new(self.post),
            fallback: self.fallback,
            runtime,
            events,
            inflight: parking_lot::Mutex::new(HashMap::new()),
        };
        Ok((
            Orchestrator {
                shared: Arc::new(shared),
            },
            rx,
        ))
    }
}

/// Drives synthesis requests from submission to a terminal result.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    store: Arc<VoiceProfileStore>,
    capabilities: Arc<CapabilityMap>,
    backends: BackendSet,
    post: Arc<PostProcessor>,
    fallback: FallbackPolicy,
    runtime: Handle,
    events: mpsc::UnboundedSender<SynthesisEvent>,
    inflight: parking_lot::Mutex<HashMap<RequestId, Arc<Ticket>>>,
}

/// Bookkeeping for one in-flight request.
struct Ticket {
    id: RequestId,
    abort: AbortSignal,
    inner: parking_lot::Mutex<TicketState>,
}

struct TicketState {
    state: RequestState,
    finished: bool,
    waiter: Option<oneshot::Sender<SynthesisResult>>,
}

impl Shared {
    fn emit(&self, event: SynthesisEvent) {
        // the UI may have dropped its receiver
        let _ = self.events.send(event);
    }

    /// Move a live request to `state`. False once the request has finished.
    fn transition(&self, ticket: &Ticket, state: RequestState) -> bool {
        let mut inner = ticket.inner.lock();
        if inner.finished {
            return false;
        }
        inner.state = state;
        self.emit(SynthesisEvent::StateChanged {
            request: ticket.id,
            state,
        });
        true
    }

    /// Deliver the terminal result. Only the first call per request has any
    /// effect; later results are discarded.
    fn finish(&self, ticket: &Ticket, result: SynthesisResult) -> bool {
        self.finish_with(ticket, move || result)
    }

    /// Like [`Shared::finish`], but the result is produced by `complete`,
    /// which runs only if the request is still live and holds off any
    /// concurrent cancel until the result is delivered.
    fn finish_with(&self, ticket: &Ticket, complete: impl FnOnce() -> SynthesisResult) -> bool {
        {
            let mut inner = ticket.inner.lock();
            if inner.finished {
                log::debug!("Request {} already finished; discarding late result", ticket.id);
                return false;
            }
            let result = complete();
            inner.finished = true;
            let state = if result.is_ok() {
                RequestState::Done
            } else {
                RequestState::Failed
            };
            inner.state = state;
            match &result {
                Ok(outcome) => log::info!(
                    "Request {} done via {} ({:.2}s)",
                    ticket.id,
                    outcome.backend,
                    outcome.artifact.duration.as_secs_f64()
                ),
                Err(SynthesisError::Cancelled) => log::info!("Request {} cancelled", ticket.id),
                Err(e) => log::warn!("Request {} failed: {e}", ticket.id),
            }
            self.emit(SynthesisEvent::StateChanged {
                request: ticket.id,
                state,
            });
            self.emit(SynthesisEvent::Finished {
                request: ticket.id,
                result: result.clone(),
            });
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.send(result);
            }
        }
        self.inflight.lock().remove(&ticket.id);
        true
    }

    /// Pick the backend and profile that will serve `profile`, applying the
    /// fallback policy when its own backend is unavailable.
    fn resolve(
        &self,
        profile: VoiceProfile,
    ) -> Result<(VoiceProfile, BackendKind, Option<Substitution>), SynthesisError> {
        let kind = profile.backend_kind;
        let usable = |k: BackendKind| self.capabilities.is_available(k) && self.backends.get(k).is_some();
        if usable(kind) {
            return Ok((profile, kind, None));
        }

        let reason = if self.capabilities.is_available(kind) {
            "no adapter registered".to_string()
        } else {
            self.capabilities.get(kind).reason_if_unavailable.clone()
        };

        if self.fallback == FallbackPolicy::CloudNeural
            && kind != BackendKind::CloudNeural
            && usable(BackendKind::CloudNeural)
        {
            let fallback_voice = self
                .store
                .best_builtin_voice(profile.language.as_deref(), profile.gender);
            if let Some(fallback) = self.store.get(fallback_voice) {
                log::warn!(
                    "Backend {kind} unavailable ({reason}); using cloud voice {fallback_voice} for '{}'",
                    profile.voice_id
                );
                let substitution = Substitution {
                    requested_voice: profile.voice_id,
                    requested_backend: kind,
                    fallback_voice: fallback.voice_id.clone(),
                    reason,
                };
                return Ok((fallback, BackendKind::CloudNeural, Some(substitution)));
            }
        }

        Err(SynthesisError::BackendUnavailable {
            backend: kind,
            reason,
        })
    }
}

impl Orchestrator {
    pub fn builder(
        store: Arc<VoiceProfileStore>,
        capabilities: Arc<CapabilityMap>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            capabilities,
            backends: BackendSet::new(),
            post: PostProcessor::default(),
            fallback: FallbackPolicy::default(),
            runtime: None,
        }
    }

    pub fn store(&self) -> &Arc<VoiceProfileStore> {
        &self.shared.store
    }

    pub fn capabilities(&self) -> &Arc<CapabilityMap> {
        &self.shared.capabilities
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.shared.post
    }

    /// Queue a request and return at once. The outcome arrives as a
    /// [`SynthesisEvent::Finished`] event.
    pub fn submit(&self, request: SynthesisRequest) -> RequestHandle {
        self.start(request, None)
    }

    /// Submit a request and wait for its terminal result.
    pub async fn synthesize(&self, request: SynthesisRequest) -> SynthesisResult {
        let (tx, rx) = oneshot::channel();
        self.start(request, Some(tx));
        rx.await.unwrap_or(Err(SynthesisError::Cancelled))
    }

    /// Cancel a request.
    ///
    /// Returns true when the request was still running; it then finishes with
    /// [`SynthesisError::Cancelled`] immediately and any result its backend
    /// produces later is discarded. Returns false for finished or unknown
    /// requests.
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        let ticket = self.shared.inflight.lock().get(&handle.id).cloned();
        match ticket {
            Some(ticket) => {
                ticket.abort.abort();
                self.shared.finish(&ticket, Err(SynthesisError::Cancelled))
            }
            None => false,
        }
    }

    /// Current state of a running request; `None` once it has finished.
    pub fn state(&self, handle: &RequestHandle) -> Option<RequestState> {
        let ticket = self.shared.inflight.lock().get(&handle.id).cloned()?;
        let state = ticket.inner.lock().state;
        Some(state)
    }

    /// Number of requests that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.shared.inflight.lock().len()
    }

    fn start(
        &self,
        request: SynthesisRequest,
        waiter: Option<oneshot::Sender<SynthesisResult>>,
    ) -> RequestHandle {
        let id = RequestId::new();
        let ticket = Arc::new(Ticket {
            id,
            abort: AbortSignal::new(),
            inner: parking_lot::Mutex::new(TicketState {
                state: RequestState::Pending,
                finished: false,
                waiter,
            }),
        });
        self.shared.inflight.lock().insert(id, ticket.clone());
        log::debug!("Request {id} submitted for voice '{}'", request.voice_id());
        self.shared.emit(SynthesisEvent::StateChanged {
            request: id,
            state: RequestState::Pending,
        });

        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            match run_pipeline(&shared, &ticket, request).await {
                Ok((mut outcome, Some(mut staged))) => {
                    // a cancelled request drops `staged`, which removes the file
                    shared.finish_with(&ticket, || {
                        staged.commit(&mut outcome.artifact)?;
                        Ok(outcome)
                    });
                }
                Ok((outcome, None)) => {
                    shared.finish(&ticket, Ok(outcome));
                }
                Err(e) => {
                    shared.finish(&ticket, Err(e));
                }
            }
        });
        RequestHandle { id }
    }
}

/// Output written under a temporary name next to its destination. Moved
/// into place by [`StagedFile::commit`]; removed on drop otherwise.
struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn for_target(target: PathBuf) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged = target.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()));
        Self {
            staged,
            target,
            committed: false,
        }
    }

    fn commit(&mut self, artifact: &mut AudioArtifact) -> Result<(), SynthesisError> {
        std::fs::rename(&self.staged, &self.target).map_err(|e| {
            SynthesisError::encoding(PostStage::Write, format!("{}: {e}", self.target.display()))
        })?;
        self.committed = true;
        artifact.path = Some(self.target.clone());
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.staged) {
            Ok(()) => log::debug!("Discarded unpublished output {}", self.staged.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {e}", self.staged.display()),
        }
    }
}

/// Runs one request up to its result. A requested output file is left
/// staged; the caller publishes it when delivering the result.
async fn run_pipeline(
    shared: &Arc<Shared>,
    ticket: &Arc<Ticket>,
    request: SynthesisRequest,
) -> Result<(SynthesisOutcome, Option<StagedFile>), SynthesisError> {
    if !shared.transition(ticket, RequestState::Resolving) {
        return Err(SynthesisError::Cancelled);
    }
    let profile = shared
        .store
        .get(request.voice_id())
        .ok_or_else(|| SynthesisError::NotFound(request.voice_id().to_string()))?;
    let (profile, kind, substitution) = shared.resolve(profile)?;
    let backend = shared
        .backends
        .get(kind)
        .cloned()
        .ok_or_else(|| SynthesisError::BackendUnavailable {
            backend: kind,
            reason: "no adapter registered".to_string(),
        })?;

    if !shared.transition(ticket, RequestState::Generating) {
        return Err(SynthesisError::Cancelled);
    }

    let reporter_shared = shared.clone();
    let reporter_ticket = ticket.clone();
    let ctx = GenerationContext::new(ticket.abort.clone()).with_reporter(move |phase| {
        if phase == GenerationPhase::WarmingUp {
            let inner = reporter_ticket.inner.lock();
            if !inner.finished {
                reporter_shared.emit(SynthesisEvent::WarmingUp {
                    request: reporter_ticket.id,
                    backend: kind,
                });
            }
        }
    });

    // Own the backend call so a panicking adapter still ends in a result.
    let text = request.text().to_string();
    let (tone, mood) = (request.tone(), request.mood());
    let voice_profile = profile.clone();
    let generation = shared.runtime.spawn(async move {
        backend
            .synthesize(&text, &voice_profile, tone, mood, &ctx)
            .await
    });
    let buffer = generation
        .await
        .map_err(|e| SynthesisError::EngineFailure {
            backend: kind,
            message: format!("backend task failed: {e}"),
        })?
        .map_err(|e| e.into_synthesis_error(kind))?;

    if ticket.abort.is_aborted() || !shared.transition(ticket, RequestState::PostProcessing) {
        return Err(SynthesisError::Cancelled);
    }
    let pre_trim_duration = buffer.duration();

    let post = shared.post.clone();
    let format = request.output_format();
    let staged = request
        .output_path()
        .map(|p| StagedFile::for_target(p.to_path_buf()));
    let abort = ticket.abort.clone();
    let (artifact, staged) = tokio::task::spawn_blocking(move || {
        let mut artifact = post.process(buffer, tone, mood, format)?;
        if abort.is_aborted() {
            return Err(SynthesisError::Cancelled);
        }
        if let Some(staged) = &staged {
            artifact.save(&staged.staged).map_err(|e| {
                SynthesisError::encoding(PostStage::Write, format!("{}: {e}", staged.target.display()))
            })?;
        }
        Ok::<_, SynthesisError>((artifact, staged))
    })
    .await
    .map_err(|e| SynthesisError::encoding(PostStage::Encode, format!("post-processing task failed: {e}")))??;

    Ok((
        SynthesisOutcome {
            artifact,
            backend: kind,
            voice_id: profile.voice_id,
            pre_trim_duration,
            substitution,
        },
        staged,
    ))
}
