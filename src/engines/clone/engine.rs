use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::model::Fingerprint;
use super::{CloneError, CloneParams, CloneRuntime, CloneSession, CloneVariant, SpeakerHandle};
use crate::audio::AudioBuffer;
use crate::engines::{
    ensure_text_fits, BackendError, BackendLimits, GenerationContext, GenerationPhase,
    SpeechBackend,
};
use crate::postprocess::{Mood, Tone};
use crate::profile::builtin::normalize_language;
use crate::profile::classify::detect_text_language;
use crate::profile::VoiceProfile;
use crate::{BackendKind, CANONICAL_SAMPLE_RATE};

/// Voice-cloning backend for one engine variant.
///
/// The engine session is created on first use and shared by every later
/// request. Speaker handles are cached per reference-audio fingerprint.
/// A worker failure drops the session and its speakers; the next request
/// loads the engine again.
pub struct CloneBackend {
    variant: CloneVariant,
    params: CloneParams,
    runtime: Arc<dyn CloneRuntime>,
    session: parking_lot::Mutex<Option<Arc<dyn CloneSession>>>,
    /// Serializes engine loads.
    loading: Mutex<()>,
    speakers: parking_lot::Mutex<HashMap<Fingerprint, SpeakerHandle>>,
    /// Held for the whole call when the session is not reentrant.
    gate: Mutex<()>,
}

impl CloneBackend {
    pub fn new(variant: CloneVariant, runtime: Arc<dyn CloneRuntime>) -> Self {
        Self::with_params(variant, runtime, CloneParams::for_variant(variant))
    }

    pub fn with_params(
        variant: CloneVariant,
        runtime: Arc<dyn CloneRuntime>,
        params: CloneParams,
    ) -> Self {
        Self {
            variant,
            params,
            runtime,
            session: parking_lot::Mutex::new(None),
            loading: Mutex::new(()),
            speakers: parking_lot::Mutex::new(HashMap::new()),
            gate: Mutex::new(()),
        }
    }

    pub fn variant(&self) -> CloneVariant {
        self.variant
    }

    /// Whether the engine has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.session.lock().is_some()
    }

    /// The loaded session, loading it first if needed. Every caller that
    /// has to wait for a load reports [`GenerationPhase::WarmingUp`].
    async fn session(&self, ctx: &GenerationContext) -> Result<Arc<dyn CloneSession>, CloneError> {
        let loaded = self.session.lock().clone();
        if let Some(session) = loaded {
            return Ok(session);
        }
        ctx.report(GenerationPhase::WarmingUp);

        let _loading = self.loading.lock().await;
        let loaded = self.session.lock().clone();
        if let Some(session) = loaded {
            return Ok(session);
        }
        log::info!("Loading {} engine", self.variant);
        let start = std::time::Instant::now();
        let session: Arc<dyn CloneSession> = Arc::from(self.runtime.load(self.variant).await?);
        log::info!(
            "{} engine loaded in {:.1}s",
            self.variant,
            start.elapsed().as_secs_f64()
        );
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    /// Forget `session` after a worker failure, together with the speaker
    /// handles it issued. A session loaded since then is kept.
    fn discard(&self, session: &Arc<dyn CloneSession>, err: &CloneError) {
        let mut slot = self.session.lock();
        if slot.as_ref().map_or(false, |current| Arc::ptr_eq(current, session)) {
            log::warn!("Dropping {} engine after worker failure: {err}", self.variant);
            *slot = None;
            self.speakers.lock().clear();
        }
    }

    /// Pass `result` through, discarding the session on a worker failure.
    fn check_worker<T>(
        &self,
        session: &Arc<dyn CloneSession>,
        result: Result<T, CloneError>,
    ) -> Result<T, CloneError> {
        if let Err(err @ CloneError::Worker(_)) = &result {
            self.discard(session, err);
        }
        result
    }

    async fn speaker(
        &self,
        session: &dyn CloneSession,
        profile: &VoiceProfile,
    ) -> Result<SpeakerHandle, CloneError> {
        let reference = profile.reference_audio().ok_or_else(|| {
            CloneError::Speaker(format!("voice '{}' has no reference audio", profile.voice_id))
        })?;
        let fingerprint = Fingerprint::of_file(reference).await?;
        if let Some(handle) = self.speakers.lock().get(&fingerprint) {
            log::debug!("Reusing speaker conditioning {fingerprint}");
            return Ok(handle.clone());
        }

        log::info!("Preparing speaker from {}", reference.display());
        let handle = session.prepare_speaker(reference).await?;
        self.speakers.lock().insert(fingerprint, handle.clone());
        Ok(handle)
    }

    fn language_for(&self, profile: &VoiceProfile, text: &str) -> Option<String> {
        let language = profile
            .language
            .as_deref()
            .and_then(normalize_language)
            .or_else(|| detect_text_language(text));
        self.variant.engine_language(language.as_deref())
    }
}

#[async_trait]
impl SpeechBackend for CloneBackend {
    fn kind(&self) -> BackendKind {
        self.variant.kind()
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_text_chars: self.params.max_text_chars,
            reentrant: self.session.lock().as_ref().map_or(false, |s| s.reentrant()),
        }
    }

    async fn synthesize(
        &self,
        text: &str,
        profile: &VoiceProfile,
        _tone: Tone,
        _mood: Mood,
        ctx: &GenerationContext,
    ) -> Result<AudioBuffer, BackendError> {
        ensure_text_fits(text, &self.limits())?;
        ctx.check_abort()?;

        let session = self.session(ctx).await?;
        let _guard = if session.reentrant() {
            None
        } else {
            Some(self.gate.lock().await)
        };
        ctx.check_abort()?;

        let speaker = self.check_worker(&session, self.speaker(session.as_ref(), profile).await)?;
        let language = self.language_for(profile, text);

        ctx.check_abort()?;
        ctx.report(GenerationPhase::Generating);
        log::debug!(
            "{} generating {} chars (language {:?})",
            self.variant,
            text.chars().count(),
            language
        );
        let audio = self.check_worker(
            &session,
            session.generate(text, &speaker, language.as_deref()).await,
        )?;
        if audio.is_empty() {
            return Err(BackendError::Engine(format!(
                "{} returned no audio",
                self.variant
            )));
        }
        audio
            .into_mono()
            .resample(CANONICAL_SAMPLE_RATE)
            .map_err(|e| BackendError::Engine(e.to_string()))
    }
}
