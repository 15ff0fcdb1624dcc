use std::sync::Arc;

use async_trait::async_trait;

use super::ssml::build_ssml;
use super::{CloudParams, ServiceError, ServiceRequest, SpeechService};
use crate::audio::AudioBuffer;
use crate::engines::{
    ensure_text_fits, BackendError, BackendLimits, GenerationContext, GenerationPhase,
    SpeechBackend,
};
use crate::postprocess::{Mood, Tone};
use crate::profile::builtin::DEFAULT_CLOUD_VOICE;
use crate::profile::VoiceProfile;
use crate::{BackendKind, CANONICAL_SAMPLE_RATE};

/// Cloud neural voice backend.
pub struct CloudNeuralBackend {
    service: Arc<dyn SpeechService>,
    params: CloudParams,
}

impl CloudNeuralBackend {
    pub fn new(service: Arc<dyn SpeechService>, params: CloudParams) -> Self {
        Self { service, params }
    }

    async fn call_with_retry(
        &self,
        request: &ServiceRequest,
        ctx: &GenerationContext,
    ) -> Result<Vec<u8>, BackendError> {
        let retry = &self.params.retry;
        let mut attempt = 0;
        loop {
            ctx.check_abort()?;
            match self.service.synthesize(request).await {
                Ok(bytes) => {
                    if attempt > 0 {
                        log::info!("Cloud request succeeded after {attempt} retries");
                    }
                    return Ok(bytes);
                }
                Err(ServiceError::Transient(message)) if attempt < retry.max_retries => {
                    let backoff = retry.backoff(attempt);
                    log::warn!(
                        "Cloud request failed ({message}), retry {}/{} in {backoff:?}",
                        attempt + 1,
                        retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(ServiceError::Transient(message)) => {
                    log::error!("Cloud request failed after {attempt} retries: {message}");
                    return Err(BackendError::Unavailable(message));
                }
                Err(e) => return Err(BackendError::Engine(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl SpeechBackend for CloudNeuralBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudNeural
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_text_chars: self.params.max_text_chars,
            reentrant: true,
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
        let voice = profile.cloud_voice().unwrap_or(DEFAULT_CLOUD_VOICE);
        let request = ServiceRequest {
            voice: voice.to_string(),
            ssml: build_ssml(text, voice),
        };

        ctx.report(GenerationPhase::Generating);
        log::debug!("Requesting {} chars from cloud voice {voice}", text.chars().count());
        let bytes = self.call_with_retry(&request, ctx).await?;

        let buffer = AudioBuffer::from_wav_bytes(&bytes)
            .map_err(|e| BackendError::Engine(format!("undecodable service audio: {e}")))?;
        if buffer.is_empty() {
            return Err(BackendError::Engine("service returned no audio".into()));
        }
        buffer
            .into_mono()
            .resample(CANONICAL_SAMPLE_RATE)
            .map_err(|e| BackendError::Engine(e.to_string()))
    }
}
