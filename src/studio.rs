//! Startup wiring: probe the environment, open the voice catalog and register
//! an adapter for every backend the host can run.

use std::sync::Arc;
#[cfg(feature = "cloud")]
use std::time::Duration;

use crate::capability::{self, CapabilityMap, HostEnvironment};
use crate::config::StudioConfig;
use crate::engines::clone::sidecar::SidecarRuntime;
use crate::engines::clone::{CloneBackend, CloneRuntime, CloneVariant};
use crate::orchestrator::{BuildError, Events, Orchestrator};
use crate::postprocess::PostProcessor;
use crate::profile::{ProfileError, VoiceProfileStore};
use crate::BackendKind;

#[derive(thiserror::Error, Debug)]
pub enum StudioError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[cfg(feature = "cloud")]
    #[error("Cannot create cloud client: {0}")]
    Cloud(#[from] reqwest::Error),
    #[error("Capability probe failed: {0}")]
    Probe(String),
}

/// A running synthesis core.
pub struct Studio {
    orchestrator: Orchestrator,
    events: Option<Events>,
}

impl Studio {
    /// Probe the host, open the profile store and build the orchestrator on
    /// the current tokio runtime.
    pub async fn start(config: StudioConfig) -> Result<Self, StudioError> {
        let requirements = config.requirements();
        let env = HostEnvironment::new(config.cloning.interpreter.clone());
        // the probe runs the interpreter; keep it off the async workers
        let capabilities = tokio::task::spawn_blocking(move || {
            capability::probe(&env, &requirements)
        })
        .await
        .map_err(|e| StudioError::Probe(e.to_string()))?;

        let store = match &config.profiles.dir {
            Some(dir) => VoiceProfileStore::open(dir)?,
            None => VoiceProfileStore::in_memory(),
        };
        log::info!(
            "Voice catalog ready with {} profiles; available backends: {:?}",
            store.list().len(),
            capabilities.available_kinds()
        );

        Self::with_parts(config, Arc::new(store), Arc::new(capabilities))
    }

    /// Build from an already probed capability map and opened store. Only
    /// backends the map marks available get an adapter.
    pub fn with_parts(
        config: StudioConfig,
        store: Arc<VoiceProfileStore>,
        capabilities: Arc<CapabilityMap>,
    ) -> Result<Self, StudioError> {
        let mut builder = Orchestrator::builder(store, capabilities.clone())
            .post_processor(PostProcessor::new(config.postprocess.clone()))
            .fallback(config.fallback);

        #[cfg(feature = "cloud")]
        if let Some(key) = config
            .cloud
            .api_key()
            .filter(|_| capabilities.is_available(BackendKind::CloudNeural))
        {
            use crate::engines::cloud::azure::AzureSpeechClient;
            use crate::engines::cloud::CloudNeuralBackend;

            let client = AzureSpeechClient::with_endpoint(
                config.cloud.endpoint(),
                key,
                Duration::from_secs(config.cloud.timeout_secs),
            )?;
            builder = builder.backend(Arc::new(CloudNeuralBackend::new(
                Arc::new(client),
                config.cloud.params(),
            )));
        }

        let runtime: Arc<dyn CloneRuntime> = Arc::new(SidecarRuntime::new(config.cloning.sidecar()));
        for variant in [CloneVariant::English, CloneVariant::Multilingual] {
            if !capabilities.is_available(variant.kind()) {
                log::debug!(
                    "Not loading {variant}: {}",
                    capabilities.get(variant.kind()).reason_if_unavailable
                );
                continue;
            }
            let params = config.cloning.engine(variant).params(variant);
            builder = builder.backend(Arc::new(CloneBackend::with_params(
                variant,
                runtime.clone(),
                params,
            )));
        }

        let (orchestrator, events) = builder.build()?;
        Ok(Self {
            orchestrator,
            events: Some(events),
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<VoiceProfileStore> {
        self.orchestrator.store()
    }

    pub fn capabilities(&self) -> &Arc<CapabilityMap> {
        self.orchestrator.capabilities()
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.capabilities().is_available(kind)
    }

    /// Hand the event stream to the UI. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<Events> {
        self.events.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::BackendCapability;

    fn all_unavailable() -> Arc<CapabilityMap> {
        Arc::new(CapabilityMap::from_entries(BackendKind::ALL.map(|kind| {
            (kind, BackendCapability::unavailable("not installed"))
        })))
    }

    #[tokio::test]
    async fn starts_without_any_backend() {
        let mut studio = Studio::with_parts(
            StudioConfig::default(),
            Arc::new(VoiceProfileStore::in_memory()),
            all_unavailable(),
        )
        .unwrap();
        assert!(!studio.is_available(BackendKind::CloudNeural));
        assert!(studio.store().get("en-US-AriaNeural").is_some());
        assert!(studio.take_events().is_some());
        assert!(studio.take_events().is_none());
    }

    #[tokio::test]
    async fn unavailable_backend_fails_request() {
        let studio = Studio::with_parts(
            StudioConfig::default(),
            Arc::new(VoiceProfileStore::in_memory()),
            all_unavailable(),
        )
        .unwrap();
        let request = crate::SynthesisRequest::new("Hello", "en-US-AriaNeural").unwrap();
        let err = studio.orchestrator().synthesize(request).await.unwrap_err();
        assert!(matches!(
            err,
            crate::SynthesisError::BackendUnavailable {
                backend: BackendKind::CloudNeural,
                ..
            }
        ));
    }
}
