//! Studio configuration, read from TOML.
//!
//! Every section and field is optional; missing values take the defaults
//! below.
//!
//! ```toml
//! fallback = "cloud_neural"
//!
//! [profiles]
//! dir = "~/.local/share/tts-studio/voices"
//!
//! [cloud]
//! region = "westeurope"
//! max_retries = 5
//!
//! [cloning]
//! interpreter = "/opt/tts/venv/bin/python"
//! worker_script = "/opt/tts/tts_worker.py"
//!
//! [cloning.multilingual]
//! max_text_chars = 400
//!
//! [postprocess.trim]
//! threshold_db = -50.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::{BackendRequirement, RuntimeVersion, VersionRange};
use crate::engines::clone::sidecar::SidecarConfig;
use crate::engines::clone::{CloneParams, CloneVariant};
use crate::engines::cloud::{CloudParams, RetryPolicy};
use crate::orchestrator::FallbackPolicy;
use crate::postprocess::PostProcessConfig;
use crate::BackendKind;

/// Environment variable that overrides `cloud.api_key`.
pub const CLOUD_KEY_ENV: &str = "TTS_STUDIO_CLOUD_KEY";

const CLONING_INSTALL_HINT: &str = "Re-run setup to install the voice cloning engines: \
     Chatterbox (English cloning, ~400 MB model) and Coqui XTTS v2 \
     (multilingual cloning, ~2 GB model); both need engine runtime 3.9-3.11 \
     and download their model on first use";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub fallback: FallbackPolicy,
    pub profiles: ProfilesConfig,
    pub cloud: CloudConfig,
    pub cloning: CloningConfig,
    pub postprocess: PostProcessConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Directory of custom voice documents; profiles stay in memory when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub region: String,
    /// Full endpoint URL; overrides `region`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_text_chars: usize,
}

impl Default for CloudConfig {
    fn default() -> Self {
        let params = CloudParams::default();
        Self {
            region: "eastus".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
            max_retries: params.retry.max_retries,
            initial_backoff_ms: params.retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: params.retry.max_backoff.as_millis() as u64,
            backoff_multiplier: params.retry.multiplier,
            max_text_chars: params.max_text_chars,
        }
    }
}

impl CloudConfig {
    pub fn params(&self) -> CloudParams {
        CloudParams {
            max_text_chars: self.max_text_chars,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                multiplier: self.backoff_multiplier,
            },
        }
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                self.region
            )
        })
    }

    /// The API key, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloningConfig {
    pub interpreter: PathBuf,
    pub worker_script: PathBuf,
    pub device: String,
    /// Where the worker writes generated audio; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub english: CloneEngineConfig,
    pub multilingual: CloneEngineConfig,
}

impl Default for CloningConfig {
    fn default() -> Self {
        let sidecar = SidecarConfig::default();
        Self {
            interpreter: sidecar.interpreter,
            worker_script: sidecar.worker_script,
            device: sidecar.device,
            scratch_dir: None,
            english: CloneEngineConfig::default(),
            multilingual: CloneEngineConfig::default(),
        }
    }
}

impl CloningConfig {
    pub fn sidecar(&self) -> SidecarConfig {
        SidecarConfig {
            interpreter: self.interpreter.clone(),
            worker_script: self.worker_script.clone(),
            device: self.device.clone(),
            scratch_dir: self
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn engine(&self, variant: CloneVariant) -> &CloneEngineConfig {
        match variant {
            CloneVariant::English => &self.english,
            CloneVariant::Multilingual => &self.multilingual,
        }
    }
}

/// Per-engine overrides; unset fields use the engine's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneEngineConfig {
    /// Package that must be importable in the engine runtime.
    pub package: Option<String>,
    pub min_runtime: Option<RuntimeVersion>,
    pub max_runtime: Option<RuntimeVersion>,
    pub max_text_chars: Option<usize>,
}

impl CloneEngineConfig {
    pub fn runtime_range(&self, variant: CloneVariant) -> VersionRange {
        let default_min = match variant {
            CloneVariant::English => RuntimeVersion::new(3, 10),
            CloneVariant::Multilingual => RuntimeVersion::new(3, 9),
        };
        VersionRange::new(
            self.min_runtime.unwrap_or(default_min),
            self.max_runtime.unwrap_or(RuntimeVersion::new(3, 11)),
        )
    }

    pub fn params(&self, variant: CloneVariant) -> CloneParams {
        let mut params = CloneParams::for_variant(variant);
        if let Some(max) = self.max_text_chars {
            params.max_text_chars = max;
        }
        params
    }
}

impl StudioConfig {
    /// Read a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?.with_env_overrides();
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Take the cloud API key from `TTS_STUDIO_CLOUD_KEY` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(CLOUD_KEY_ENV) {
            if !key.trim().is_empty() {
                log::debug!("Using cloud API key from {CLOUD_KEY_ENV}");
                self.cloud.api_key = Some(key);
            }
        }
        self
    }

    /// What each backend needs from the environment.
    pub fn requirements(&self) -> Vec<BackendRequirement> {
        let mut cloud = BackendRequirement::new(BackendKind::CloudNeural).compiled(cfg!(feature = "cloud"));
        if self.cloud.api_key().is_none() {
            cloud = cloud.blocked_by(format!(
                "no cloud API key configured (set cloud.api_key or {CLOUD_KEY_ENV})"
            ));
        }

        let cloning = [CloneVariant::English, CloneVariant::Multilingual]
            .into_iter()
            .map(|variant| {
                let engine = self.cloning.engine(variant);
                BackendRequirement::new(variant.kind())
                    .package(
                        engine
                            .package
                            .clone()
                            .unwrap_or_else(|| variant.package().to_string()),
                    )
                    .runtime(engine.runtime_range(variant))
                    .install_hint(CLONING_INSTALL_HINT)
            });

        std::iter::once(cloud).chain(cloning).collect()
    }
}
