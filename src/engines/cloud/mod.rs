//! Cloud neural voice backend.
//!
//! Voices come from the built-in catalog (no cloning). A request is rendered
//! as an SSML document and sent to a [`SpeechService`]; transient failures
//! are retried with exponential backoff before the backend reports itself
//! unavailable.
//!
//! # Examples
//!
//! ```rust,no_run
//! # #[cfg(feature = "cloud")]
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use tts_studio::engines::cloud::{azure::AzureSpeechClient, CloudNeuralBackend, CloudParams};
//!
//! let client = AzureSpeechClient::new("eastus", "<key>")?;
//! let backend = CloudNeuralBackend::new(Arc::new(client), CloudParams::default());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "cloud")]
pub mod azure;
mod engine;
pub mod ssml;

use std::time::Duration;

use async_trait::async_trait;

pub use engine::CloudNeuralBackend;

/// Retry schedule for transient service failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Parameters for the cloud backend.
#[derive(Debug, Clone)]
pub struct CloudParams {
    /// Longest accepted input, in characters.
    pub max_text_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for CloudParams {
    fn default() -> Self {
        Self {
            max_text_chars: 5000,
            retry: RetryPolicy::default(),
        }
    }
}

/// One synthesis call to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Voice short name, e.g. `"en-US-AriaNeural"`.
    pub voice: String,
    pub ssml: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Timeouts, connection failures, throttling and server errors.
    #[error("transient service failure: {0}")]
    Transient(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }

    /// Classify an HTTP status: throttling and server errors are transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || status == 408 || (500..600).contains(&status) {
            ServiceError::Transient(format!("HTTP {status}: {message}"))
        } else {
            ServiceError::Rejected { status, message }
        }
    }
}

/// Remote text-to-speech service returning RIFF/WAV bytes.
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, request: &ServiceRequest) -> Result<Vec<u8>, ServiceError>;
}
