//! Azure Cognitive Services neural text-to-speech over REST.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{ServiceError, ServiceRequest, SpeechService};

/// 24 kHz 16-bit mono PCM in a RIFF container.
const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

pub struct AzureSpeechClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl AzureSpeechClient {
    /// Client for the regional endpoint, e.g. `"eastus"`.
    pub fn new(region: &str, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_endpoint(
            format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1"),
            api_key,
            Duration::from_secs(30),
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tts-studio/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SpeechService for AzureSpeechClient {
    async fn synthesize(&self, request: &ServiceRequest) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(request.ssml.clone())
            .send()
            .await
            .map_err(|e| ServiceError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Transient(format!("reading audio body: {e}")))?;
        if bytes.len() < 44 || &bytes[..4] != b"RIFF" {
            return Err(ServiceError::InvalidResponse(format!(
                "expected RIFF audio, got {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}
