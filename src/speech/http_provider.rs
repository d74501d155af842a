//! OpenAI-compatible streaming speech endpoint
//!
//! Posts the cue text and streams the raw PCM response body back in chunks
//! as it arrives.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SpeechSynthesizer, TtsError};
use crate::settings::CoachSettings;

/// The endpoint's `pcm` format: 24kHz mono PCM16 little-endian
const PCM_MIME: &str = "audio/pcm;rate=24000";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Get the OpenAI API key from environment
pub fn get_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

pub struct HttpSpeechProvider {
    client: Client,
    endpoint: String,
    model: String,
    voice: String,
    api_key: Option<String>,
}

impl HttpSpeechProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, TtsError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TtsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            voice: voice.into(),
            api_key,
        })
    }

    /// Provider configured from settings, with the key read from the environment
    pub fn from_settings(settings: &CoachSettings) -> Result<Self, TtsError> {
        Self::new(
            settings.tts_endpoint.clone(),
            settings.tts_model.clone(),
            settings.tts_voice.clone(),
            get_api_key(),
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechProvider {
    fn audio_mime(&self) -> String {
        PCM_MIME.to_string()
    }

    async fn synthesize(
        &self,
        text: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>, TtsError>>, TtsError> {
        let api_key = self.api_key.as_deref().ok_or(TtsError::MissingCredential)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyInput);
        }

        log::info!("HttpSpeechProvider: synthesizing {} chars", text.len());

        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message =
                if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                    error_response.error.message
                } else {
                    error_text
                };

            log::error!("HttpSpeechProvider: API error ({}): {}", status, message);
            return Err(TtsError::Provider {
                status: Some(status.as_u16()),
                message,
            });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TtsError::Transport(e.to_string()))
        });
        Ok(stream.boxed())
    }
}
