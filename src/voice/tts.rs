//! Text-to-speech (TTS) processing

use async_trait::async_trait;

use super::{AudioFormat, AudioPayload};
use crate::{Error, Result};

/// Synthesis contract: text and voice name in, encoded audio out
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize text in the given provider voice
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis fails.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioPayload>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    OpenAI,
    UnrealSpeech,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be
    /// built.
    pub fn new_openai(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: build_client(timeout_secs)?,
            api_key,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using `UnrealSpeech`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be
    /// built.
    pub fn new_unrealspeech(api_key: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "UnrealSpeech API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(timeout_secs)?,
            api_key,
            model: String::new(),
            provider: TtsProvider::UnrealSpeech,
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, voice: &str) -> Result<AudioPayload> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
        }

        let request = TtsRequest { model: &self.model, input: text, voice };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(format!("OpenAI TTS request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        Ok(AudioPayload { bytes: audio.to_vec(), format: AudioFormat::Mp3 })
    }

    /// Synthesize using UnrealSpeech
    async fn synthesize_unrealspeech(&self, text: &str, voice: &str) -> Result<AudioPayload> {
        #[derive(serde::Serialize)]
        struct UnrealRequest<'a> {
            #[serde(rename = "Text")]
            text: &'a str,
            #[serde(rename = "VoiceId")]
            voice_id: &'a str,
            #[serde(rename = "Bitrate")]
            bitrate: &'a str,
        }

        let request = UnrealRequest { text, voice_id: voice, bitrate: "192k" };

        let response = self
            .client
            .post("https://api.v8.unrealspeech.com/stream")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(format!("UnrealSpeech request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("UnrealSpeech error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        Ok(AudioPayload { bytes: audio.to_vec(), format: AudioFormat::Mp3 })
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioPayload> {
        tracing::debug!(chars = text.len(), voice, provider = ?self.provider, "synthesizing");
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice).await,
            TtsProvider::UnrealSpeech => self.synthesize_unrealspeech(text, voice).await,
        }
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(e.to_string()))
}
