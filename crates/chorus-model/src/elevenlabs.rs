// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! ElevenLabs voice adapter.  Voice synthesis only; chat-capable providers
//! never route here.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use crate::{
    provider::{Capability, Provider, VoiceOutput},
    types::VoiceOptions,
};

/// Default voice used when the caller does not pick one ("Rachel").
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

pub struct ElevenLabsProvider {
    base_url: String,
    key_env: &'static str,
    client: reqwest::Client,
}

impl ElevenLabsProvider {
    pub fn from_env() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            key_env: "ELEVENLABS_API_KEY",
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(self.key_env)
            .with_context(|| format!("API key not set: export {}", self.key_env))
    }
}

#[async_trait]
impl Provider for ElevenLabsProvider {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Voice]
    }

    async fn create_voice(
        &self,
        text: &str,
        model: &str,
        opts: &VoiceOptions,
    ) -> anyhow::Result<VoiceOutput> {
        let voice = opts.voice.as_deref().unwrap_or(DEFAULT_VOICE_ID);
        let mut url = format!("{}/text-to-speech/{voice}/stream", self.base_url);
        if let Some(format) = &opts.response_format {
            // ElevenLabs takes the output container as a query parameter.
            url.push_str(&format!("?output_format={format}"));
        }

        let body = json!({ "text": text, "model_id": model });
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key()?)
            .json(&body)
            .send()
            .await
            .context("elevenlabs request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("elevenlabs error {status}: {}", resp.text().await.unwrap_or_default());
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::new));
        Ok(VoiceOutput::Stream(Box::pin(bytes)))
    }
}
