// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use anyhow::bail;
use async_trait::async_trait;
use futures::Stream;

use crate::{
    catalog,
    events::StreamEvent,
    types::{ChatRequest, EmbedOptions, ImageOptions, TranscribeOptions, VoiceOptions},
};

/// Streaming provider output: one envelope event per item.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// Raw audio bytes, chunked as the transport delivers them.
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Vec<u8>>> + Send>>;

/// What a provider can do.  Each capability gates one optional trait method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Voice,
    Transcription,
    Embedding,
    Image,
}

/// Synthesized audio: either fully buffered or streamed from the transport.
pub enum VoiceOutput {
    Buffer(Vec<u8>),
    Stream(ByteStream),
}

impl VoiceOutput {
    /// Collect the audio into a single buffer, draining a stream if needed.
    pub async fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        use futures::StreamExt;
        match self {
            Self::Buffer(b) => Ok(b),
            Self::Stream(mut s) => {
                let mut out = Vec::new();
                while let Some(chunk) = s.next().await {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out)
            }
        }
    }
}

/// Embedding vectors plus the raw input token count for cost accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOutput {
    pub vectors: Vec<Vec<f32>>,
    pub input_tokens: u64,
}

/// Adapter contract for one upstream vendor.
///
/// Every capability method is optional; the default implementations report
/// the capability as unsupported.  `supports_model` answers from the catalog
/// so adapters only override it when they serve models the catalog does not
/// know about.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id matching the catalog `provider` field.
    fn id(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    fn has_capability(&self, kind: Capability) -> bool {
        self.capabilities().contains(&kind)
    }

    fn supports_model(&self, model_id: &str) -> bool {
        catalog::provider_of(model_id).as_deref() == Some(self.id())
    }

    /// Model metadata lookup, answered from the catalog by default.
    fn model_info(&self, model_id: &str) -> Option<catalog::ModelEntry> {
        catalog::lookup(model_id).filter(|e| e.provider == self.id())
    }

    async fn create_response_stream(&self, _req: ChatRequest) -> anyhow::Result<EventStream> {
        bail!("provider {} does not support chat completion", self.id())
    }

    async fn create_voice(
        &self,
        _text: &str,
        _model: &str,
        _opts: &VoiceOptions,
    ) -> anyhow::Result<VoiceOutput> {
        bail!("provider {} does not support voice synthesis", self.id())
    }

    async fn create_transcription(
        &self,
        _audio: Vec<u8>,
        _model: &str,
        _opts: &TranscribeOptions,
    ) -> anyhow::Result<EventStream> {
        bail!("provider {} does not support transcription", self.id())
    }

    async fn create_embedding(
        &self,
        _input: Vec<String>,
        _model: &str,
        _opts: &EmbedOptions,
    ) -> anyhow::Result<EmbedOutput> {
        bail!("provider {} does not support embeddings", self.id())
    }

    async fn create_image(
        &self,
        _prompt: &str,
        _model: &str,
        _opts: &ImageOptions,
    ) -> anyhow::Result<Vec<String>> {
        bail!("provider {} does not support image generation", self.id())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
