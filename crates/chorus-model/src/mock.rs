// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    catalog,
    events::{EventPayload, StreamEvent},
    provider::{Capability, EventStream, Provider, VoiceOutput},
    types::{ChatRequest, EmbedOptions, ImageOptions, TranscribeOptions, VoiceOptions},
    EmbedOutput, ToolCall, UsageEntry,
};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as a single delta plus a completion.
#[derive(Default)]
pub struct MockProvider;

const ALL_CAPS: &[Capability] = &[
    Capability::Chat,
    Capability::Voice,
    Capability::Transcription,
    Capability::Embedding,
    Capability::Image,
];

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> &[Capability] {
        ALL_CAPS
    }

    fn supports_model(&self, model_id: &str) -> bool {
        model_id.starts_with("mock") || catalog::provider_of(model_id).as_deref() == Some("mock")
    }

    async fn create_response_stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .and_then(|m| m.text())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::delta("msg_1", format!("MOCK: {reply}"), 0)),
            Ok(StreamEvent::complete("msg_1", format!("MOCK: {reply}"))),
            Ok(StreamEvent::new(EventPayload::CostUpdate {
                usage: UsageEntry::new(req.model, 10, 10),
            })),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted provider round: the events `create_response_stream` yields
/// for a single call.
pub type Script = Vec<EventPayload>;

/// A pre-scripted mock provider.  Each call to `create_response_stream` pops
/// the next script from the front of the queue, so tests can specify exact
/// event sequences, including tool calls, without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    /// Fail the next N `create_response_stream` calls before yielding
    /// anything.  Exercises the streaming retry path.
    failures_before_start: Arc<Mutex<u32>>,
    /// The last `ChatRequest` seen by this provider, for test inspection.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
    /// Every `ChatRequest` seen, in order.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    voice_bytes: Vec<u8>,
    embedding: Vec<f32>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            failures_before_start: Arc::new(Mutex::new(0)),
            last_request: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
            voice_bytes: b"RIFFmockaudio".to_vec(),
            embedding: vec![0.1, 0.2, 0.3],
        }
    }

    /// Fail the first `n` stream creations with a transient error before
    /// serving scripts.
    pub fn with_transient_failures(self, n: u32) -> Self {
        *self.failures_before_start.lock().unwrap() = n;
        self
    }

    pub fn with_voice_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.voice_bytes = bytes;
        self
    }

    /// Convenience: a single round of deltas followed by the completion.
    pub fn deltas_then_complete(chunks: &[&str]) -> Self {
        let full: String = chunks.concat();
        let mut script: Script = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| EventPayload::MessageDelta {
                message_id: "msg_1".into(),
                content: (*c).to_string(),
                order: i as u64,
            })
            .collect();
        script.push(EventPayload::MessageComplete { message_id: "msg_1".into(), content: full });
        Self::new(vec![script])
    }

    /// Convenience: round 1 requests the given tool calls, round 2 answers
    /// with plain text.
    pub fn tools_then_text(calls: Vec<ToolCall>, final_text: &str) -> Self {
        Self::new(vec![
            vec![EventPayload::ToolStart { tool_calls: calls }],
            vec![
                EventPayload::MessageDelta {
                    message_id: "msg_2".into(),
                    content: final_text.to_string(),
                    order: 0,
                },
                EventPayload::MessageComplete {
                    message_id: "msg_2".into(),
                    content: final_text.to_string(),
                },
            ],
        ])
    }

    /// A `ToolCall` literal for scripts.
    pub fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall::new(id, name, arguments)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> &[Capability] {
        ALL_CAPS
    }

    fn supports_model(&self, model_id: &str) -> bool {
        model_id.starts_with("mock") || catalog::provider_of(model_id).as_deref() == Some("mock")
    }

    async fn create_response_stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        {
            let mut failures = self.failures_before_start.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("fetch failed: simulated transient network error");
            }
        }

        *self.last_request.lock().unwrap() = Some(req.clone());
        self.requests.lock().unwrap().push(req);

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                vec![EventPayload::MessageComplete {
                    message_id: "msg_end".into(),
                    content: "[no more scripts]".into(),
                }]
            } else {
                scripts.remove(0)
            }
        };
        let events: Vec<anyhow::Result<StreamEvent>> =
            script.into_iter().map(|p| Ok(StreamEvent::new(p))).collect();
        Ok(Box::pin(stream::iter(events)))
    }

    async fn create_voice(
        &self,
        _text: &str,
        _model: &str,
        _opts: &VoiceOptions,
    ) -> anyhow::Result<VoiceOutput> {
        Ok(VoiceOutput::Buffer(self.voice_bytes.clone()))
    }

    async fn create_transcription(
        &self,
        _audio: Vec<u8>,
        model: &str,
        _opts: &TranscribeOptions,
    ) -> anyhow::Result<EventStream> {
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::new(EventPayload::TranscriptionDelta { delta: "hello ".into() })),
            Ok(StreamEvent::new(EventPayload::TranscriptionDelta { delta: "world".into() })),
            Ok(StreamEvent::new(EventPayload::TranscriptionComplete {
                text: "hello world".into(),
            })),
            Ok(StreamEvent::new(EventPayload::CostUpdate {
                usage: UsageEntry::new(model, 4, 0),
            })),
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    async fn create_embedding(
        &self,
        input: Vec<String>,
        _model: &str,
        _opts: &EmbedOptions,
    ) -> anyhow::Result<EmbedOutput> {
        let tokens: u64 = input.iter().map(|s| (s.len() / 4).max(1) as u64).sum();
        Ok(EmbedOutput { vectors: vec![self.embedding.clone(); input.len()], input_tokens: tokens })
    }

    async fn create_image(
        &self,
        _prompt: &str,
        _model: &str,
        _opts: &ImageOptions,
    ) -> anyhow::Result<Vec<String>> {
        Ok(vec!["data:image/png;base64,bW9ja2ltYWdl".into()])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
