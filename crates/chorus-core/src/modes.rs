// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Secondary modes: voice synthesis, transcription, embeddings, and image
//! generation.  Thin wrappers over the capability-gated provider methods,
//! sharing the pause gate, retry machinery, cost tracker, and event bus with
//! the chat path.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use chorus_model::{
    registry::get_model_provider, resolve_model, Capability, EmbedOptions, EventPayload,
    ImageOptions, PcmParameters, StreamEvent, TranscribeOptions, UsageEntry, VoiceOptions,
    VoiceOutput,
};

use crate::{
    agent::AgentDef,
    bus,
    cost::cost_tracker,
    error::{error_event, ErrorKind, OrchestratorError},
    pause::{pause_controller, DEFAULT_PAUSE_POLL},
    retry::{retry, retry_stream, RetryOptions},
    runner::send_event,
};

/// Voice payload chunk size before base64 encoding.
const VOICE_CHUNK_BYTES: usize = 8 * 1024;

fn resolve_for(agent: &AgentDef, kind: Capability) -> anyhow::Result<String> {
    resolve_model(agent.model.as_deref(), agent.model_class.as_deref(), kind)
        .map_err(|e| OrchestratorError::new(ErrorKind::InvalidRequest, format!("{e:#}")).into())
}

/// Price and record a usage entry; deliver it to the bus when a handler is
/// installed.  Returns the priced entry for optional stream delivery.
fn record(agent: &AgentDef, model: &str, usage: UsageEntry) -> UsageEntry {
    let entry = cost_tracker().add_usage(usage);
    if bus::has_event_handler() {
        bus::emit(
            StreamEvent::new(EventPayload::CostUpdate { usage: entry.clone() }),
            Some(agent),
            Some(model),
        );
    }
    entry
}

/// Synthesize speech, returning the provider's byte output directly.
pub async fn voice(
    text: &str,
    agent: &AgentDef,
    opts: &VoiceOptions,
) -> anyhow::Result<VoiceOutput> {
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;
    let model = resolve_for(agent, Capability::Voice)?;
    let provider = get_model_provider(&model)?;

    let output = retry(&RetryOptions::default(), agent.abort.as_ref(), || {
        provider.create_voice(text, &model, opts)
    })
    .await?;

    let usage = UsageEntry::new(&model, text.chars().count() as u64, 0)
        .with_metadata("unit", json!("characters"));
    record(agent, &model, usage);
    Ok(output)
}

/// Synthesize speech as an event stream: one `audio_stream` descriptor, then
/// base64 chunks of at most 8 KiB with increasing `chunk_index` and a
/// final-chunk flag, then a closing `cost_update`.
pub fn voice_stream(
    text: impl Into<String>,
    agent: AgentDef,
    opts: VoiceOptions,
) -> ReceiverStream<StreamEvent> {
    let text = text.into();
    let (tx, rx) = mpsc::channel(crate::request::EVENT_CHANNEL_DEPTH);
    tokio::spawn(async move {
        if let Err(err) = drive_voice_stream(&tx, &text, &agent, &opts).await {
            let _ = tx.send(error_event(&err)).await;
        }
    });
    ReceiverStream::new(rx)
}

async fn drive_voice_stream(
    tx: &mpsc::Sender<StreamEvent>,
    text: &str,
    agent: &AgentDef,
    opts: &VoiceOptions,
) -> anyhow::Result<()> {
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;
    let model = resolve_for(agent, Capability::Voice)?;
    let provider = get_model_provider(&model)?;

    let format = opts.response_format.clone().unwrap_or_else(|| "mp3".to_string());
    let pcm_parameters = format.starts_with("pcm").then(PcmParameters::default);
    send_event(
        tx,
        agent,
        &model,
        StreamEvent::new(EventPayload::AudioStream {
            format: format.clone(),
            pcm_parameters,
            data: None,
            chunk_index: None,
            is_final: None,
        }),
    )
    .await?;

    let output = retry(&RetryOptions::default(), agent.abort.as_ref(), || {
        provider.create_voice(text, &model, opts)
    })
    .await?;

    let mut chunker = VoiceChunker::new(format.clone());
    match output {
        VoiceOutput::Buffer(bytes) => {
            for event in chunker.push(&bytes) {
                send_event(tx, agent, &model, event).await?;
            }
        }
        VoiceOutput::Stream(mut stream) => {
            while let Some(bytes) = stream.next().await {
                for event in chunker.push(&bytes?) {
                    send_event(tx, agent, &model, event).await?;
                }
            }
        }
    }
    for event in chunker.finish() {
        send_event(tx, agent, &model, event).await?;
    }

    let usage = UsageEntry::new(&model, text.chars().count() as u64, 0)
        .with_metadata("unit", json!("characters"));
    let entry = record(agent, &model, usage);
    if !bus::has_event_handler() {
        send_event(tx, agent, &model, StreamEvent::new(EventPayload::CostUpdate { usage: entry }))
            .await?;
    }
    Ok(())
}

/// Accumulates raw audio and emits ≤ 8 KiB base64 chunk events.  Exactly one
/// emitted event carries `is_final: true`, which requires holding back one
/// chunk until the source is known to be exhausted.
struct VoiceChunker {
    format: String,
    carry: Vec<u8>,
    pending: Option<Vec<u8>>,
    index: u64,
}

impl VoiceChunker {
    fn new(format: String) -> Self {
        Self { format, carry: Vec::new(), pending: None, index: 0 }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.carry.extend_from_slice(bytes);
        let mut out = Vec::new();
        while self.carry.len() >= VOICE_CHUNK_BYTES {
            let chunk: Vec<u8> = self.carry.drain(..VOICE_CHUNK_BYTES).collect();
            if let Some(ready) = self.pending.replace(chunk) {
                out.push(self.chunk_event(&ready, false));
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let pending = self.pending.take();
        let rest: Vec<u8> = self.carry.drain(..).collect();
        match pending {
            Some(chunk) if rest.is_empty() => out.push(self.chunk_event(&chunk, true)),
            Some(chunk) => {
                out.push(self.chunk_event(&chunk, false));
                out.push(self.chunk_event(&rest, true));
            }
            None => out.push(self.chunk_event(&rest, true)),
        }
        out
    }

    fn chunk_event(&mut self, bytes: &[u8], is_final: bool) -> StreamEvent {
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let event = StreamEvent::new(EventPayload::AudioStream {
            format: self.format.clone(),
            pcm_parameters: None,
            data: Some(data),
            chunk_index: Some(self.index),
            is_final: Some(is_final),
        });
        self.index += 1;
        event
    }
}

/// Transcribe audio as an event stream of `transcription_delta` /
/// `transcription_complete` events.
pub fn listen(
    audio: Vec<u8>,
    agent: AgentDef,
    opts: TranscribeOptions,
) -> ReceiverStream<StreamEvent> {
    let (tx, rx) = mpsc::channel(crate::request::EVENT_CHANNEL_DEPTH);
    tokio::spawn(async move {
        if let Err(err) = drive_listen(&tx, audio, &agent, &opts).await {
            let _ = tx.send(error_event(&err)).await;
        }
    });
    ReceiverStream::new(rx)
}

async fn drive_listen(
    tx: &mpsc::Sender<StreamEvent>,
    audio: Vec<u8>,
    agent: &AgentDef,
    opts: &TranscribeOptions,
) -> anyhow::Result<()> {
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;
    let model = resolve_for(agent, Capability::Transcription)?;
    let provider = get_model_provider(&model)?;

    let stream_model = model.clone();
    let stream_opts = opts.clone();
    let mut stream = retry_stream(RetryOptions::default(), agent.abort.clone(), move || {
        let provider = Arc::clone(&provider);
        let audio = audio.clone();
        let model = stream_model.clone();
        let opts = stream_opts.clone();
        Box::pin(async move { provider.create_transcription(audio, &model, &opts).await })
    });

    while let Some(event) = stream.next().await {
        let event = event?;
        match event.payload.clone() {
            EventPayload::CostUpdate { usage } => {
                let entry = record(agent, &model, usage);
                if !bus::has_event_handler() {
                    send_event(
                        tx,
                        agent,
                        &model,
                        StreamEvent::new(EventPayload::CostUpdate { usage: entry }),
                    )
                    .await?;
                }
            }
            _ => send_event(tx, agent, &model, event).await?,
        }
    }
    Ok(())
}

/// Embed inputs, returning one vector per input.
pub async fn embed(
    inputs: Vec<String>,
    agent: &AgentDef,
    opts: &EmbedOptions,
) -> anyhow::Result<Vec<Vec<f32>>> {
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;
    let model = resolve_for(agent, Capability::Embedding)?;
    let provider = get_model_provider(&model)?;

    let output = retry(&RetryOptions::default(), agent.abort.as_ref(), || {
        provider.create_embedding(inputs.clone(), &model, opts)
    })
    .await?;

    let usage = UsageEntry::new(&model, output.input_tokens, 0)
        .with_metadata("inputs", json!(inputs.len()));
    record(agent, &model, usage);
    Ok(output.vectors)
}

/// Generate images, returning data URLs or hosted URLs.
pub async fn image(
    prompt: &str,
    agent: &AgentDef,
    opts: &ImageOptions,
) -> anyhow::Result<Vec<String>> {
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;
    let model = resolve_for(agent, Capability::Image)?;
    let provider = get_model_provider(&model)?;

    let images = retry(&RetryOptions::default(), agent.abort.as_ref(), || {
        provider.create_image(prompt, &model, opts)
    })
    .await?;

    let usage = UsageEntry::new(&model, (prompt.len() / 4).max(1) as u64, 0)
        .with_metadata("images", json!(images.len()));
    record(agent, &model, usage);
    Ok(images)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
