// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Shared adapter for OpenAI-compatible APIs.
//!
//! Every chat provider this crate ships speaks the `/chat/completions` SSE
//! wire format: OpenAI natively, Anthropic and Google through their
//! OpenAI-compatible endpoints, xAI / DeepSeek / OpenRouter by design.  One
//! `OpenAiCompatProvider` configured with a base URL, key variable, and
//! extra headers covers them all.  The OpenAI instance additionally serves
//! voice, transcription, embeddings, and image generation.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    events::{EventPayload, StreamEvent},
    provider::{Capability, EmbedOutput, EventStream, Provider, VoiceOutput},
    types::{
        ChatRequest, EmbedOptions, FunctionCallData, ImageOptions, Message, ToolCall, ToolChoice,
        TranscribeOptions, UsageEntry, VoiceOptions,
    },
};

const CHAT_ONLY: &[Capability] = &[Capability::Chat];
const FULL: &[Capability] = &[
    Capability::Chat,
    Capability::Voice,
    Capability::Transcription,
    Capability::Embedding,
    Capability::Image,
];

pub struct OpenAiCompatProvider {
    /// Provider id returned by [`Provider::id`]; matches the catalog.
    driver_name: &'static str,
    /// API base ending before `/chat/completions`.
    base_url: String,
    /// Environment variable the API key is read from at request time, so a
    /// key exported after startup is picked up without reconstruction.
    key_env: &'static str,
    capabilities: &'static [Capability],
    /// Additional headers sent on every request (e.g. OpenRouter attribution).
    extra_headers: Vec<(&'static str, String)>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    fn new(
        driver_name: &'static str,
        base_url: &str,
        key_env: &'static str,
        capabilities: &'static [Capability],
        extra_headers: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            driver_name,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_env,
            capabilities,
            extra_headers,
            client: reqwest::Client::new(),
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", "https://api.openai.com/v1", "OPENAI_API_KEY", FULL, vec![])
    }

    /// Anthropic's OpenAI-compatible endpoint.
    pub fn anthropic() -> Self {
        Self::new("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY", CHAT_ONLY, vec![])
    }

    /// Google's OpenAI-compatible Gemini endpoint.
    pub fn google() -> Self {
        Self::new(
            "google",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "GOOGLE_API_KEY",
            CHAT_ONLY,
            vec![],
        )
    }

    pub fn xai() -> Self {
        Self::new("xai", "https://api.x.ai/v1", "XAI_API_KEY", CHAT_ONLY, vec![])
    }

    pub fn deepseek() -> Self {
        Self::new("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY", CHAT_ONLY, vec![])
    }

    pub fn openrouter() -> Self {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
            CHAT_ONLY,
            vec![
                ("HTTP-Referer", "https://github.com/chorus-rt/chorus".to_string()),
                ("X-Title", "chorus".to_string()),
            ],
        )
    }

    fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(self.key_env)
            .with_context(|| format!("API key not set: export {}", self.key_env))
    }

    fn post(&self, path: &str) -> anyhow::Result<reqwest::RequestBuilder> {
        let mut req = self.client.post(format!("{}{path}", self.base_url)).bearer_auth(self.api_key()?);
        for (name, value) in &self.extra_headers {
            req = req.header(*name, value.as_str());
        }
        Ok(req)
    }

    fn chat_body(&self, req: &ChatRequest) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": build_wire_messages(&req.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        // Reasoning-model families reject sampling parameters.
        let sampling_ok = !(self.driver_name == "openai"
            && (req.model.starts_with("o1")
                || req.model.starts_with("o3")
                || req.model.starts_with("o4")
                || req.model.starts_with("gpt-5")));
        if sampling_ok {
            if let Some(t) = req.settings.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(p) = req.settings.top_p {
                body["top_p"] = json!(p);
            }
        }
        if let Some(max) = req.settings.max_tokens {
            // OpenAI renamed the field for current models; everyone else
            // still speaks max_tokens.
            let key = if self.driver_name == "openai" { "max_completion_tokens" } else { "max_tokens" };
            body[key] = json!(max);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            if let Some(choice) = &req.settings.tool_choice {
                body["tool_choice"] = match choice {
                    ToolChoice::Auto => json!("auto"),
                    ToolChoice::None => json!("none"),
                    ToolChoice::Required => json!("required"),
                    ToolChoice::Function { name } => {
                        json!({ "type": "function", "function": { "name": name } })
                    }
                };
            }
        }
        if let Some(tier) = &req.settings.service_tier {
            body["service_tier"] = json!(tier);
        }
        if let Some(v) = &req.settings.verbosity {
            body["verbosity"] = json!(v);
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        self.driver_name
    }

    fn capabilities(&self) -> &[Capability] {
        self.capabilities
    }

    async fn create_response_stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let body = self.chat_body(&req);
        debug!(
            driver = %self.driver_name,
            model = %req.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending chat completion request"
        );

        let resp = self
            .post("/chat/completions")?
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.driver_name);
        }

        let model = req.model.clone();
        let stream = async_stream::stream! {
            let mut bytes = resp.bytes_stream();
            let mut state = SseState::new(model);
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(b) => {
                        state.buf.push_str(&String::from_utf8_lossy(&b));
                        // SSE events can be split across TCP packets; emit
                        // events only for complete newline-terminated lines.
                        while let Some(line) = state.next_line() {
                            for ev in state.handle_line(&line) {
                                yield ev;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("stream read failed"));
                        return;
                    }
                }
            }
            for ev in state.finish() {
                yield ev;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn create_voice(
        &self,
        text: &str,
        model: &str,
        opts: &VoiceOptions,
    ) -> anyhow::Result<VoiceOutput> {
        let mut body = json!({
            "model": model,
            "input": text,
            "voice": opts.voice.as_deref().unwrap_or("alloy"),
        });
        if let Some(format) = &opts.response_format {
            body["response_format"] = json!(format);
        }
        if let Some(speed) = opts.speed {
            body["speed"] = json!(speed);
        }

        let resp = self
            .post("/audio/speech")?
            .json(&body)
            .send()
            .await
            .context("voice synthesis request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("{} error {status}: {}", self.driver_name, resp.text().await.unwrap_or_default());
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::new));
        Ok(VoiceOutput::Stream(Box::pin(bytes)))
    }

    async fn create_transcription(
        &self,
        audio: Vec<u8>,
        model: &str,
        opts: &TranscribeOptions,
    ) -> anyhow::Result<EventStream> {
        let audio_len = audio.len() as u64;
        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            )
            .text("model", model.to_string());
        if let Some(lang) = &opts.language {
            form = form.text("language", lang.clone());
        }
        if let Some(prompt) = &opts.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let resp = self
            .post("/audio/transcriptions")?
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("{} error {status}: {}", self.driver_name, resp.text().await.unwrap_or_default());
        }

        let body: Value = resp.json().await.context("transcription response was not JSON")?;
        let text = body["text"].as_str().unwrap_or_default().to_string();
        let usage = UsageEntry::new(model, audio_len / 1000, (text.len() / 4) as u64)
            .with_metadata("mode", json!("transcription"));
        let events: Vec<anyhow::Result<StreamEvent>> = vec![
            Ok(StreamEvent::new(EventPayload::TranscriptionComplete { text })),
            Ok(StreamEvent::new(EventPayload::CostUpdate { usage })),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn create_embedding(
        &self,
        input: Vec<String>,
        model: &str,
        opts: &EmbedOptions,
    ) -> anyhow::Result<EmbedOutput> {
        let mut body = json!({ "model": model, "input": input });
        if let Some(dims) = opts.dimensions {
            body["dimensions"] = json!(dims);
        }

        let resp = self
            .post("/embeddings")?
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("{} error {status}: {}", self.driver_name, resp.text().await.unwrap_or_default());
        }

        let body: Value = resp.json().await.context("embedding response was not JSON")?;
        let mut vectors = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for item in data {
                let v: Vec<f32> = item["embedding"]
                    .as_array()
                    .map(|a| a.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
                    .unwrap_or_default();
                vectors.push(v);
            }
        }
        let input_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        Ok(EmbedOutput { vectors, input_tokens })
    }

    async fn create_image(
        &self,
        prompt: &str,
        model: &str,
        opts: &ImageOptions,
    ) -> anyhow::Result<Vec<String>> {
        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "n": opts.n.unwrap_or(1),
        });
        if let Some(size) = &opts.size {
            body["size"] = json!(size);
        }
        if let Some(quality) = &opts.quality {
            body["quality"] = json!(quality);
        }
        // dall-e-3 defaults to hosted URLs; request base64 so callers get a
        // self-contained result.  gpt-image-1 always returns base64.
        if model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }

        let resp = self
            .post("/images/generations")?
            .json(&body)
            .send()
            .await
            .context("image generation request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("{} error {status}: {}", self.driver_name, resp.text().await.unwrap_or_default());
        }

        let body: Value = resp.json().await.context("image response was not JSON")?;
        let mut images = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for item in data {
                if let Some(b64) = item["b64_json"].as_str() {
                    images.push(format!("data:image/png;base64,{b64}"));
                } else if let Some(url) = item["url"].as_str() {
                    images.push(url.to_string());
                }
            }
        }
        Ok(images)
    }
}

// ─── SSE parsing ─────────────────────────────────────────────────────────────

struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

struct SseState {
    model: String,
    buf: String,
    message_id: Option<String>,
    text: String,
    order: u64,
    /// Parallel tool calls accumulate keyed by the provider's `index` field.
    pending_calls: BTreeMap<u64, PendingToolCall>,
    finished: bool,
}

impl SseState {
    fn new(model: String) -> Self {
        Self {
            model,
            buf: String::new(),
            message_id: None,
            text: String::new(),
            order: 0,
            pending_calls: BTreeMap::new(),
            finished: false,
        }
    }

    /// Pop the next complete line; an unterminated tail stays buffered.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.find('\n')?;
        let line = self.buf[..pos].trim_end_matches('\r').to_string();
        self.buf.drain(..=pos);
        Some(line)
    }

    fn handle_line(&mut self, line: &str) -> Vec<anyhow::Result<StreamEvent>> {
        let Some(data) = line.strip_prefix("data: ") else { return vec![] };
        let data = data.trim();
        if data.is_empty() {
            return vec![];
        }
        if data == "[DONE]" {
            return self.finish();
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            warn!(model = %self.model, "dropping unparseable SSE chunk");
            return vec![];
        };
        self.handle_chunk(&chunk)
    }

    fn handle_chunk(&mut self, chunk: &Value) -> Vec<anyhow::Result<StreamEvent>> {
        // Usage-only chunk (stream_options.include_usage).  OpenAI reports
        // cached tokens under prompt_tokens_details; DeepSeek V3 reports
        // prompt_cache_hit_tokens at the usage root; accept both.
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            let cached = usage
                .pointer("/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
                .or_else(|| usage.get("prompt_cache_hit_tokens").and_then(Value::as_u64))
                .unwrap_or(0);
            let entry = UsageEntry::new(
                self.model.clone(),
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            )
            .with_cached(cached);
            return vec![Ok(StreamEvent::new(EventPayload::CostUpdate { usage: entry }))];
        }

        if self.message_id.is_none() {
            if let Some(id) = chunk["id"].as_str() {
                self.message_id = Some(id.to_string());
            }
        }

        let delta = &chunk["choices"][0]["delta"];

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                let entry = self.pending_calls.entry(index).or_insert_with(|| PendingToolCall {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if let Some(id) = tc["id"].as_str().filter(|s| !s.is_empty()) {
                    entry.id = id.to_string();
                }
                if let Some(name) = tc.pointer("/function/name").and_then(Value::as_str) {
                    if !name.is_empty() {
                        entry.name = name.to_string();
                    }
                }
                if let Some(args) = tc.pointer("/function/arguments").and_then(Value::as_str) {
                    entry.args_buf.push_str(args);
                }
            }
            return vec![];
        }

        if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
            self.text.push_str(content);
            let ev = StreamEvent::delta(self.current_message_id(), content, self.order);
            self.order += 1;
            return vec![Ok(ev)];
        }

        vec![]
    }

    /// Flush terminal events: the completed message text, then the
    /// accumulated tool-call list.
    fn finish(&mut self) -> Vec<anyhow::Result<StreamEvent>> {
        if self.finished {
            return vec![];
        }
        self.finished = true;

        let mut out = Vec::new();
        if !self.text.is_empty() {
            out.push(Ok(StreamEvent::complete(
                self.current_message_id(),
                std::mem::take(&mut self.text),
            )));
        }
        let pending = std::mem::take(&mut self.pending_calls);
        let mut calls = Vec::new();
        for (i, (_, p)) in pending.into_iter().enumerate() {
            // A call with no name cannot be dispatched; storing it would
            // corrupt the history sent back on the next round.
            if p.name.is_empty() {
                warn!(tool_call_id = %p.id, "dropping tool call with empty name from model");
                continue;
            }
            let id = if p.id.is_empty() { format!("tc_synthetic_{i}") } else { p.id };
            calls.push(ToolCall {
                id: id.clone(),
                call_id: Some(id),
                function: FunctionCallData { name: p.name, arguments: p.args_buf },
                extra: serde_json::Map::new(),
            });
        }
        if !calls.is_empty() {
            out.push(Ok(StreamEvent::new(EventPayload::ToolStart { tool_calls: calls })));
        }
        out
    }

    fn current_message_id(&self) -> String {
        self.message_id.clone().unwrap_or_else(|| "msg_0".to_string())
    }
}

/// Serialize conversation messages into the OpenAI wire shape.  Consecutive
/// `FunctionCall` records merge into a single assistant message carrying the
/// whole parallel tool-call batch, which is what the wire format requires.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            Message::System { content } => out.push(json!({ "role": "system", "content": content })),
            Message::User { content } => out.push(json!({ "role": "user", "content": content })),
            Message::Assistant { content, .. } => {
                out.push(json!({ "role": "assistant", "content": content }))
            }
            Message::FunctionCall { call_id, name, arguments, .. } => {
                let call = json!({
                    "id": call_id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                });
                let can_merge = matches!(
                    out.last(),
                    Some(last) if last["role"] == "assistant" && last.get("tool_calls").is_some()
                );
                if can_merge {
                    let last = out.last_mut().expect("just matched");
                    last["tool_calls"]
                        .as_array_mut()
                        .expect("tool_calls is an array")
                        .push(call);
                } else {
                    out.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": [call],
                    }));
                }
            }
            Message::FunctionCallOutput { call_id, output, .. } => out.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": output,
            })),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
