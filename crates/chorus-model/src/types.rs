// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ─── Messages ─────────────────────────────────────────────────────────────────

/// A single record in the conversation history.
///
/// Messages are immutable once appended; order is significant.  Tool
/// interactions are stored as `FunctionCall` / `FunctionCallOutput` pairs
/// matched on `call_id`, following the wire format most providers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        /// JSON-encoded argument object, forwarded verbatim.
        arguments: String,
    },
    FunctionCallOutput {
        id: String,
        call_id: String,
        name: String,
        output: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { content: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { content: text.into(), status: None }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::FunctionCall {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn function_call_output(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::FunctionCallOutput {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// Plain text of this message, when it carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } => Some(content),
            Self::Assistant { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Approximate token count using the 4-chars-per-token heuristic.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Self::System { content } | Self::User { content } => content.len(),
            Self::Assistant { content, .. } => content.len(),
            Self::FunctionCall { name, arguments, .. } => name.len() + arguments.len(),
            Self::FunctionCallOutput { output, .. } => output.len(),
        };
        (chars / 4).max(1)
    }
}

// ─── Tool-call wire types ─────────────────────────────────────────────────────

/// The function portion of a tool call: name plus JSON-encoded arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallData {
    pub name: String,
    /// JSON-encoded argument object (may arrive across multiple deltas).
    pub arguments: String,
}

/// A tool invocation requested by the model.
///
/// Providers and intermediate layers may attach fields this crate does not
/// model (e.g. a running-tool id).  Those land in `extra` and survive clones
/// and serde round-trips, so copies never lose information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub function: FunctionCallData,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_id: None,
            function: FunctionCallData { name: name.into(), arguments: arguments.into() },
            extra: serde_json::Map::new(),
        }
    }

    /// The id used to pair this call with its output record.
    pub fn effective_call_id(&self) -> &str {
        self.call_id.as_deref().unwrap_or(&self.id)
    }
}

/// The outcome of executing one tool call, aligned to the call list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), name: name.into(), output: output.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), name: name.into(), output: msg.into(), is_error: true }
    }
}

// ─── Usage accounting ─────────────────────────────────────────────────────────

/// One usage ledger entry.  `cost` is computed from the model's catalog cost
/// vector when the entry is appended to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default)]
    pub cost: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UsageEntry {
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
            cached_tokens: 0,
            metadata: serde_json::Map::new(),
            cost: 0.0,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_cached(mut self, cached_tokens: u64) -> Self {
        self.cached_tokens = cached_tokens;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ─── Provider-facing request types ────────────────────────────────────────────

/// How the model is allowed to use tools for one provider call.
///
/// A forced choice is scoped strictly to the call that carries it: it is
/// never installed as ambient state, so nested invocations made from inside a
/// tool implementation cannot inherit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

/// Sampling and behaviour knobs forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    /// Execute tool calls strictly in order instead of concurrently.
    pub sequential_tools: bool,
    /// Provider-specific verbosity hint (OpenAI `verbosity`).
    pub verbosity: Option<String>,
    /// Provider-specific service tier (OpenAI `service_tier`).
    pub service_tier: Option<String>,
}

/// A tool schema as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// A chat completion request handed to a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub settings: ModelSettings,
}

// ─── Secondary-mode options ───────────────────────────────────────────────────

/// Options for voice synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceOptions {
    /// Provider voice identifier; the adapter default is used when unset.
    pub voice: Option<String>,
    /// Output container: `mp3`, `opus`, `wav`, `pcm`, ...
    pub response_format: Option<String>,
    pub speed: Option<f32>,
}

/// PCM stream parameters advertised in the `audio_stream` descriptor so
/// consumers can play raw audio without probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmParameters {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for PcmParameters {
    fn default() -> Self {
        Self { sample_rate: 24_000, channels: 1, bit_depth: 16 }
    }
}

/// Options for audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub prompt: Option<String>,
}

/// Options for embedding generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedOptions {
    pub dimensions: Option<u32>,
}

/// Options for image generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    pub size: Option<String>,
    pub quality: Option<String>,
    pub n: Option<u32>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
