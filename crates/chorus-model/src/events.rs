// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Stream event envelope shared by providers, the request engine, and the
//! global event bus.
//!
//! Every event is a JSON-serializable record with a `type` discriminator,
//! an ISO-8601 timestamp, and (once the request engine has enriched it) an
//! agent snapshot.  Consumers switch on `type`; kinds they do not recognise
//! are forwarded unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{PcmParameters, ToolCall, ToolResult, UsageEntry};

/// Identity of the agent an event belongs to, attached by the request engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub name: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The kind-specific body of a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    AgentStart {
        request_id: String,
    },
    MessageDelta {
        message_id: String,
        content: String,
        /// Monotonically increasing within one message.
        order: u64,
    },
    MessageComplete {
        message_id: String,
        content: String,
    },
    ToolStart {
        tool_calls: Vec<ToolCall>,
    },
    /// A single tool finished; emitted per call, in provider order.
    ToolResult {
        result: ToolResult,
    },
    /// All tools of one round finished; results aligned to the call list.
    ToolDone {
        results: Vec<ToolResult>,
    },
    CostUpdate {
        usage: UsageEntry,
    },
    AudioStream {
        format: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pcm_parameters: Option<PcmParameters>,
        /// Base64 audio payload; absent on the initial descriptor event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_final: Option<bool>,
    },
    TranscriptionDelta {
        delta: String,
    },
    TranscriptionComplete {
        text: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recoverable: Option<bool>,
    },
    AgentDone {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

/// The event envelope: payload + timestamp + optional agent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentSnapshot>,
}

impl StreamEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self { payload, timestamp: Utc::now(), agent: None }
    }

    pub fn delta(message_id: impl Into<String>, content: impl Into<String>, order: u64) -> Self {
        Self::new(EventPayload::MessageDelta {
            message_id: message_id.into(),
            content: content.into(),
            order,
        })
    }

    pub fn complete(message_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(EventPayload::MessageComplete {
            message_id: message_id.into(),
            content: content.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error {
            error: message.into(),
            code: None,
            details: None,
            recoverable: None,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, EventPayload::Error { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self.payload, EventPayload::AgentDone { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
