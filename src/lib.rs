// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! chorus: provider-agnostic LLM orchestration runtime.
//!
//! One streaming request API in front of heterogeneous upstream providers
//! (chat, voice, transcription, embeddings, image generation), with a
//! tool-call loop, process-wide pause/abort, per-delta buffering, retry with
//! backoff, cost accounting, and optional output verification.
//!
//! ```no_run
//! use chorus::{request, AgentDef, Message};
//! use futures::StreamExt;
//!
//! # async fn demo() {
//! let agent = AgentDef::new("assistant").with_model_class("standard");
//! let mut events = request(vec![Message::user("Hello")], agent);
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

// ── Core request API ─────────────────────────────────────────────────────────
pub use chorus_core::{request, AgentDef, RequestStream, ToolCallHook};

// ── Secondary modes ──────────────────────────────────────────────────────────
pub use chorus_core::{embed, image, listen, voice, voice_stream};

// ── Pause control ────────────────────────────────────────────────────────────
pub use chorus_core::{is_paused, pause, pause_controller, resume, PauseController, PauseState};

// ── Event bus ────────────────────────────────────────────────────────────────
pub use chorus_core::{has_event_handler, set_event_handler, EventHandler};

// ── Cost accounting ──────────────────────────────────────────────────────────
pub use chorus_core::{cost_tracker, CostTracker, UsageCallback};

// ── Errors ───────────────────────────────────────────────────────────────────
pub use chorus_core::{ErrorKind, OrchestratorError};

// ── History & retry building blocks ──────────────────────────────────────────
pub use chorus_core::{
    DeltaBuffer, DeltaBufferOptions, HistoryOptions, MessageHistory, RetryOptions,
};

// ── Capability checks & model classes ────────────────────────────────────────
pub use chorus_model::{
    add_model_to_class, can_run_agent, get_all_model_classes, get_model_class,
    override_model_class, remove_model_from_class, set_model_class_models, set_model_class_random,
    update_model_classes, CapabilityReport, ModelClass, ModelSpec,
};

// ── Model & event data types ─────────────────────────────────────────────────
pub use chorus_model::{
    catalog, classes, registry, AgentSnapshot, Capability, EventPayload, InputModality, Message,
    ModelCost, ModelEntry, ModelFeatures, ModelSettings, Provider, StreamEvent, ToolCall,
    ToolChoice, ToolResult, UsageEntry, VoiceOptions, VoiceOutput,
};
pub use chorus_model::{
    EmbedOptions, ImageOptions, MockProvider, ScriptedProvider, TranscribeOptions,
};

// ── Tools ────────────────────────────────────────────────────────────────────
pub use chorus_tools::{
    map_arguments, parse_arguments, process_tool_result, ParamSpec, Tool, ToolFunction,
    MAX_RESULT_CHARS,
};
