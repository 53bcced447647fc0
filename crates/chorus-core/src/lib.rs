// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Orchestration core: the streaming request facade, the tool-call loop, and
//! the process-wide coordinators it runs under (pause controller, event bus,
//! cost tracker), plus retry, delta buffering, message history, verification,
//! and the secondary voice/transcription/embedding/image modes.

mod agent;
mod bus;
mod cost;
mod delta;
mod error;
mod history;
mod modes;
mod pause;
mod request;
mod retry;
mod runner;
mod verify;
#[cfg(test)]
mod tests;

pub use agent::{AgentDef, ToolCallHook};
pub use bus::{emit, has_event_handler, set_event_handler, EventHandler};
pub use cost::{cost_tracker, CostTracker, UsageCallback};
pub use delta::{
    buffer_delta, flush_all, flush_message, DeltaBuffer, DeltaBufferOptions, DeltaStore,
};
pub use error::{error_event, ErrorKind, OrchestratorError};
pub use history::{HistoryOptions, MessageHistory};
pub use modes::{embed, image, listen, voice, voice_stream};
pub use pause::{
    is_paused, pause, pause_controller, resume, PauseController, PauseState, DEFAULT_PAUSE_POLL,
};
pub use request::{request, RequestStream, EVENT_CHANNEL_DEPTH};
pub use retry::{backoff_delay, is_retryable_error, retry, retry_stream, RetryOptions};
