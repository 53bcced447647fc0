// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chorus_model::{EventPayload, StreamEvent};

/// Classified failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderNotFound,
    ProviderAuthFailed,
    ProviderRateLimit,
    ProviderQuotaExceeded,
    ToolNotFound,
    ToolExecutionFailed,
    ToolTimeout,
    ToolValidationFailed,
    MaxToolCallsExceeded,
    LoopTimeout,
    InvalidRequest,
    PauseAbort,
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderNotFound => "provider_not_found",
            Self::ProviderAuthFailed => "provider_auth_failed",
            Self::ProviderRateLimit => "provider_rate_limit",
            Self::ProviderQuotaExceeded => "provider_quota_exceeded",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolExecutionFailed => "tool_execution_failed",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolValidationFailed => "tool_validation_failed",
            Self::MaxToolCallsExceeded => "max_tool_calls_exceeded",
            Self::LoopTimeout => "loop_timeout",
            Self::InvalidRequest => "invalid_request",
            Self::PauseAbort => "pause_abort",
            Self::Unknown => "unknown",
        }
    }
}

/// An orchestration failure carrying its classification.
///
/// User-visible failures are always delivered to stream consumers as a
/// terminal `error` event rather than a panic or a throw across the channel;
/// [`OrchestratorError::to_event`] builds that event.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
    pub recoverable: bool,
}

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None, recoverable: false }
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The distinguished error raised when an abort fires during a pause
    /// wait or a retry sleep.
    pub fn aborted() -> Self {
        Self::new(ErrorKind::PauseAbort, "request aborted by caller")
    }

    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::PauseAbort
    }

    /// Render as a terminal stream event.
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::new(EventPayload::Error {
            error: self.message.clone(),
            code: Some(self.kind.code().to_string()),
            details: self.details.clone(),
            recoverable: Some(self.recoverable),
        })
    }
}

/// Convert any failure into a terminal error event, preserving the
/// classification when the source is an [`OrchestratorError`].
pub fn error_event(err: &anyhow::Error) -> StreamEvent {
    match err.downcast_ref::<OrchestratorError>() {
        Some(oe) => oe.to_event(),
        None => StreamEvent::new(EventPayload::Error {
            error: err.to_string(),
            code: Some(ErrorKind::Unknown.code().to_string()),
            details: None,
            recoverable: Some(false),
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
