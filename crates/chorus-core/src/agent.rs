// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chorus_model::{AgentSnapshot, Message, ModelSettings, ToolCall};
use chorus_tools::Tool;

/// Hook invoked before each tool execution.
pub type ToolCallHook = Arc<dyn Fn(&ToolCall) + Send + Sync>;

/// Caller-supplied configuration for one invocation.
///
/// Either `model` names a concrete model or `model_class` names a group; an
/// explicit model always wins.  With neither set, the `standard` class is
/// used.
#[derive(Clone)]
pub struct AgentDef {
    pub agent_id: String,
    pub name: String,
    /// Free-form labels propagated into event snapshots.
    pub tags: Vec<String>,
    pub model: Option<String>,
    pub model_class: Option<String>,
    /// When set, fully supersedes the caller-supplied messages for this
    /// invocation.
    pub history_thread: Option<Vec<Message>>,
    pub tools: Vec<Tool>,
    pub on_tool_call: Option<ToolCallHook>,
    /// Total tool executions allowed across the whole invocation.
    pub max_tool_calls: usize,
    /// Sequential provider rounds allowed per turn.
    pub max_tool_call_rounds_per_turn: usize,
    /// Secondary agent that grades the final output.
    pub verifier: Option<Box<AgentDef>>,
    pub max_verification_attempts: usize,
    pub settings: ModelSettings,
    pub abort: Option<CancellationToken>,
}

impl AgentDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent_id: Uuid::new_v4().to_string(),
            name: name.into(),
            tags: Vec::new(),
            model: None,
            model_class: None,
            history_thread: None,
            tools: Vec::new(),
            on_tool_call: None,
            max_tool_calls: 200,
            max_tool_call_rounds_per_turn: 10,
            verifier: None,
            max_verification_attempts: 2,
            settings: ModelSettings::default(),
            abort: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_model_class(mut self, class: impl Into<String>) -> Self {
        self.model_class = Some(class.into());
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_verifier(mut self, verifier: AgentDef, max_attempts: usize) -> Self {
        self.verifier = Some(Box::new(verifier));
        self.max_verification_attempts = max_attempts;
        self
    }

    /// Identity snapshot attached to events.  `model_override` wins over the
    /// agent's own model field.
    pub fn snapshot(&self, model_override: Option<&str>) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            model: model_override
                .map(str::to_string)
                .or_else(|| self.model.clone())
                .unwrap_or_default(),
            tags: self.tags.clone(),
        }
    }
}

impl std::fmt::Debug for AgentDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDef")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("model_class", &self.model_class)
            .field("tools", &self.tools.len())
            .field("max_tool_calls", &self.max_tool_calls)
            .field("max_tool_call_rounds_per_turn", &self.max_tool_call_rounds_per_turn)
            .finish_non_exhaustive()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
