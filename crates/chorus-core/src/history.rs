// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Ordered conversation log with bounded trimming and tool-call compaction.
//!
//! Trimming drops the oldest non-system messages first.  The compaction pass
//! that follows keeps assistant + tool-call groups coherent: a
//! `function_call_output` whose `function_call` was trimmed away is dropped,
//! because several providers reject histories that reference unknown call
//! ids.  Both passes are idempotent.

use std::collections::HashSet;

use chorus_model::{Message, ToolCall, ToolResult};

#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// Cap on stored messages.  `None` disables count-based trimming.
    pub max_messages: Option<usize>,
    /// Cap on approximate tokens.  `None` disables token-based trimming.
    pub max_tokens: Option<usize>,
    /// Keep system messages when trimming.
    pub preserve_system_messages: bool,
    /// Run the tool-call compaction pass after every mutation.
    pub compact_tool_calls: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_tokens: None,
            preserve_system_messages: true,
            compact_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
    opts: HistoryOptions,
}

impl MessageHistory {
    pub fn new(initial: Vec<Message>, opts: HistoryOptions) -> Self {
        let mut history = Self { messages: initial, opts };
        history.normalize();
        history
    }

    pub fn with_messages(initial: Vec<Message>) -> Self {
        Self::new(initial, HistoryOptions::default())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clone_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        self.normalize();
    }

    pub fn add_many(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.normalize();
    }

    /// Append one assistant turn: the assistant message (when it carries
    /// content or tool calls), then each `function_call` and, when a result
    /// is present, its paired `function_call_output`.
    pub fn add_assistant_response(
        &mut self,
        content: &str,
        calls: &[(ToolCall, Option<ToolResult>)],
    ) {
        if content.is_empty() && calls.is_empty() {
            return;
        }
        self.messages.push(Message::assistant(content));
        for (call, result) in calls {
            let call_id = call.effective_call_id().to_string();
            self.messages.push(Message::function_call(
                call_id.clone(),
                call.function.name.clone(),
                call.function.arguments.clone(),
            ));
            if let Some(result) = result {
                self.messages.push(Message::function_call_output(
                    call_id,
                    result.name.clone(),
                    result.output.clone(),
                ));
            }
        }
        self.normalize();
    }

    /// True when the most recent assistant turn (bounded by the previous
    /// user message) contains any tool call.
    pub fn last_assistant_had_tool_calls(&self) -> bool {
        for message in self.messages.iter().rev() {
            match message {
                Message::User { .. } => return false,
                Message::FunctionCall { .. } => return true,
                _ => {}
            }
        }
        false
    }

    fn normalize(&mut self) {
        self.trim();
        if self.opts.compact_tool_calls {
            self.compact();
        }
    }

    /// Enforce the message and token caps, keeping system messages (when
    /// preserved) plus the newest tail of everything else.
    fn trim(&mut self) {
        if let Some(cap) = self.opts.max_messages {
            if self.messages.len() > cap {
                let (system, rest): (Vec<Message>, Vec<Message>) = if self.opts.preserve_system_messages
                {
                    self.messages.drain(..).partition(Message::is_system)
                } else {
                    (Vec::new(), self.messages.drain(..).collect())
                };
                let keep = cap.saturating_sub(system.len());
                let tail_start = rest.len().saturating_sub(keep);
                self.messages = system;
                self.messages.extend(rest.into_iter().skip(tail_start));
            }
        }

        if let Some(token_cap) = self.opts.max_tokens {
            let mut total: usize = self.messages.iter().map(Message::approx_tokens).sum();
            while total > token_cap {
                let Some(idx) = self
                    .messages
                    .iter()
                    .position(|m| !(self.opts.preserve_system_messages && m.is_system()))
                else {
                    break;
                };
                total -= self.messages[idx].approx_tokens();
                self.messages.remove(idx);
            }
        }
    }

    /// Drop tool-call records orphaned by trimming.  A `function_call_output`
    /// is kept only when its `function_call` is still present earlier in the
    /// window; intact assistant + tool-call groups pass through unchanged,
    /// making the pass idempotent.
    fn compact(&mut self) {
        let mut seen_calls: HashSet<String> = HashSet::new();
        self.messages.retain(|message| match message {
            Message::FunctionCall { call_id, .. } => {
                seen_calls.insert(call_id.clone());
                true
            }
            Message::FunctionCallOutput { call_id, .. } => seen_calls.contains(call_id),
            _ => true,
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
