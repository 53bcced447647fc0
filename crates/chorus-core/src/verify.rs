// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Output verification.
//!
//! When an agent carries a `verifier`, the final assistant text of each
//! attempt is graded by a nested invocation of that sub-agent.  A failing
//! grade re-runs the main invocation, with the critique appended as a
//! system message, up to `max_verification_attempts`.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::warn;

use chorus_model::{EventPayload, Message, Provider, StreamEvent};

use crate::{agent::AgentDef, history::MessageHistory, runner::run_tool_loop};

const GRADING_PROMPT: &str = "You are a strict verifier. Grade the candidate response you are \
given. Reply with a JSON object of the form {\"status\": \"pass\"} or \
{\"status\": \"fail\", \"reason\": \"what is wrong\"} and nothing else.";

enum Verdict {
    Pass,
    Fail(String),
}

/// Run the tool loop once, or, when a verifier is configured, up to
/// `max_verification_attempts` times, feeding each rejection back into the
/// next attempt.  Returns the accepted (or last) final text.
pub(crate) async fn run_with_verification(
    tx: &tokio::sync::mpsc::Sender<StreamEvent>,
    agent: &AgentDef,
    model: &str,
    provider: Arc<dyn Provider>,
    initial_messages: Vec<Message>,
) -> anyhow::Result<Option<String>> {
    let Some(verifier) = agent.verifier.as_deref() else {
        let mut history = MessageHistory::with_messages(initial_messages);
        return run_tool_loop(tx, agent, model, provider, &mut history).await;
    };

    let attempts = agent.max_verification_attempts.max(1);
    let mut critiques: Vec<Message> = Vec::new();
    let mut last_text: Option<String> = None;

    for attempt in 1..=attempts {
        let mut messages = initial_messages.clone();
        messages.extend(critiques.iter().cloned());
        let mut history = MessageHistory::with_messages(messages);

        let text =
            run_tool_loop(tx, agent, model, Arc::clone(&provider), &mut history).await?;
        let Some(text) = text else {
            // Nothing to grade.
            return Ok(None);
        };

        match grade(verifier, &text).await {
            Verdict::Pass => return Ok(Some(text)),
            Verdict::Fail(reason) => {
                warn!(attempt, %reason, "verifier rejected the response");
                critiques.push(Message::system(format!(
                    "A verifier rejected your previous response: {reason}\n\
                     Address the critique and respond again."
                )));
                last_text = Some(text);
            }
        }
    }
    // Attempts exhausted: deliver the last answer rather than nothing.
    Ok(last_text)
}

/// Grade `output` with a nested facade invocation of the verifier agent.
async fn grade(verifier: &AgentDef, output: &str) -> Verdict {
    let messages = vec![
        Message::system(GRADING_PROMPT),
        Message::user(format!("Candidate response to grade:\n\n{output}")),
    ];
    let mut verifier_agent = verifier.clone();
    // Verifiers do not verify themselves.
    verifier_agent.verifier = None;

    let mut stream = crate::request::request(messages, verifier_agent);
    let mut text: Option<String> = None;
    while let Some(event) = stream.next().await {
        match event.payload {
            EventPayload::MessageComplete { content, .. } => text = Some(content),
            EventPayload::AgentDone { content: Some(content) } => text = Some(content),
            EventPayload::Error { error, .. } => {
                warn!(%error, "verifier invocation failed; accepting output unverified");
                return Verdict::Pass;
            }
            _ => {}
        }
    }
    parse_verdict(text.as_deref())
}

/// Lenient verdict parse: a well-formed JSON object wins; otherwise the
/// word "fail" anywhere in the reply counts as a rejection.
fn parse_verdict(text: Option<&str>) -> Verdict {
    let Some(text) = text else { return Verdict::Pass };

    if let Some(value) = extract_json_object(text) {
        if let Some(status) = value["status"].as_str() {
            return if status.eq_ignore_ascii_case("fail") {
                let reason = value["reason"].as_str().unwrap_or("no reason given").to_string();
                Verdict::Fail(reason)
            } else {
                Verdict::Pass
            };
        }
    }
    if text.to_lowercase().contains("fail") {
        Verdict::Fail(text.trim().to_string())
    } else {
        Verdict::Pass
    }
}

fn extract_json_object(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    serde_json::from_str(&text[start..=end]).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
