// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The tool-call loop.
//!
//! One *round* = one provider stream plus the execution of whatever tool
//! calls it produced.  Rounds repeat, with the tool results appended to
//! history, until the model answers without tool calls or the round cap is
//! reached.  Text deltas pass through the delta buffer on the way out; usage
//! goes to the cost tracker; everything the consumer sees is also mirrored
//! to the global event bus when a handler is installed.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use chorus_model::{
    ChatRequest, EventPayload, EventStream, Provider, StreamEvent, ToolCall, ToolResult,
};
use chorus_tools::{find_tool, map_arguments, parse_arguments, process_tool_result, ToolBinding};

use crate::{
    agent::AgentDef,
    bus,
    cost::cost_tracker,
    delta::{buffer_delta, flush_all, flush_message, DeltaBufferOptions, DeltaStore},
    error::OrchestratorError,
    pause::{pause_controller, DEFAULT_PAUSE_POLL},
    retry::{retry_stream, RetryOptions},
};

/// Enrich an event with the agent snapshot, mirror it to the bus, and send
/// it downstream.  A closed channel means the consumer is gone; surface that
/// as an abort so the loop unwinds promptly.
pub(crate) async fn send_event(
    tx: &mpsc::Sender<StreamEvent>,
    agent: &AgentDef,
    model: &str,
    mut event: StreamEvent,
) -> anyhow::Result<()> {
    event.agent = Some(agent.snapshot(Some(model)));
    if bus::has_event_handler() {
        bus::emit(event.clone(), Some(agent), Some(model));
    }
    tx.send(event)
        .await
        .map_err(|_| anyhow::Error::new(OrchestratorError::aborted()))
}

/// Pull the next stream item, observing the abort token at the suspension
/// point.
async fn next_item(
    stream: &mut EventStream,
    abort: Option<&CancellationToken>,
) -> anyhow::Result<Option<anyhow::Result<StreamEvent>>> {
    match abort {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(OrchestratorError::aborted().into()),
                item = stream.next() => Ok(item),
            }
        }
        None => Ok(stream.next().await),
    }
}

/// Record usage in the process-wide tracker and deliver the priced entry to
/// exactly one side: the bus when a handler is installed, nowhere otherwise
/// (the facade forwards the final entry at `agent_done`).
fn record_usage(agent: &AgentDef, model: &str, usage: chorus_model::UsageEntry) {
    let entry = cost_tracker().add_usage(usage);
    if bus::has_event_handler() {
        bus::emit(
            StreamEvent::new(EventPayload::CostUpdate { usage: entry }),
            Some(agent),
            Some(model),
        );
    }
}

/// Drive the provider ↔ tool loop to completion for one invocation attempt.
/// Returns the final assistant text, when the model produced one.
pub(crate) async fn run_tool_loop(
    tx: &mpsc::Sender<StreamEvent>,
    agent: &AgentDef,
    model: &str,
    provider: Arc<dyn Provider>,
    history: &mut crate::history::MessageHistory,
) -> anyhow::Result<Option<String>> {
    let retry_opts = RetryOptions::default();
    let delta_opts = DeltaBufferOptions::default();
    let abort = agent.abort.clone();

    let mut executed: usize = 0;
    let mut rounds: usize = 0;
    let mut final_text: Option<String> = None;

    loop {
        rounds += 1;

        // Re-check pause before every upstream call.
        pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, abort.as_ref()).await?;

        let mut settings = agent.settings.clone();
        if rounds > 1 {
            // A forced tool choice applies to the first round only; keeping
            // it would make the model call the same tool forever.
            settings.tool_choice = None;
        }
        let request = ChatRequest {
            model: model.to_string(),
            messages: history.clone_messages(),
            tools: agent.tools.iter().map(|t| t.definition.schema()).collect(),
            settings,
        };

        let stream_provider = Arc::clone(&provider);
        let mut stream = retry_stream(retry_opts.clone(), abort.clone(), move || {
            let provider = Arc::clone(&stream_provider);
            let request = request.clone();
            Box::pin(async move { provider.create_response_stream(request).await })
        });

        let mut store = DeltaStore::new();
        let mut orders: HashMap<String, u64> = HashMap::new();
        let mut round_calls: Vec<ToolCall> = Vec::new();
        let mut round_text: Option<String> = None;

        while let Some(item) = next_item(&mut stream, abort.as_ref()).await? {
            let event = item?;

            // A pause lands between provider events as well, so mid-stream
            // pauses stop delivery promptly.
            pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, abort.as_ref()).await?;

            match event.payload.clone() {
                EventPayload::MessageDelta { message_id, content, .. } => {
                    let events =
                        buffer_delta(&mut store, &delta_opts, &message_id, &content, |payload| {
                            let order = orders.entry(message_id.clone()).or_insert(0);
                            let ev = StreamEvent::delta(message_id.clone(), payload, *order);
                            *order += 1;
                            ev
                        });
                    for ev in events {
                        send_event(tx, agent, model, ev).await?;
                    }
                }
                EventPayload::MessageComplete { message_id, content } => {
                    if let Some(rest) = flush_message(&mut store, &message_id) {
                        let order = orders.entry(message_id.clone()).or_insert(0);
                        let ev = StreamEvent::delta(message_id.clone(), rest, *order);
                        *order += 1;
                        send_event(tx, agent, model, ev).await?;
                    }
                    round_text = Some(content.clone());
                    send_event(tx, agent, model, StreamEvent::complete(message_id, content))
                        .await?;
                }
                EventPayload::ToolStart { tool_calls } => {
                    round_calls = tool_calls.clone();
                    send_event(
                        tx,
                        agent,
                        model,
                        StreamEvent::new(EventPayload::ToolStart { tool_calls }),
                    )
                    .await?;
                }
                EventPayload::CostUpdate { usage } => {
                    record_usage(agent, model, usage);
                }
                // Kinds the loop does not interpret are forwarded unchanged.
                _ => send_event(tx, agent, model, event).await?,
            }
        }

        // Anything still buffered for messages that never completed.
        let leftovers = flush_all(&mut store, |message_id, payload| {
            let order = orders.entry(message_id.to_string()).or_insert(0);
            let ev = StreamEvent::delta(message_id, payload, *order);
            *order += 1;
            ev
        });
        for ev in leftovers {
            send_event(tx, agent, model, ev).await?;
        }

        if round_calls.is_empty() {
            final_text = round_text.or(final_text);
            break;
        }

        let results = execute_round(agent, &round_calls, &mut executed).await;

        for result in &results {
            send_event(
                tx,
                agent,
                model,
                StreamEvent::new(EventPayload::ToolResult { result: result.clone() }),
            )
            .await?;
        }

        let pairs: Vec<(ToolCall, Option<ToolResult>)> = round_calls
            .iter()
            .cloned()
            .zip(results.iter().cloned().map(Some))
            .collect();
        history.add_assistant_response(round_text.as_deref().unwrap_or(""), &pairs);
        final_text = round_text.or(final_text);

        send_event(tx, agent, model, StreamEvent::new(EventPayload::ToolDone { results }))
            .await?;

        if rounds >= agent.max_tool_call_rounds_per_turn {
            warn!(rounds, "tool-call round cap reached; ending turn");
            break;
        }
    }

    Ok(final_text)
}

enum Planned<'a> {
    Run(&'a ToolCall),
    /// Over the invocation-wide tool budget: not executed, answered with a
    /// synthetic output instead.
    Skip(&'a ToolCall),
}

/// Execute one round of tool calls, in provider order, respecting the
/// invocation-wide budget and the `sequential_tools` setting.  Results align
/// index-for-index with `calls`.
async fn execute_round(
    agent: &AgentDef,
    calls: &[ToolCall],
    executed: &mut usize,
) -> Vec<ToolResult> {
    let mut planned = Vec::with_capacity(calls.len());
    for call in calls {
        if *executed < agent.max_tool_calls {
            *executed += 1;
            planned.push(Planned::Run(call));
        } else {
            planned.push(Planned::Skip(call));
        }
    }

    if agent.settings.sequential_tools {
        let mut results = Vec::with_capacity(planned.len());
        for plan in &planned {
            results.push(run_planned(agent, plan).await);
        }
        results
    } else {
        futures::future::join_all(planned.iter().map(|plan| run_planned(agent, plan))).await
    }
}

async fn run_planned(agent: &AgentDef, plan: &Planned<'_>) -> ToolResult {
    match plan {
        Planned::Run(call) => execute_one(agent, call).await,
        Planned::Skip(call) => {
            warn!(tool = %call.function.name, "tool budget exhausted; skipping call");
            ToolResult::err(
                call.effective_call_id(),
                call.function.name.clone(),
                format!(
                    "tool budget exhausted: {} calls already executed this invocation",
                    agent.max_tool_calls
                ),
            )
        }
    }
}

async fn execute_one(agent: &AgentDef, call: &ToolCall) -> ToolResult {
    let call_id = call.effective_call_id().to_string();
    let name = call.function.name.clone();

    let Some(tool) = find_tool(&agent.tools, &name) else {
        return ToolResult::err(call_id, name.clone(), format!("Tool not found: {name}"));
    };

    if let Some(hook) = &agent.on_tool_call {
        hook(call);
    }

    let args = match parse_arguments(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => return ToolResult::err(call_id, name, format!("{e}")),
    };

    let outcome = match &tool.binding {
        ToolBinding::Named(f) => f(args).await,
        ToolBinding::Positional(f) => match map_arguments(&tool.params, args) {
            Ok(positional) => f(positional).await,
            Err(e) => return ToolResult::err(call_id, name, format!("{e}")),
        },
    };

    match outcome {
        Ok(output) => {
            ToolResult::ok(call_id, name, process_tool_result(output, tool.allow_summary))
        }
        Err(e) => ToolResult::err(call_id, name, format!("Tool execution failed: {e:#}")),
    }
}
