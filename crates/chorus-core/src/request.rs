// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The public streaming entry point.
//!
//! `request` spawns the orchestration task and hands back a stream fed by a
//! bounded channel: the producer cannot run ahead of a slow consumer past
//! the channel depth, and cancellation is observable at every suspension
//! point.  Delivery is additionally gated on the pause flag, so a pause
//! stops events that were already buffered, not just future provider calls.
//! Failures never cross the channel as panics; the consumer always sees a
//! terminal `error` event instead.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use chorus_model::{
    registry::get_model_provider, resolve_model, Capability, EventPayload, Message, StreamEvent,
};

use crate::{
    agent::AgentDef,
    bus,
    cost::cost_tracker,
    error::{error_event, ErrorKind, OrchestratorError},
    pause::{pause_controller, DEFAULT_PAUSE_POLL},
    runner::send_event,
    verify::run_with_verification,
};

/// Producer-side buffer depth for one invocation's event channel.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

/// The event stream handed to callers.
pub type RequestStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Run one agent invocation and stream its events.
///
/// The returned stream yields every event of the invocation and ends after
/// `agent_done`, or after a terminal `error` event on failure or abort.
pub fn request(messages: Vec<Message>, agent: AgentDef) -> RequestStream {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let abort = agent.abort.clone();
    let producer_agent = agent.clone();
    tokio::spawn(async move {
        if let Err(err) = drive(&tx, messages, &producer_agent).await {
            let mut event = error_event(&err);
            event.agent = Some(producer_agent.snapshot(None));
            if bus::has_event_handler() {
                bus::emit(event.clone(), Some(&producer_agent), None);
            }
            let _ = tx.send(event).await;
        }
    });

    let gated = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            // Hold buffered events while paused; terminal errors (including
            // the abort notice itself) always pass.
            if !event.is_error() {
                let wait = pause_controller()
                    .wait_while_paused(DEFAULT_PAUSE_POLL, abort.as_ref())
                    .await;
                if wait.is_err() {
                    let mut aborted = OrchestratorError::aborted().to_event();
                    aborted.agent = Some(agent.snapshot(None));
                    yield aborted;
                    break;
                }
            }
            yield event;
        }
    };
    Box::pin(gated)
}

async fn drive(
    tx: &mpsc::Sender<StreamEvent>,
    messages: Vec<Message>,
    agent: &AgentDef,
) -> anyhow::Result<()> {
    // A history thread fully supersedes the caller's messages.
    let messages = agent.history_thread.clone().unwrap_or(messages);

    // Honors pre-pausing: a request started while paused waits here, before
    // any event is emitted.
    pause_controller().wait_while_paused(DEFAULT_PAUSE_POLL, agent.abort.as_ref()).await?;

    let model =
        match resolve_model(agent.model.as_deref(), agent.model_class.as_deref(), Capability::Chat)
        {
            Ok(model) => model,
            Err(e) => {
                return Err(
                    OrchestratorError::new(ErrorKind::InvalidRequest, format!("{e:#}")).into()
                )
            }
        };
    let provider = match get_model_provider(&model) {
        Ok(provider) => provider,
        Err(e) => {
            return Err(
                OrchestratorError::new(ErrorKind::ProviderNotFound, format!("{e:#}")).into()
            )
        }
    };

    let request_id = Uuid::new_v4().to_string();
    send_event(tx, agent, &model, StreamEvent::new(EventPayload::AgentStart { request_id }))
        .await?;

    let final_text = run_with_verification(tx, agent, &model, provider, messages).await?;

    send_event(
        tx,
        agent,
        &model,
        StreamEvent::new(EventPayload::AgentDone { content: final_text }),
    )
    .await?;

    // With a global handler installed, cost updates were already delivered
    // through the bus; otherwise the consumer gets the tracker's latest
    // entry as a closing event.
    if !bus::has_event_handler() {
        if let Some(usage) = cost_tracker().last_entry() {
            send_event(tx, agent, &model, StreamEvent::new(EventPayload::CostUpdate { usage }))
                .await?;
        }
    }
    Ok(())
}
