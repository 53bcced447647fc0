// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Optional process-wide event sink.
//!
//! When a handler is installed, every event flowing through the request
//! engine is mirrored to it.  Handler failures are logged and swallowed:
//! observation must never abort an invocation.  Cost updates are delivered
//! to exactly one side: the bus when a handler is installed, the consumer
//! stream otherwise.

use std::sync::{Arc, OnceLock, RwLock};

use tracing::warn;

use chorus_model::StreamEvent;

use crate::agent::AgentDef;

pub type EventHandler = Arc<dyn Fn(StreamEvent) -> anyhow::Result<()> + Send + Sync>;

fn handler_slot() -> &'static RwLock<Option<EventHandler>> {
    static HANDLER: OnceLock<RwLock<Option<EventHandler>>> = OnceLock::new();
    HANDLER.get_or_init(|| RwLock::new(None))
}

/// Install (or clear, with `None`) the global event handler.
pub fn set_event_handler(handler: Option<EventHandler>) {
    *handler_slot().write().unwrap_or_else(|e| e.into_inner()) = handler;
}

/// Whether a global handler is installed.  Providers and the request engine
/// use this to decide where cost updates are delivered.
pub fn has_event_handler() -> bool {
    handler_slot().read().unwrap_or_else(|e| e.into_inner()).is_some()
}

/// Enrich `event` with an agent snapshot and hand it to the installed
/// handler, if any.  A `model_override` wins over the agent's own model in
/// the snapshot.
pub fn emit(mut event: StreamEvent, agent: Option<&AgentDef>, model_override: Option<&str>) {
    if let Some(agent) = agent {
        event.agent = Some(agent.snapshot(model_override));
    }
    let handler = handler_slot().read().unwrap_or_else(|e| e.into_inner()).clone();
    if let Some(handler) = handler {
        if let Err(e) = handler(event) {
            warn!("event handler failed: {e:#}");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // The handler slot is process-wide; serialize with the engine tests.
    fn lock() -> std::sync::MutexGuard<'static, ()> {
        crate::tests::global_lock()
    }

    fn capture() -> (EventHandler, Arc<Mutex<Vec<StreamEvent>>>) {
        let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |ev| {
            sink.lock().unwrap().push(ev);
            Ok(())
        });
        (handler, seen)
    }

    #[test]
    fn emit_enriches_with_agent_snapshot() {
        let _g = lock();
        let (handler, seen) = capture();
        set_event_handler(Some(handler));

        let agent = AgentDef::new("snapshot-agent").with_model("gpt-4o");
        emit(StreamEvent::delta("m", "x", 0), Some(&agent), None);

        let events = seen.lock().unwrap();
        let snap = events[0].agent.as_ref().expect("agent snapshot must be set");
        assert_eq!(snap.agent_id, agent.agent_id);
        assert_eq!(snap.model, "gpt-4o");
        drop(events);
        set_event_handler(None);
    }

    #[test]
    fn model_override_wins_over_agent_model() {
        let _g = lock();
        let (handler, seen) = capture();
        set_event_handler(Some(handler));

        let agent = AgentDef::new("override-agent").with_model("gpt-4o");
        emit(StreamEvent::delta("m", "x", 0), Some(&agent), Some("gpt-4o-mini"));

        assert_eq!(seen.lock().unwrap()[0].agent.as_ref().unwrap().model, "gpt-4o-mini");
        set_event_handler(None);
    }

    #[test]
    fn handler_errors_are_swallowed() {
        let _g = lock();
        set_event_handler(Some(Arc::new(|_| anyhow::bail!("handler exploded"))));
        // Must not panic or propagate.
        emit(StreamEvent::delta("m", "x", 0), None, None);
        set_event_handler(None);
    }

    #[test]
    fn has_event_handler_tracks_installation() {
        let _g = lock();
        assert!(!has_event_handler());
        set_event_handler(Some(Arc::new(|_| Ok(()))));
        assert!(has_event_handler());
        set_event_handler(None);
        assert!(!has_event_handler());
    }
}
