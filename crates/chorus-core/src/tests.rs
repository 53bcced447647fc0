// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Scenario tests for the request engine and tool loop.
//!
//! Every scenario runs against [`ScriptedProvider`] so it is deterministic
//! and needs no network access.  The provider registry, pause flag, and cost
//! tracker are process-wide, so these tests serialize on a shared lock.
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Lock shared by every test in this crate that touches process-wide state
/// (event-bus handler, pause flag, provider registry, cost tracker).
///
/// Also installs the test log subscriber on first use, so running with
/// `RUST_LOG=chorus_core=debug` shows engine warnings per test.
pub(crate) fn global_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Mutex::new(())
    });
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod engine_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use chorus_model::{
        catalog, classes, registry, EventPayload, InputModality, Message, ModelCost, ModelEntry,
        ModelFeatures, Script, ScriptedProvider, StreamEvent, ToolChoice,
    };
    use chorus_tools::{ParamSpec, Tool, ToolFunction};

    use crate::{cost_tracker, pause, request, resume, set_event_handler, AgentDef};

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Shared singletons (registry, pause, cost tracker, bus) force these
    /// scenarios to run one at a time.
    fn lock() -> MutexGuard<'static, ()> {
        super::global_lock()
    }

    fn mock_model_entry() -> ModelEntry {
        ModelEntry {
            id: "mock-model".into(),
            provider: "mock".into(),
            cost: ModelCost { input: 1.0, output: 2.0, cached: None },
            features: ModelFeatures {
                context_length: 128_000,
                supports_vision: false,
                supports_functions: true,
                input_modality: InputModality::Text,
                embedding_dimensions: None,
            },
            scores: None,
        }
    }

    /// Install a scripted provider and return an agent wired to it.
    fn install(provider: ScriptedProvider) -> AgentDef {
        resume();
        set_event_handler(None);
        registry::clear_registered_providers();
        catalog::clear_external_models();
        catalog::register_model(mock_model_entry());
        registry::register_provider(Arc::new(provider));
        AgentDef::new("test-agent").with_model("mock-model")
    }

    async fn collect(stream: crate::RequestStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    fn deltas_concatenated(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::MessageDelta { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> Tool {
        Tool::named(
            ToolFunction::new(name, "counts invocations", json!({ "type": "object" })),
            move |_args| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("done".to_string())
                })
            },
        )
    }

    // ── Basic streaming ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn basic_stream_delivers_deltas_complete_and_done() {
        let _g = lock();
        let chunks = ["Chunk 0 ", "Chunk 1 ", "Chunk 2 ", "Chunk 3 ", "Chunk 4 "];
        let agent = install(ScriptedProvider::deltas_then_complete(&chunks));

        let events = collect(request(vec![Message::user("Hello")], agent)).await;

        assert!(matches!(events[0].payload, EventPayload::AgentStart { .. }));
        assert_eq!(deltas_concatenated(&events), chunks.concat(), "deltas reassemble exactly");
        let complete = events.iter().find_map(|e| match &e.payload {
            EventPayload::MessageComplete { content, .. } => Some(content.clone()),
            _ => None,
        });
        assert_eq!(complete.as_deref(), Some("Chunk 0 Chunk 1 Chunk 2 Chunk 3 Chunk 4 "));
        assert!(events.iter().any(StreamEvent::is_done), "agent_done must fire");
    }

    #[tokio::test]
    async fn events_carry_agent_snapshot_with_resolved_model() {
        let _g = lock();
        let agent = install(ScriptedProvider::deltas_then_complete(&["hi there, listener"]));
        let agent_id = agent.agent_id.clone();

        let events = collect(request(vec![Message::user("q")], agent)).await;
        for event in &events {
            let snap = event.agent.as_ref().expect("every engine event carries a snapshot");
            assert_eq!(snap.agent_id, agent_id);
            assert_eq!(snap.model, "mock-model");
        }
    }

    #[tokio::test]
    async fn delta_orders_increase_monotonically() {
        let _g = lock();
        let long: Vec<String> = (0..10).map(|i| format!("chunk number {i} padded out ")).collect();
        let refs: Vec<&str> = long.iter().map(String::as_str).collect();
        let agent = install(ScriptedProvider::deltas_then_complete(&refs));

        let events = collect(request(vec![Message::user("q")], agent)).await;
        let orders: Vec<u64> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::MessageDelta { order, .. } => Some(*order),
                _ => None,
            })
            .collect();
        assert!(!orders.is_empty());
        for pair in orders.windows(2) {
            assert!(pair[1] > pair[0], "orders must increase: {orders:?}");
        }
    }

    // ── Pause and abort ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn pause_mid_stream_holds_events_until_resume() {
        let _g = lock();
        let chunks = ["Chunk 0 ", "Chunk 1 ", "Chunk 2 ", "Chunk 3 ", "Chunk 4 "];
        let agent = install(ScriptedProvider::deltas_then_complete(&chunks));

        let mut stream = request(vec![Message::user("Hello")], agent);
        // agent_start, then the first delta.
        let first = stream.next().await.unwrap();
        assert!(matches!(first.payload, EventPayload::AgentStart { .. }));
        let _first_delta = stream.next().await.unwrap();

        pause();
        let held = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
        assert!(held.is_err(), "no events may be delivered while paused");

        resume();
        let events: Vec<StreamEvent> = stream.collect().await;
        let complete = events.iter().find_map(|e| match &e.payload {
            EventPayload::MessageComplete { content, .. } => Some(content.as_str()),
            _ => None,
        });
        assert_eq!(complete, Some("Chunk 0 Chunk 1 Chunk 2 Chunk 3 Chunk 4 "));
        assert!(events.iter().any(StreamEvent::is_done));
    }

    #[tokio::test]
    async fn abort_during_pause_yields_single_error_event() {
        let _g = lock();
        let mut agent = install(ScriptedProvider::deltas_then_complete(&["never delivered"]));
        let token = CancellationToken::new();
        agent.abort = Some(token.clone());

        pause();
        let stream = request(vec![Message::user("Hello")], agent);
        let aborter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let events: Vec<StreamEvent> =
            tokio::time::timeout(Duration::from_secs(2), stream.collect())
                .await
                .expect("stream must terminate after abort");
        aborter.await.unwrap();
        resume();

        assert_eq!(events.len(), 1, "exactly one event expected, got {events:?}");
        match &events[0].payload {
            EventPayload::Error { error, .. } => {
                assert!(error.contains("aborted"), "error must mention abort: {error}")
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    // ── Tool loop ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_round_executes_and_feeds_results_back() {
        let _g = lock();
        let counter = Arc::new(AtomicUsize::new(0));
        let provider = ScriptedProvider::tools_then_text(
            vec![ScriptedProvider::call("tc-1", "lookup", r#"{"q":"x"}"#)],
            "all done",
        );
        let requests = Arc::clone(&provider.requests);
        let agent = install(provider).with_tool(counting_tool("lookup", Arc::clone(&counter)));

        let events = collect(request(vec![Message::user("go")], agent)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(events.iter().any(|e| matches!(e.payload, EventPayload::ToolStart { .. })));
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::ToolDone { results } if results.len() == 1 && results[0].output == "done"
        )));

        // Round 2 must carry the function_call / function_call_output pair.
        let second = &requests.lock().unwrap()[1];
        assert!(second
            .messages
            .iter()
            .any(|m| matches!(m, Message::FunctionCall { call_id, .. } if call_id == "tc-1")));
        assert!(second.messages.iter().any(
            |m| matches!(m, Message::FunctionCallOutput { output, .. } if output == "done")
        ));
        let done_content = events.iter().find_map(|e| match &e.payload {
            EventPayload::AgentDone { content } => content.clone(),
            _ => None,
        });
        assert_eq!(done_content.as_deref(), Some("all done"));
    }

    #[tokio::test]
    async fn tool_budget_caps_executions_and_synthesizes_outputs() {
        let _g = lock();
        let counter = Arc::new(AtomicUsize::new(0));
        let calls: Vec<_> = (0..5)
            .map(|i| ScriptedProvider::call(&format!("tc-{i}"), "lookup", "{}"))
            .collect();
        let provider = ScriptedProvider::tools_then_text(calls, "done");
        let requests = Arc::clone(&provider.requests);
        let mut agent = install(provider).with_tool(counting_tool("lookup", Arc::clone(&counter)));
        agent.max_tool_calls = 3;

        let events = collect(request(vec![Message::user("go")], agent)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 3, "exactly three executions");
        let results = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::ToolDone { results } => Some(results.clone()),
                _ => None,
            })
            .expect("tool_done expected");
        assert_eq!(results.len(), 5, "results stay aligned with the call list");
        let exhausted =
            results.iter().filter(|r| r.output.contains("tool budget exhausted")).count();
        assert_eq!(exhausted, 2, "the two over-budget calls get synthetic outputs");

        // The synthetic outputs also land in history for the next round.
        let second = &requests.lock().unwrap()[1];
        let outputs = second
            .messages
            .iter()
            .filter(|m| matches!(m, Message::FunctionCallOutput { .. }))
            .count();
        assert_eq!(outputs, 5);
    }

    #[tokio::test]
    async fn round_cap_suppresses_further_rounds() {
        let _g = lock();
        let counter = Arc::new(AtomicUsize::new(0));
        // Two scripted tool rounds; the cap must stop after one.
        let provider = ScriptedProvider::new(vec![
            vec![EventPayload::ToolStart {
                tool_calls: vec![ScriptedProvider::call("tc-1", "lookup", "{}")],
            }],
            vec![EventPayload::ToolStart {
                tool_calls: vec![ScriptedProvider::call("tc-2", "lookup", "{}")],
            }],
        ]);
        let requests = Arc::clone(&provider.requests);
        let mut agent = install(provider).with_tool(counting_tool("lookup", Arc::clone(&counter)));
        agent.max_tool_call_rounds_per_turn = 1;

        let events = collect(request(vec![Message::user("go")], agent)).await;

        assert_eq!(requests.lock().unwrap().len(), 1, "exactly one provider round");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(events.iter().any(StreamEvent::is_done), "agent_done still fires");
    }

    #[tokio::test]
    async fn sequential_tools_execute_in_order() {
        let _g = lock();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let slow_log = Arc::clone(&order);
        let slow = Tool::named(
            ToolFunction::new("slow", "slow tool", json!({ "type": "object" })),
            move |_| {
                let log = Arc::clone(&slow_log);
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    log.lock().unwrap().push("slow");
                    Ok("slow done".to_string())
                })
            },
        );
        let fast_log = Arc::clone(&order);
        let fast = Tool::named(
            ToolFunction::new("fast", "fast tool", json!({ "type": "object" })),
            move |_| {
                let log = Arc::clone(&fast_log);
                Box::pin(async move {
                    log.lock().unwrap().push("fast");
                    Ok("fast done".to_string())
                })
            },
        );

        let provider = ScriptedProvider::tools_then_text(
            vec![
                ScriptedProvider::call("tc-1", "slow", "{}"),
                ScriptedProvider::call("tc-2", "fast", "{}"),
            ],
            "done",
        );
        let mut agent = install(provider).with_tool(slow).with_tool(fast);
        agent.settings.sequential_tools = true;

        let _ = collect(request(vec![Message::user("go")], agent)).await;
        assert_eq!(*order.lock().unwrap(), vec!["slow", "fast"], "strictly in call order");
    }

    #[tokio::test]
    async fn parallel_tools_results_align_with_call_order() {
        let _g = lock();
        let slow = Tool::named(
            ToolFunction::new("slow", "slow tool", json!({ "type": "object" })),
            |_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok("slow done".to_string())
                })
            },
        );
        let fast = Tool::named(
            ToolFunction::new("fast", "fast tool", json!({ "type": "object" })),
            |_| Box::pin(async { Ok("fast done".to_string()) }),
        );

        let provider = ScriptedProvider::tools_then_text(
            vec![
                ScriptedProvider::call("tc-1", "slow", "{}"),
                ScriptedProvider::call("tc-2", "fast", "{}"),
            ],
            "done",
        );
        let agent = install(provider).with_tool(slow).with_tool(fast);

        let events = collect(request(vec![Message::user("go")], agent)).await;
        let results = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::ToolDone { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(results[0].output, "slow done", "results follow call order, not finish order");
        assert_eq!(results[1].output, "fast done");
    }

    #[tokio::test]
    async fn forced_tool_choice_is_scoped_to_the_first_round() {
        let _g = lock();
        let provider = ScriptedProvider::tools_then_text(
            vec![ScriptedProvider::call("tc-1", "lookup", "{}")],
            "done",
        );
        let requests = Arc::clone(&provider.requests);
        let mut agent =
            install(provider).with_tool(counting_tool("lookup", Arc::new(AtomicUsize::new(0))));
        agent.settings.tool_choice = Some(ToolChoice::Function { name: "lookup".into() });

        let _ = collect(request(vec![Message::user("go")], agent)).await;

        let requests = requests.lock().unwrap();
        assert_eq!(
            requests[0].settings.tool_choice,
            Some(ToolChoice::Function { name: "lookup".into() })
        );
        assert_eq!(requests[1].settings.tool_choice, None, "round 2 must not inherit the force");
    }

    #[tokio::test]
    async fn missing_tool_becomes_error_result_and_loop_continues() {
        let _g = lock();
        let provider = ScriptedProvider::tools_then_text(
            vec![ScriptedProvider::call("tc-1", "no_such_tool", "{}")],
            "recovered",
        );
        let agent = install(provider);

        let events = collect(request(vec![Message::user("go")], agent)).await;
        let results = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::ToolDone { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert!(results[0].is_error);
        assert!(results[0].output.contains("Tool not found"));
        assert!(events.iter().any(StreamEvent::is_done), "failures do not kill the loop");
    }

    #[tokio::test]
    async fn positional_tool_receives_mapped_arguments() {
        let _g = lock();
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let tool = Tool::positional(
            ToolFunction::new(
                "add",
                "adds numbers",
                json!({
                    "type": "object",
                    "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
                    "required": ["a", "b"]
                }),
            ),
            vec![ParamSpec::required("a"), ParamSpec::required("b")],
            move |args| {
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    sink.lock().unwrap().extend(args.clone());
                    Ok(format!("{}", args[0].as_f64().unwrap() + args[1].as_f64().unwrap()))
                })
            },
        );
        // Named arguments arrive out of declared order.
        let provider = ScriptedProvider::tools_then_text(
            vec![ScriptedProvider::call("tc-1", "add", r#"{"b": 2, "a": 40}"#)],
            "done",
        );
        let agent = install(provider).with_tool(tool);

        let events = collect(request(vec![Message::user("go")], agent)).await;
        assert_eq!(*received.lock().unwrap(), vec![json!(40), json!(2)]);
        let results = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::ToolDone { results } => Some(results.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(results[0].output, "42");
    }

    #[tokio::test]
    async fn on_tool_call_hook_fires_before_execution() {
        let _g = lock();
        let hooked: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hooked);
        let provider = ScriptedProvider::tools_then_text(
            vec![ScriptedProvider::call("tc-1", "lookup", "{}")],
            "done",
        );
        let mut agent =
            install(provider).with_tool(counting_tool("lookup", Arc::new(AtomicUsize::new(0))));
        agent.on_tool_call =
            Some(Arc::new(move |call| sink.lock().unwrap().push(call.function.name.clone())));

        let _ = collect(request(vec![Message::user("go")], agent)).await;
        assert_eq!(*hooked.lock().unwrap(), vec!["lookup".to_string()]);
    }

    // ── History thread ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn history_thread_supersedes_caller_messages() {
        let _g = lock();
        let provider = ScriptedProvider::deltas_then_complete(&["answered from the thread"]);
        let last_request = Arc::clone(&provider.last_request);
        let mut agent = install(provider);
        agent.history_thread = Some(vec![Message::user("from thread")]);

        let _ = collect(request(vec![Message::user("from caller")], agent)).await;

        let sent = last_request.lock().unwrap().clone().unwrap();
        assert!(sent.messages.iter().any(|m| m.text() == Some("from thread")));
        assert!(
            !sent.messages.iter().any(|m| m.text() == Some("from caller")),
            "caller messages must not reach the provider when a thread is set"
        );
    }

    // ── Failure surfaces ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_model_yields_terminal_error_before_any_provider_call() {
        let _g = lock();
        resume();
        set_event_handler(None);
        registry::clear_registered_providers();
        catalog::clear_external_models();
        let agent = AgentDef::new("broken").with_model("model-that-does-not-exist");

        let events = collect(request(vec![Message::user("hi")], agent)).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_error());
    }

    #[tokio::test]
    async fn class_without_keys_yields_invalid_request_error() {
        let _g = lock();
        resume();
        set_event_handler(None);
        registry::clear_registered_providers();
        catalog::clear_external_models();
        classes::reset_model_classes();
        // A class whose only member needs an API key that is absent.
        classes::override_model_class(
            "keyless-test",
            chorus_model::ModelClass { models: vec!["grok-4".into()], random: false },
        );
        std::env::remove_var("XAI_API_KEY");
        let agent = AgentDef::new("broken").with_model_class("keyless-test");

        let events = collect(request(vec![Message::user("hi")], agent)).await;
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::Error { code, .. } => {
                assert_eq!(code.as_deref(), Some("invalid_request"))
            }
            other => panic!("expected error, got {other:?}"),
        }
        classes::reset_model_classes();
    }

    // ── Retry integration ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_stream_start_failure_is_retried_transparently() {
        let _g = lock();
        let provider =
            ScriptedProvider::deltas_then_complete(&["recovered output"]).with_transient_failures(1);
        let agent = install(provider);

        let events = collect(request(vec![Message::user("go")], agent)).await;
        let complete = events.iter().find_map(|e| match &e.payload {
            EventPayload::MessageComplete { content, .. } => Some(content.as_str()),
            _ => None,
        });
        assert_eq!(complete, Some("recovered output"));
        assert!(events.iter().any(StreamEvent::is_done));
    }

    // ── Cost flow ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn final_cost_update_reaches_consumer_without_bus_handler() {
        let _g = lock();
        let script: Script = vec![
            EventPayload::MessageComplete { message_id: "m1".into(), content: "hi".into() },
            EventPayload::CostUpdate {
                usage: chorus_model::UsageEntry::new("mock-model", 1_000_000, 500_000),
            },
        ];
        let agent = install(ScriptedProvider::new(vec![script]));
        cost_tracker().reset();

        let events = collect(request(vec![Message::user("go")], agent)).await;

        // mock-model is registered at 1.0 input / 2.0 output per 1M.
        let last = events.last().unwrap();
        match &last.payload {
            EventPayload::CostUpdate { usage } => {
                assert_eq!(usage.model, "mock-model");
                assert!((usage.cost - 2.0).abs() < 1e-9, "1.0 + 0.5×2.0 = 2.0, got {}", usage.cost);
            }
            other => panic!("stream must close with cost_update, got {other:?}"),
        }
        assert!((cost_tracker().get_total_cost() - 2.0).abs() < 1e-9);
        cost_tracker().reset();
    }

    #[tokio::test]
    async fn cost_updates_route_to_bus_when_handler_installed() {
        let _g = lock();
        let script: Script = vec![
            EventPayload::MessageComplete { message_id: "m1".into(), content: "hi".into() },
            EventPayload::CostUpdate {
                usage: chorus_model::UsageEntry::new("mock-model", 10, 10),
            },
        ];
        let agent = install(ScriptedProvider::new(vec![script]));
        cost_tracker().reset();

        let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_event_handler(Some(Arc::new(move |ev| {
            sink.lock().unwrap().push(ev);
            Ok(())
        })));

        let events = collect(request(vec![Message::user("go")], agent)).await;
        set_event_handler(None);

        assert!(
            !events.iter().any(|e| matches!(e.payload, EventPayload::CostUpdate { .. })),
            "cost must not be double-delivered to the consumer"
        );
        let bus_costs = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::CostUpdate { .. }))
            .count();
        assert_eq!(bus_costs, 1);
        cost_tracker().reset();
    }

    // ── Verification ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn verifier_failure_triggers_rerun_with_critique() {
        let _g = lock();
        // Script order: main attempt 1, verifier grade 1 (fail), main
        // attempt 2, verifier grade 2 (pass).  The verifier shares the mock
        // provider, so scripts interleave in invocation order.
        let provider = ScriptedProvider::new(vec![
            vec![EventPayload::MessageComplete { message_id: "m1".into(), content: "draft".into() }],
            vec![EventPayload::MessageComplete {
                message_id: "v1".into(),
                content: r#"{"status":"fail","reason":"too short"}"#.into(),
            }],
            vec![EventPayload::MessageComplete { message_id: "m2".into(), content: "final".into() }],
            vec![EventPayload::MessageComplete {
                message_id: "v2".into(),
                content: r#"{"status":"pass"}"#.into(),
            }],
        ]);
        let requests = Arc::clone(&provider.requests);
        let mut agent = install(provider);
        agent = agent.with_verifier(AgentDef::new("verifier").with_model("mock-model"), 2);

        let events = collect(request(vec![Message::user("write it")], agent)).await;

        let done: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::AgentDone { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(done.len(), 1, "agent_done fires once, for the accepted attempt");
        assert_eq!(done[0].as_deref(), Some("final"));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        // Attempt 2 carries the critique as a system message.
        assert!(requests[2].messages.iter().any(|m| matches!(
            m,
            Message::System { content } if content.contains("too short")
        )));
    }
}
