use std::sync::Arc;

use tokio::sync::broadcast;

use podwire_core::config::{EngineConfig, JoinPolicy, SimulatedDecision};
use podwire_core::event::EventBus;
use podwire_core::types::*;
use podwire_engine::decide::{BATCH_FAILED_REASON, NO_DECISION_REASON};
use podwire_engine::{Collaborators, MemoryGraph, TriggerDispatcher};
use podwire_test_utils::{
    canvas_from_toml, drain_events, FixedSummarizer, RecordingCleaner, ScriptedApprover,
    ScriptedRunner,
};

struct Harness {
    graph: Arc<MemoryGraph>,
    runner: Arc<ScriptedRunner>,
    approver: Arc<ScriptedApprover>,
    cleaner: Arc<RecordingCleaner>,
    engine: Arc<TriggerDispatcher>,
    events: broadcast::Receiver<WorkflowEvent>,
}

impl Harness {
    fn new(canvas: &str, runner: ScriptedRunner, approver: ScriptedApprover) -> Self {
        Self::build(canvas, runner, approver, EngineConfig::default(), None)
    }

    fn build(
        canvas: &str,
        runner: ScriptedRunner,
        approver: ScriptedApprover,
        config: EngineConfig,
        summarizer: Option<FixedSummarizer>,
    ) -> Self {
        let (pods, connections) = canvas_from_toml(canvas);
        let graph = Arc::new(MemoryGraph::new(pods, connections));
        let runner = Arc::new(runner);
        let approver = Arc::new(approver);
        let cleaner = Arc::new(RecordingCleaner::new());
        let event_bus = Arc::new(EventBus::new(config.event_capacity));
        let events = event_bus.subscribe();

        let mut collaborators = Collaborators::new(
            graph.clone(),
            runner.clone(),
            approver.clone(),
            cleaner.clone(),
        );
        if let Some(s) = summarizer {
            collaborators = collaborators.with_summarizer(Arc::new(s));
        }
        let engine = TriggerDispatcher::new(config, collaborators, event_bus);

        Self {
            graph,
            runner,
            approver,
            cleaner,
            engine,
            events,
        }
    }

    /// A pod finished outside the engine (manual run), then went idle.
    async fn complete(&self, pod: &str) {
        let id = PodId::from(pod);
        self.engine
            .on_pod_completed(&CanvasId::from("default"), &id)
            .await
            .unwrap();
        self.engine.on_pod_idle(&id).await;
    }

    async fn status(&self, connection: &str) -> (DecideStatus, Option<String>) {
        let conn = self
            .graph
            .connection(&ConnectionId::from(connection))
            .await
            .unwrap();
        (conn.decide_status, conn.decide_reason)
    }

    fn events(&mut self) -> Vec<WorkflowEvent> {
        drain_events(&mut self.events)
    }
}

const CHAIN: &str = r#"
[[pods]]
id = "o"
[[pods]]
id = "a"
[[pods]]
id = "b"

[[connections]]
source = "o"
target = "a"
[[connections]]
source = "a"
target = "b"
"#;

#[tokio::test]
async fn test_auto_chain_runs_downstream() {
    let h = Harness::new(CHAIN, ScriptedRunner::new(), ScriptedApprover::new());
    h.complete("o").await;
    h.engine.settle().await;

    assert_eq!(h.runner.fired_pods(), vec!["a", "b"]);
    let fired = h.runner.fired();
    assert_eq!(fired[0].content, "o output");
    assert_eq!(fired[0].mode, TriggerMode::Auto);
    assert_eq!(fired[1].content, "a output");
    assert!(h.cleaner.runs().is_empty());
}

const JOIN: &str = r#"
[[pods]]
id = "s1"
name = "Research"
[[pods]]
id = "s2"
name = "Review"
[[pods]]
id = "t"

[[connections]]
source = "s1"
target = "t"
[[connections]]
source = "s2"
target = "t"
"#;

#[tokio::test]
async fn test_join_fires_once_with_merged_payload() {
    let mut h = Harness::new(JOIN, ScriptedRunner::new(), ScriptedApprover::new());

    h.complete("s1").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 0);
    let status = h.engine.joins().snapshot(&PodId::from("t")).unwrap();
    assert_eq!(status.completed, vec![PodId::from("s1")]);
    assert_eq!(status.pending, vec![PodId::from("s2")]);
    assert!(h.events().iter().any(|e| matches!(
        e,
        WorkflowEvent::JoinPending { completed, pending, .. }
            if completed == &vec![PodId::from("s1")] && pending == &vec![PodId::from("s2")]
    )));

    h.complete("s2").await;
    h.engine.settle().await;
    let fired = h.runner.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(
        fired[0].content,
        "## Source: Research\n\ns1 output\n\n---\n\n## Source: Review\n\ns2 output"
    );
    assert!(h.engine.joins().is_empty());

    // The join was consumed; a late duplicate starts a new membership.
    h.complete("s1").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 1);
}

const MIXED_JOIN: &str = r#"
[[pods]]
id = "s1"
name = "Research"
[[pods]]
id = "s2"
name = "Review"
[[pods]]
id = "t"

[[connections]]
source = "s1"
target = "t"
[[connections]]
source = "s2"
target = "t"
trigger_mode = "direct"
"#;

#[tokio::test]
async fn test_direct_edge_waits_at_join() {
    let h = Harness::new(MIXED_JOIN, ScriptedRunner::new(), ScriptedApprover::new());

    h.complete("s1").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 0);
    let status = h.engine.joins().snapshot(&PodId::from("t")).unwrap();
    assert_eq!(status.pending, vec![PodId::from("s2")]);

    h.complete("s2").await;
    h.engine.settle().await;
    let fired = h.runner.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].mode, TriggerMode::Auto);
    assert_eq!(
        fired[0].content,
        "## Source: Research\n\ns1 output\n\n---\n\n## Source: Review\n\ns2 output"
    );
    assert!(h.engine.joins().is_empty());
}

const GATED_JOIN: &str = r#"
[[pods]]
id = "s1"
[[pods]]
id = "s2"
[[pods]]
id = "t"

[[connections]]
source = "s1"
target = "t"
[[connections]]
id = "g"
source = "s2"
target = "t"
trigger_mode = "ai-decide"
"#;

#[tokio::test]
async fn test_rejected_source_keeps_join_target_idle() {
    let mut h = Harness::new(
        GATED_JOIN,
        ScriptedRunner::new().with_output("s1", "x"),
        ScriptedApprover::new().with("g", SimulatedDecision::Reject),
    );

    h.complete("s1").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 0);
    assert!(h.events().iter().any(|e| matches!(
        e,
        WorkflowEvent::JoinPending { completed, pending, .. }
            if completed == &vec![PodId::from("s1")] && pending == &vec![PodId::from("s2")]
    )));

    h.complete("s2").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 0);
    assert_eq!(
        h.status("g").await,
        (DecideStatus::Rejected, Some("not relevant".to_string()))
    );
    assert!(h.engine.joins().is_empty());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::JoinAbandoned { target, .. } if target.as_str() == "t")));
}

const REJECTED_JOIN: &str = r#"
[[pods]]
id = "o"
auto_clear = true
[[pods]]
id = "s1"
[[pods]]
id = "s2"
[[pods]]
id = "s3"
[[pods]]
id = "t"
[[pods]]
id = "u"

[[connections]]
source = "o"
target = "s1"
[[connections]]
source = "o"
target = "s2"
[[connections]]
source = "o"
target = "s3"
[[connections]]
source = "s1"
target = "t"
[[connections]]
id = "gate"
source = "s2"
target = "t"
trigger_mode = "ai-decide"
[[connections]]
source = "t"
target = "u"
"#;

#[tokio::test]
async fn test_rejected_join_prunes_only_its_branch() {
    let mut h = Harness::new(
        REJECTED_JOIN,
        ScriptedRunner::new(),
        ScriptedApprover::new().with("gate", SimulatedDecision::Reject),
    );
    let origin = PodId::from("o");
    // Keeps the sibling terminal outstanding while t's branch resolves.
    h.runner.set_busy("s3", true);

    h.complete("o").await;
    h.engine.settle().await;

    assert_eq!(h.runner.fire_count("t"), 0);
    assert_eq!(h.runner.fire_count("u"), 0);
    assert_eq!(
        h.status("gate").await,
        (DecideStatus::Rejected, Some("not relevant".to_string()))
    );
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::JoinAbandoned { target, .. } if target.as_str() == "t")));

    let record = h.engine.tracker().record(&origin).unwrap();
    assert_eq!(record.expected[&PodId::from("u")], 0);
    assert_eq!(record.expected[&PodId::from("s3")], 1);
    assert_eq!(record.expected[&PodId::from("s2")], 1);
    assert_eq!(record.outstanding(), 1);
    assert!(h.cleaner.runs().is_empty());

    h.runner.set_busy("s3", false);
    h.engine.on_pod_idle(&PodId::from("s3")).await;
    h.engine.settle().await;

    let runs = h.cleaner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1.len(), 6);
    assert!(h.engine.tracker().is_empty());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::RunComplete { origin, .. } if origin.as_str() == "o")));
}

#[tokio::test]
async fn test_partially_rejected_join_can_fire_with_completed_sources() {
    let config = EngineConfig {
        join_policy: JoinPolicy::FireWithCompleted,
        ..EngineConfig::default()
    };
    let h = Harness::build(
        REJECTED_JOIN,
        ScriptedRunner::new(),
        ScriptedApprover::new().with("gate", SimulatedDecision::Reject),
        config,
        None,
    );

    h.complete("o").await;
    h.engine.settle().await;

    let t_runs: Vec<_> = h
        .runner
        .fired()
        .into_iter()
        .filter(|r| r.pod_id.as_str() == "t")
        .collect();
    assert_eq!(t_runs.len(), 1);
    assert_eq!(t_runs[0].content, "## Source: s1\n\ns1 output");
    assert_eq!(h.runner.fire_count("u"), 1);
    assert_eq!(h.cleaner.runs().len(), 1);
}

const FAN_DECIDE: &str = r#"
[[pods]]
id = "s"
[[pods]]
id = "a"
[[pods]]
id = "b"
[[pods]]
id = "c"

[[connections]]
id = "e1"
source = "s"
target = "a"
trigger_mode = "ai-decide"
[[connections]]
id = "e2"
source = "s"
target = "b"
trigger_mode = "ai-decide"
[[connections]]
id = "e3"
source = "s"
target = "c"
trigger_mode = "ai-decide"
"#;

#[tokio::test]
async fn test_missing_decision_is_error_and_never_fires() {
    let mut h = Harness::new(
        FAN_DECIDE,
        ScriptedRunner::new(),
        ScriptedApprover::new()
            .with("e2", SimulatedDecision::Reject)
            .with("e3", SimulatedDecision::Omit),
    );

    h.complete("s").await;
    h.engine.settle().await;

    let calls = h.approver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].connections.len(), 3);
    assert_eq!(calls[0].source_output, "s output");

    assert_eq!(h.status("e1").await.0, DecideStatus::Approved);
    assert_eq!(h.status("e2").await.0, DecideStatus::Rejected);
    assert_eq!(
        h.status("e3").await,
        (DecideStatus::Error, Some(NO_DECISION_REASON.to_string()))
    );

    assert_eq!(h.runner.fired_pods(), vec!["a"]);
    assert_eq!(h.runner.fired()[0].mode, TriggerMode::AiDecide);
    assert_eq!(h.runner.fired()[0].content, "s output");

    let events = h.events();
    let pending = events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::DecidePending { connection_ids, .. } if connection_ids.len() == 3))
        .count();
    assert_eq!(pending, 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::DecideFailed { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_failed_batch_errors_every_connection() {
    let h = Harness::new(FAN_DECIDE, ScriptedRunner::new(), ScriptedApprover::new().failing());

    h.complete("s").await;
    h.engine.settle().await;

    for id in ["e1", "e2", "e3"] {
        assert_eq!(
            h.status(id).await,
            (DecideStatus::Error, Some(BATCH_FAILED_REASON.to_string()))
        );
        assert!(!h.engine.gate().is_in_flight(&ConnectionId::from(id)));
    }
    assert!(h.runner.fired().is_empty());
}

#[tokio::test]
async fn test_approval_batches_are_per_source() {
    let canvas = r#"
[[pods]]
id = "s1"
[[pods]]
id = "s2"
[[pods]]
id = "t1"
[[pods]]
id = "t2"

[[connections]]
source = "s1"
target = "t1"
trigger_mode = "ai-decide"
[[connections]]
source = "s2"
target = "t2"
trigger_mode = "ai-decide"
"#;
    let h = Harness::new(canvas, ScriptedRunner::new(), ScriptedApprover::new());

    h.complete("s1").await;
    h.complete("s2").await;
    h.engine.settle().await;

    let mut sources: Vec<_> = h
        .approver
        .calls()
        .iter()
        .map(|c| {
            assert_eq!(c.connections.len(), 1);
            c.source.to_string()
        })
        .collect();
    sources.sort();
    assert_eq!(sources, vec!["s1", "s2"]);
    assert_eq!(h.runner.fire_count("t1"), 1);
    assert_eq!(h.runner.fire_count("t2"), 1);
}

const SINGLE: &str = r#"
[[pods]]
id = "a"
[[pods]]
id = "t"

[[connections]]
source = "a"
target = "t"
"#;

#[tokio::test]
async fn test_busy_target_runs_queued_triggers_in_order() {
    let mut h = Harness::new(SINGLE, ScriptedRunner::new(), ScriptedApprover::new());
    h.runner.hold("t");

    for output in ["first", "second", "third"] {
        h.runner.set_output("a", output);
        h.complete("a").await;
    }
    assert_eq!(h.engine.queue().len(&PodId::from("t")), 2);

    let queued: Vec<usize> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::TriggerQueued { queue_len, .. } => Some(*queue_len),
            _ => None,
        })
        .collect();
    assert_eq!(queued, vec![1, 2]);

    for _ in 0..3 {
        h.runner.release("t");
    }
    h.engine.settle().await;

    let contents: Vec<String> = h.runner.fired().into_iter().map(|r| r.content).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    assert_eq!(h.runner.max_concurrent("t"), 1);
    assert_eq!(h.engine.queue().len(&PodId::from("t")), 0);
}

#[tokio::test]
async fn test_externally_busy_target_waits_for_idle() {
    let h = Harness::new(SINGLE, ScriptedRunner::new(), ScriptedApprover::new());
    h.runner.set_busy("t", true);

    h.complete("a").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 0);
    assert_eq!(h.engine.queue().len(&PodId::from("t")), 1);

    // Still busy: the idle signal is ignored.
    h.engine.on_pod_idle(&PodId::from("t")).await;
    assert_eq!(h.engine.queue().len(&PodId::from("t")), 1);

    h.runner.set_busy("t", false);
    h.engine.on_pod_idle(&PodId::from("t")).await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 1);
}

#[tokio::test]
async fn test_abort_drops_queued_triggers() {
    let h = Harness::new(SINGLE, ScriptedRunner::new(), ScriptedApprover::new());
    h.runner.hold("t");

    h.complete("a").await;
    h.complete("a").await;
    let dropped = h.engine.abort(&PodId::from("t")).await.unwrap();
    assert_eq!(dropped, 1);
    assert_eq!(h.runner.aborted(), vec![PodId::from("t")]);

    h.runner.release("t");
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("t"), 1);
}

#[tokio::test]
async fn test_abort_prunes_dropped_triggers_from_run() {
    let canvas = r#"
[[pods]]
id = "o"
auto_clear = true
[[pods]]
id = "t"

[[connections]]
source = "o"
target = "t"
"#;
    let h = Harness::new(canvas, ScriptedRunner::new(), ScriptedApprover::new());
    let origin = PodId::from("o");
    h.runner.set_busy("t", true);

    h.complete("o").await;
    h.engine.settle().await;
    assert_eq!(h.engine.queue().len(&PodId::from("t")), 1);
    assert!(h.engine.tracker().is_tracking(&origin));

    assert_eq!(h.engine.abort(&PodId::from("t")).await.unwrap(), 1);
    assert!(!h.engine.tracker().is_tracking(&origin));

    h.runner.set_busy("t", false);
    h.engine.on_pod_idle(&PodId::from("t")).await;
    h.engine.settle().await;

    assert_eq!(h.runner.fire_count("t"), 0);
    assert_eq!(
        h.cleaner.runs(),
        vec![(CanvasId::from("default"), vec![origin, PodId::from("t")])]
    );
}

const PLAN: &str = r#"
[[pods]]
id = "o"
auto_clear = true
[[pods]]
id = "a"
[[pods]]
id = "b"
[[pods]]
id = "c"
[[pods]]
id = "x"

[[connections]]
source = "o"
target = "a"
[[connections]]
source = "o"
target = "b"
[[connections]]
source = "b"
target = "c"
[[connections]]
source = "x"
target = "c"
trigger_mode = "direct"
"#;

#[tokio::test]
async fn test_run_clears_once_after_every_terminal() {
    let h = Harness::new(PLAN, ScriptedRunner::new(), ScriptedApprover::new());
    let origin = PodId::from("o");

    h.complete("o").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("a"), 1);
    // c joins b and x, so it waits for x.
    assert_eq!(h.runner.fire_count("c"), 0);
    assert!(h.cleaner.runs().is_empty());
    assert_eq!(h.engine.tracker().record(&origin).unwrap().outstanding(), 2);

    h.complete("x").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fire_count("c"), 1);
    assert_eq!(h.engine.tracker().record(&origin).unwrap().outstanding(), 1);

    // The second expected run of c is a manual one.
    h.complete("c").await;
    h.engine.settle().await;

    let runs = h.cleaner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].0, CanvasId::from("default"));
    let pods: Vec<&str> = runs[0].1.iter().map(|p| p.as_str()).collect();
    assert_eq!(pods, vec!["o", "a", "b", "c"]);
    assert!(!h.engine.tracker().is_tracking(&origin));

    h.complete("c").await;
    h.engine.settle().await;
    assert_eq!(h.cleaner.runs().len(), 1);
}

#[tokio::test]
async fn test_failed_run_prunes_its_branch() {
    let canvas = r#"
[[pods]]
id = "o"
auto_clear = true
[[pods]]
id = "a"
[[pods]]
id = "b"
[[pods]]
id = "c"

[[connections]]
source = "o"
target = "a"
[[connections]]
source = "a"
target = "b"
[[connections]]
source = "o"
target = "c"
"#;
    let mut h = Harness::new(canvas, ScriptedRunner::new().with_failure("a"), ScriptedApprover::new());

    h.complete("o").await;
    h.engine.settle().await;

    assert_eq!(h.runner.fire_count("b"), 0);
    assert_eq!(h.cleaner.runs().len(), 1);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TriggerFailed { target, .. } if target.as_str() == "a")));
}

#[tokio::test]
async fn test_missing_target_is_skipped() {
    let h = Harness::new(
        r#"
[[pods]]
id = "o"
[[pods]]
id = "a"
[[pods]]
id = "b"

[[connections]]
source = "o"
target = "a"
[[connections]]
source = "o"
target = "b"
"#,
        ScriptedRunner::new(),
        ScriptedApprover::new(),
    );
    h.graph.remove_pod(&PodId::from("b")).await;

    h.complete("o").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fired_pods(), vec!["a"]);
}

#[tokio::test]
async fn test_standalone_auto_clear_pod_clears_after_handoff() {
    let canvas = r#"
[[pods]]
id = "s"
auto_clear = true
[[pods]]
id = "t"

[[connections]]
source = "s"
target = "t"
trigger_mode = "direct"
"#;
    let mut h = Harness::new(canvas, ScriptedRunner::new(), ScriptedApprover::new());

    h.complete("s").await;
    h.engine.settle().await;

    assert_eq!(h.runner.fired()[0].content, "s output");
    assert_eq!(
        h.cleaner.runs(),
        vec![(CanvasId::from("default"), vec![PodId::from("s")])]
    );
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::PodCleared { pod, .. } if pod.as_str() == "s")));
}

#[tokio::test]
async fn test_auto_clear_pod_on_auto_cycle_is_not_standalone() {
    let canvas = r#"
[[pods]]
id = "o"
auto_clear = true
[[pods]]
id = "a"

[[connections]]
source = "o"
target = "a"
[[connections]]
source = "a"
target = "o"
"#;
    // a fails so the cycle never comes back around.
    let mut h = Harness::new(canvas, ScriptedRunner::new().with_failure("a"), ScriptedApprover::new());

    h.complete("o").await;
    h.engine.settle().await;

    assert_eq!(h.runner.fire_count("a"), 1);
    assert!(h.cleaner.runs().is_empty());
    assert!(h.engine.tracker().is_empty());
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::PodCleared { .. })));
}

#[tokio::test]
async fn test_long_handoff_is_summarized() {
    let config = EngineConfig {
        summarize_handoff: true,
        summary_threshold_chars: 10,
        ..EngineConfig::default()
    };
    let runner = ScriptedRunner::new().with_output("o", "a very long upstream answer");
    let h = Harness::build(CHAIN, runner, ScriptedApprover::new(), config, Some(FixedSummarizer::new()));

    h.complete("o").await;
    h.engine.settle().await;

    let fired = h.runner.fired();
    assert_eq!(fired[0].content, "summary of o");
    // "a output" is under the threshold.
    assert_eq!(fired[1].content, "a output");
}

#[tokio::test]
async fn test_failed_summary_hands_off_full_output() {
    let config = EngineConfig {
        summarize_handoff: true,
        summary_threshold_chars: 10,
        ..EngineConfig::default()
    };
    let runner = ScriptedRunner::new().with_output("o", "a very long upstream answer");
    let h = Harness::build(CHAIN, runner, ScriptedApprover::new(), config, Some(FixedSummarizer::failing()));

    h.complete("o").await;
    h.engine.settle().await;
    assert_eq!(h.runner.fired()[0].content, "a very long upstream answer");
}

#[tokio::test]
async fn test_gate_skips_connections_already_in_flight() {
    let h = Harness::new(FAN_DECIDE, ScriptedRunner::new(), ScriptedApprover::new());
    let canvas = CanvasId::from("default");
    let source = PodId::from("s");
    let e1 = Connection::ai_decide("e1", "s", "a");
    let e2 = Connection::ai_decide("e2", "s", "b");

    let first = h
        .engine
        .gate()
        .begin(&canvas, &source, "out".into(), vec![e1.clone()])
        .await
        .unwrap();
    assert_eq!(h.status("e1").await.0, DecideStatus::Pending);

    let second = h
        .engine
        .gate()
        .begin(&canvas, &source, "out".into(), vec![e1.clone(), e2])
        .await
        .unwrap();
    assert_eq!(second.connection_ids(), vec![ConnectionId::from("e2")]);

    assert!(h
        .engine
        .gate()
        .begin(&canvas, &source, "out".into(), vec![e1.clone()])
        .await
        .is_none());

    h.engine
        .on_approval_batch_resolved(first, Ok(DecideBatchResponse::default()))
        .await;
    assert!(!h.engine.gate().is_in_flight(&e1.id));
    assert_eq!(h.status("e1").await.0, DecideStatus::Error);
}
