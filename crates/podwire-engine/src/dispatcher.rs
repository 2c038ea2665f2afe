use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use podwire_core::config::EngineConfig;
use podwire_core::error::Result;
use podwire_core::event::EventBus;
use podwire_core::traits::{Approver, GraphStore, PodRunner, RunCleaner, Summarizer};
use podwire_core::types::{
    CanvasId, Connection, DecideBatchResponse, FireRequest, Pod, PodId, TriggerMode,
    WorkflowEvent,
};

use crate::decide::{AiDecideGate, DecideBatch, DecideOutcome};
use crate::graph::{auto_reachable, compute_terminal_set};
use crate::join::{merge_payload, required_sources, JoinBarrier, JoinOutcome};
use crate::queue::{Admission, BusyQueue, QueuedTrigger};
use crate::tracker::{CompletedRun, TerminalTracker};

/// External collaborators the dispatcher calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub graph: Arc<dyn GraphStore>,
    pub runner: Arc<dyn PodRunner>,
    pub approver: Arc<dyn Approver>,
    pub cleaner: Arc<dyn RunCleaner>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

impl Collaborators {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        runner: Arc<dyn PodRunner>,
        approver: Arc<dyn Approver>,
        cleaner: Arc<dyn RunCleaner>,
    ) -> Self {
        Self {
            graph,
            runner,
            approver,
            cleaner,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }
}

/// Reacts to pod completions by fanning out over the pod's outgoing
/// connections.
///
/// The dispatcher has no loop of its own. Every entry point is driven by an
/// outside event: a pod finished (`on_pod_completed`), an approval batch came
/// back (`on_approval_batch_resolved`), a pod went idle (`on_pod_idle`), or a
/// planned firing will never happen (`on_branch_pruned`). Work it starts in
/// the background (pod runs, approval round trips, cleanups) is registered on
/// a `TaskTracker` so callers can `settle()`.
pub struct TriggerDispatcher {
    config: EngineConfig,
    graph: Arc<dyn GraphStore>,
    runner: Arc<dyn PodRunner>,
    cleaner: Arc<dyn RunCleaner>,
    summarizer: Option<Arc<dyn Summarizer>>,
    event_bus: Arc<EventBus>,
    joins: JoinBarrier,
    queue: BusyQueue,
    gate: AiDecideGate,
    tracker: TerminalTracker,
    tasks: TaskTracker,
}

impl TriggerDispatcher {
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let gate = AiDecideGate::new(
            collaborators.graph.clone(),
            collaborators.approver.clone(),
            event_bus.clone(),
        );
        Arc::new(Self {
            joins: JoinBarrier::new(config.join_policy),
            queue: BusyQueue::new(),
            tracker: TerminalTracker::new(),
            tasks: TaskTracker::new(),
            gate,
            graph: collaborators.graph,
            runner: collaborators.runner,
            cleaner: collaborators.cleaner,
            summarizer: collaborators.summarizer,
            event_bus,
            config,
        })
    }

    /// A pod finished a run.
    ///
    /// Counts the completion toward any tracked run, starts tracking when an
    /// auto-clear pod completes outside the engine, then fans out over the
    /// pod's outgoing connections. A failure on one connection is logged and
    /// never stops the others.
    pub async fn on_pod_completed(self: &Arc<Self>, canvas_id: &CanvasId, pod_id: &PodId) -> Result<()> {
        let engine_run = self.queue.finish(pod_id);
        let finished = self.tracker.record_completion(pod_id);

        let result = self.fan_out(canvas_id, pod_id, engine_run).await;

        // Cleanup wipes outputs, so it only starts once the fan-out read them.
        for run in finished {
            self.spawn_cleanup(run);
        }
        result
    }

    async fn fan_out(self: &Arc<Self>, canvas_id: &CanvasId, pod_id: &PodId, engine_run: bool) -> Result<()> {
        let pod = match self.graph.pod(pod_id).await? {
            Some(pod) => pod,
            None => {
                debug!(pod_id = %pod_id, "Completed pod no longer exists");
                return Ok(());
            }
        };

        let outgoing = self.graph.outgoing(pod_id).await?;
        let has_auto = outgoing.iter().any(|c| c.trigger_mode == TriggerMode::Auto);
        let starts_run = pod.auto_clear && !engine_run;
        if starts_run && has_auto {
            if let Err(e) = self.start_tracking(canvas_id, &pod).await {
                warn!(pod_id = %pod_id, error = %e, "Failed to plan auto-clear run");
            }
        }
        let standalone = starts_run && !has_auto;

        let output = match self.runner.last_output(pod_id).await {
            Ok(output) => output.unwrap_or_default(),
            Err(e) => {
                warn!(pod_id = %pod_id, error = %e, "Failed to read pod output");
                String::new()
            }
        };

        let mut decide = Vec::new();
        for conn in outgoing {
            if !self.target_exists(&conn).await {
                continue;
            }
            match conn.trigger_mode {
                TriggerMode::AiDecide => decide.push(conn),
                mode => {
                    if let Err(e) = self.route(canvas_id, pod_id, &conn, mode, output.clone()).await {
                        warn!(connection_id = %conn.id, error = %e, "Failed to dispatch trigger");
                    }
                }
            }
        }

        if !decide.is_empty() {
            if let Some(batch) = self.gate.begin(canvas_id, pod_id, output, decide).await {
                self.spawn_decide(batch);
            }
        }

        if standalone {
            info!(pod_id = %pod_id, "Clearing standalone auto-clear pod");
            self.event_bus.publish(WorkflowEvent::PodCleared {
                canvas_id: canvas_id.clone(),
                pod: pod_id.clone(),
            });
            self.spawn_clear(canvas_id.clone(), vec![pod_id.clone()]);
        }
        Ok(())
    }

    /// Plan the run started by `pod`. An empty plan tracks nothing.
    async fn start_tracking(&self, canvas_id: &CanvasId, pod: &Pod) -> Result<()> {
        let connections = self.graph.connections(canvas_id).await?;
        let plan = compute_terminal_set(&connections, &pod.id);
        if !self.tracker.initialize(canvas_id.clone(), pod.id.clone(), plan) {
            debug!(pod_id = %pod.id, "No terminals reachable, run not tracked");
        }
        Ok(())
    }

    /// Edges whose target disappeared are skipped.
    async fn target_exists(&self, conn: &Connection) -> bool {
        match self.graph.pod(&conn.target).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(connection_id = %conn.id, target_pod = %conn.target, "Skipping connection to missing pod");
                false
            }
            Err(e) => {
                warn!(connection_id = %conn.id, error = %e, "Failed to look up target pod");
                false
            }
        }
    }

    /// Hand one source's content to a connection's target: through the join
    /// barrier when the target waits on several sources, otherwise straight
    /// to the busy queue.
    async fn route(
        self: &Arc<Self>,
        canvas_id: &CanvasId,
        source: &PodId,
        conn: &Connection,
        mode: TriggerMode,
        content: String,
    ) -> Result<()> {
        let incoming = self.graph.incoming(&conn.target).await?;
        let required = required_sources(&incoming);
        if required.len() >= 2 {
            let outcome = self
                .joins
                .record_arrival(&conn.target, &required, source, content);
            return self.handle_join_outcome(canvas_id, conn, outcome).await;
        }

        self.fire_or_enqueue(QueuedTrigger {
            canvas_id: canvas_id.clone(),
            connection_id: conn.id.clone(),
            source: source.clone(),
            target: conn.target.clone(),
            content,
            mode,
            preformatted: false,
        })
        .await;
        Ok(())
    }

    /// A rejected `ai-decide` connection resolves its source at a join target.
    async fn reject(self: &Arc<Self>, canvas_id: &CanvasId, conn: &Connection, reason: String) -> Result<()> {
        let incoming = self.graph.incoming(&conn.target).await?;
        let required = required_sources(&incoming);
        if required.len() < 2 {
            return Ok(());
        }
        let outcome = self
            .joins
            .record_rejection(&conn.target, &required, &conn.source, reason);
        self.handle_join_outcome(canvas_id, conn, outcome).await
    }

    async fn handle_join_outcome(
        self: &Arc<Self>,
        canvas_id: &CanvasId,
        conn: &Connection,
        outcome: JoinOutcome,
    ) -> Result<()> {
        match outcome {
            JoinOutcome::Pending(status) => {
                info!(
                    target_pod = %conn.target,
                    completed = status.completed.len(),
                    pending = status.pending.len(),
                    "Join waiting on sources"
                );
                self.event_bus.publish(WorkflowEvent::JoinPending {
                    canvas_id: canvas_id.clone(),
                    target: conn.target.clone(),
                    completed: status.completed,
                    rejected: status.rejected,
                    pending: status.pending,
                });
            }
            JoinOutcome::Ready(sections) => {
                let payload = self.merge_sections(sections).await;
                info!(target_pod = %conn.target, "Join complete, firing merged trigger");
                self.fire_or_enqueue(QueuedTrigger {
                    canvas_id: canvas_id.clone(),
                    connection_id: conn.id.clone(),
                    source: conn.source.clone(),
                    target: conn.target.clone(),
                    content: payload,
                    mode: TriggerMode::Auto,
                    preformatted: true,
                })
                .await;
            }
            JoinOutcome::Abandoned(status) => {
                info!(
                    target_pod = %conn.target,
                    rejected = status.rejected.len(),
                    "Join abandoned"
                );
                self.event_bus.publish(WorkflowEvent::JoinAbandoned {
                    canvas_id: canvas_id.clone(),
                    target: conn.target.clone(),
                });
                self.on_branch_pruned(&conn.target).await;
            }
        }
        Ok(())
    }

    /// Label each section with its source pod's display name.
    async fn merge_sections(&self, sections: Vec<(PodId, String)>) -> String {
        let mut named = Vec::with_capacity(sections.len());
        for (source, content) in sections {
            let name = match self.graph.pod(&source).await {
                Ok(Some(pod)) => pod.name,
                _ => source.to_string(),
            };
            named.push((name, content));
        }
        merge_payload(&named, &self.config.merge_separator)
    }

    /// Summarize long handoffs when enabled; fall back to the raw content.
    async fn prepare_content(&self, source: &PodId, content: String) -> String {
        let summarizer = match self.summarizer {
            Some(ref s) if self.config.summarize_handoff => s,
            _ => return content,
        };
        if content.chars().count() <= self.config.summary_threshold_chars {
            return content;
        }
        match summarizer.summarize(source, &content).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(source_pod = %source, error = %e, "Summary failed, handing off full output");
                content
            }
        }
    }

    async fn fire_or_enqueue(self: &Arc<Self>, trigger: QueuedTrigger) {
        let busy = match self.runner.is_busy(&trigger.target).await {
            Ok(busy) => busy,
            Err(e) => {
                warn!(target_pod = %trigger.target, error = %e, "Failed to query pod state");
                false
            }
        };

        let target = trigger.target.clone();
        let connection_id = trigger.connection_id.clone();
        match self.queue.admit(trigger, busy) {
            Admission::Start(trigger) => self.spawn_run(trigger),
            Admission::Queued { position } => {
                info!(target_pod = %target, connection_id = %connection_id, position, "Target busy, trigger queued");
                self.event_bus.publish(WorkflowEvent::TriggerQueued {
                    target,
                    connection_id,
                    queue_len: position,
                });
            }
        }
    }

    fn spawn_run(self: &Arc<Self>, trigger: QueuedTrigger) {
        self.tasks.spawn(Arc::clone(self).run_trigger(trigger));
    }

    /// Run the target and treat the run's end as its completion and idle
    /// transition. A failed run prunes the branch it would have fed.
    fn run_trigger(self: Arc<Self>, trigger: QueuedTrigger) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let content = if trigger.preformatted {
                trigger.content
            } else {
                self.prepare_content(&trigger.source, trigger.content).await
            };

            info!(
                source_pod = %trigger.source,
                target_pod = %trigger.target,
                mode = %trigger.mode,
                "Firing pod"
            );
            self.event_bus.publish(WorkflowEvent::TriggerFired {
                canvas_id: trigger.canvas_id.clone(),
                source: trigger.source.clone(),
                target: trigger.target.clone(),
                mode: trigger.mode,
            });

            let request = FireRequest {
                canvas_id: trigger.canvas_id.clone(),
                pod_id: trigger.target.clone(),
                content,
                mode: trigger.mode,
            };
            match self.runner.fire(request).await {
                Ok(_) => {
                    if let Err(e) = self.on_pod_completed(&trigger.canvas_id, &trigger.target).await {
                        warn!(pod_id = %trigger.target, error = %e, "Failed to process completion");
                    }
                }
                Err(e) => {
                    error!(target_pod = %trigger.target, error = %e, "Pod run failed");
                    self.event_bus.publish(WorkflowEvent::TriggerFailed {
                        canvas_id: trigger.canvas_id.clone(),
                        target: trigger.target.clone(),
                        error: e.to_string(),
                    });
                    self.queue.finish(&trigger.target);
                    self.on_branch_pruned(&trigger.target).await;
                }
            }

            self.on_pod_idle(&trigger.target).await;
        })
    }

    /// A pod went idle: start the next trigger waiting for it, if any.
    pub async fn on_pod_idle(self: &Arc<Self>, pod_id: &PodId) {
        match self.runner.is_busy(pod_id).await {
            Ok(true) => {
                debug!(pod_id = %pod_id, "Pod busy again, keeping queue");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(pod_id = %pod_id, error = %e, "Failed to query pod state"),
        }
        if let Some(next) = self.queue.drain(pod_id) {
            debug!(pod_id = %pod_id, connection_id = %next.connection_id, "Draining queued trigger");
            self.spawn_run(next);
        }
    }

    fn spawn_decide(self: &Arc<Self>, batch: DecideBatch) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let response = this.gate.request(&batch).await;
            this.on_approval_batch_resolved(batch, response).await;
        });
    }

    /// The approver answered (or failed to answer) a batch.
    ///
    /// Approved connections are dispatched with the source's output, rejected
    /// ones resolve their join, and connections without a usable decision
    /// never fire.
    pub async fn on_approval_batch_resolved(
        self: &Arc<Self>,
        batch: DecideBatch,
        response: Result<DecideBatchResponse>,
    ) {
        let outcomes = self.gate.resolve(&batch, response).await;
        for (conn, outcome) in outcomes {
            let result = match outcome {
                DecideOutcome::Approved { .. } => {
                    if !self.target_exists(&conn).await {
                        continue;
                    }
                    self.route(
                        &batch.canvas_id,
                        &batch.source,
                        &conn,
                        TriggerMode::AiDecide,
                        batch.source_output.clone(),
                    )
                    .await
                }
                DecideOutcome::Rejected { reason } => self.reject(&batch.canvas_id, &conn, reason).await,
                DecideOutcome::Error { .. } => Ok(()),
            };
            if let Err(e) = result {
                warn!(connection_id = %conn.id, error = %e, "Failed to apply decision");
            }
        }
    }

    /// A planned firing of `pod_id` will never happen. Every tracked run that
    /// includes the pod stops expecting one completion from each terminal
    /// still reachable from it.
    pub async fn on_branch_pruned(self: &Arc<Self>, pod_id: &PodId) {
        for canvas_id in self.tracker.canvases_of(pod_id) {
            let connections = match self.graph.connections(&canvas_id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(pod_id = %pod_id, error = %e, "Failed to load canvas for pruning");
                    continue;
                }
            };
            let reachable = auto_reachable(&connections, pod_id);
            info!(pod_id = %pod_id, reachable = reachable.len(), "Pruning branch");
            for run in self.tracker.decrement_expected(pod_id, &reachable) {
                self.spawn_cleanup(run);
            }
        }
    }

    fn spawn_cleanup(&self, run: CompletedRun) {
        self.event_bus.publish(WorkflowEvent::RunComplete {
            canvas_id: run.canvas_id.clone(),
            origin: run.origin.clone(),
            pods: run.pods.clone(),
        });
        self.spawn_clear(run.canvas_id, run.pods);
    }

    fn spawn_clear(&self, canvas_id: CanvasId, pods: Vec<PodId>) {
        let cleaner = self.cleaner.clone();
        self.tasks.spawn(async move {
            if let Err(e) = cleaner.clear_run(&canvas_id, &pods).await {
                warn!(canvas_id = %canvas_id, error = %e, "Run cleanup failed");
            }
        });
    }

    /// Drop the pod's queued triggers and abort its current run.
    ///
    /// Each dropped trigger is a firing that will never happen, so the branch
    /// is pruned once per trigger. Returns how many were dropped.
    pub async fn abort(self: &Arc<Self>, pod_id: &PodId) -> Result<usize> {
        let dropped = self.queue.purge(pod_id);
        if !dropped.is_empty() {
            info!(pod_id = %pod_id, dropped = dropped.len(), "Dropped queued triggers");
        }
        for trigger in &dropped {
            debug!(pod_id = %pod_id, connection_id = %trigger.connection_id, "Pruning dropped trigger");
            self.on_branch_pruned(pod_id).await;
        }
        self.runner.abort(pod_id).await?;
        Ok(dropped.len())
    }

    /// Wait until every run, approval round trip and cleanup the engine
    /// started has finished, including work started along the way.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn joins(&self) -> &JoinBarrier {
        &self.joins
    }

    pub fn queue(&self) -> &BusyQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &TerminalTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &AiDecideGate {
        &self.gate
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
