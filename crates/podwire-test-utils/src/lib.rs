use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{broadcast, Semaphore};

use podwire_core::config::{AppConfig, SimulatedDecision};
use podwire_core::error::{PodwireError, Result};
use podwire_core::traits::{Approver, PodRunner, RunCleaner, Summarizer};
use podwire_core::types::*;

/// Parse a canvas written in config-file TOML.
pub fn canvas_from_toml(toml_str: &str) -> (Vec<Pod>, Vec<Connection>) {
    let config: AppConfig = toml::from_str(toml_str).expect("valid canvas toml");
    config.canvas().expect("consistent canvas")
}

/// Collect every event already published.
pub fn drain_events(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[derive(Default)]
struct RunnerState {
    outputs: HashMap<PodId, String>,
    external_busy: HashSet<PodId>,
    failing: HashSet<PodId>,
    held: HashMap<PodId, Arc<Semaphore>>,
    running: HashMap<PodId, usize>,
    max_running: HashMap<PodId, usize>,
    fired: Vec<FireRequest>,
    aborted: Vec<PodId>,
}

/// Pod runner whose runs finish immediately unless held.
///
/// Output defaults to `"<pod> output"`. Every `fire` is logged.
#[derive(Default)]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, pod: &str, output: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(PodId::from(pod), output.to_string());
        self
    }

    /// Runs of `pod` fail.
    pub fn with_failure(self, pod: &str) -> Self {
        self.state.lock().unwrap().failing.insert(PodId::from(pod));
        self
    }

    /// Change what later runs and completions of `pod` report.
    pub fn set_output(&self, pod: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(PodId::from(pod), output.to_string());
    }

    /// Mark a pod busy outside the engine (e.g. a manual run).
    pub fn set_busy(&self, pod: &str, busy: bool) {
        let mut state = self.state.lock().unwrap();
        if busy {
            state.external_busy.insert(PodId::from(pod));
        } else {
            state.external_busy.remove(&PodId::from(pod));
        }
    }

    /// Runs of `pod` block until released.
    pub fn hold(&self, pod: &str) {
        self.state
            .lock()
            .unwrap()
            .held
            .insert(PodId::from(pod), Arc::new(Semaphore::new(0)));
    }

    /// Let one held run of `pod` finish.
    pub fn release(&self, pod: &str) {
        if let Some(sem) = self.state.lock().unwrap().held.get(&PodId::from(pod)) {
            sem.add_permits(1);
        }
    }

    pub fn fired(&self) -> Vec<FireRequest> {
        self.state.lock().unwrap().fired.clone()
    }

    pub fn fired_pods(&self) -> Vec<String> {
        self.fired().into_iter().map(|r| r.pod_id.0).collect()
    }

    pub fn fire_count(&self, pod: &str) -> usize {
        self.fired().iter().filter(|r| r.pod_id.as_str() == pod).count()
    }

    /// Most runs of `pod` ever in flight at once.
    pub fn max_concurrent(&self, pod: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_running
            .get(&PodId::from(pod))
            .copied()
            .unwrap_or(0)
    }

    pub fn aborted(&self) -> Vec<PodId> {
        self.state.lock().unwrap().aborted.clone()
    }

    fn output_of(state: &RunnerState, pod: &PodId) -> String {
        state
            .outputs
            .get(pod)
            .cloned()
            .unwrap_or_else(|| format!("{} output", pod))
    }
}

impl PodRunner for ScriptedRunner {
    fn is_busy(&self, id: &PodId) -> BoxFuture<'_, Result<bool>> {
        let state = self.state.lock().unwrap();
        let busy = state.external_busy.contains(id) || state.running.get(id).is_some_and(|n| *n > 0);
        Box::pin(async move { Ok(busy) })
    }

    fn last_output(&self, id: &PodId) -> BoxFuture<'_, Result<Option<String>>> {
        let output = Self::output_of(&self.state.lock().unwrap(), id);
        Box::pin(async move { Ok(Some(output)) })
    }

    fn fire(&self, request: FireRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let pod = request.pod_id.clone();
            let held = {
                let mut state = self.state.lock().unwrap();
                state.fired.push(request);
                let running = state.running.entry(pod.clone()).or_insert(0);
                *running += 1;
                let now = *running;
                let max = state.max_running.entry(pod.clone()).or_insert(0);
                *max = (*max).max(now);
                state.held.get(&pod).cloned()
            };

            if let Some(sem) = held {
                if let Ok(permit) = sem.acquire().await {
                    permit.forget();
                }
            }
            tokio::task::yield_now().await;

            let mut state = self.state.lock().unwrap();
            if let Some(running) = state.running.get_mut(&pod) {
                *running -= 1;
            }
            if state.failing.contains(&pod) {
                return Err(PodwireError::PodRun {
                    pod: pod.to_string(),
                    message: "scripted failure".into(),
                });
            }
            Ok(Self::output_of(&state, &pod))
        })
    }

    fn abort(&self, id: &PodId) -> BoxFuture<'_, Result<()>> {
        self.state.lock().unwrap().aborted.push(id.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Approver answering from a per-connection script. Unscripted connections
/// are approved.
#[derive(Default)]
pub struct ScriptedApprover {
    decisions: Mutex<HashMap<ConnectionId, SimulatedDecision>>,
    fail: AtomicBool,
    calls: Mutex<Vec<DecideBatchRequest>>,
}

impl ScriptedApprover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, connection: &str, decision: SimulatedDecision) -> Self {
        self.decisions
            .lock()
            .unwrap()
            .insert(ConnectionId::from(connection), decision);
        self
    }

    /// Every batch call fails.
    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<DecideBatchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl Approver for ScriptedApprover {
    fn decide_batch(&self, request: DecideBatchRequest) -> BoxFuture<'_, Result<DecideBatchResponse>> {
        Box::pin(async move {
            let source = request.source.clone();
            let connections = request.connections.clone();
            self.calls.lock().unwrap().push(request);

            if self.fail.load(Ordering::SeqCst) {
                return Err(PodwireError::Approval {
                    source_pod: source.to_string(),
                    message: "scripted failure".into(),
                });
            }

            let decisions = self.decisions.lock().unwrap();
            let mut response = DecideBatchResponse::default();
            for conn in connections {
                match decisions.get(&conn.id).copied().unwrap_or(SimulatedDecision::Approve) {
                    SimulatedDecision::Approve => response.results.push(EdgeDecision {
                        connection_id: conn.id,
                        should_trigger: true,
                        reason: "relevant".into(),
                    }),
                    SimulatedDecision::Reject => response.results.push(EdgeDecision {
                        connection_id: conn.id,
                        should_trigger: false,
                        reason: "not relevant".into(),
                    }),
                    SimulatedDecision::Error => response.errors.push(EdgeError {
                        connection_id: conn.id,
                        error: "scripted error".into(),
                    }),
                    SimulatedDecision::Omit => {}
                }
            }
            Ok(response)
        })
    }
}

/// Cleaner that records every cleared run.
#[derive(Default)]
pub struct RecordingCleaner {
    runs: Mutex<Vec<(CanvasId, Vec<PodId>)>>,
}

impl RecordingCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<(CanvasId, Vec<PodId>)> {
        self.runs.lock().unwrap().clone()
    }
}

impl RunCleaner for RecordingCleaner {
    fn clear_run(&self, canvas: &CanvasId, pods: &[PodId]) -> BoxFuture<'_, Result<()>> {
        self.runs
            .lock()
            .unwrap()
            .push((canvas.clone(), pods.to_vec()));
        Box::pin(async { Ok(()) })
    }
}

/// Summarizer returning `"summary of <pod>"`, or failing when told to.
#[derive(Default)]
pub struct FixedSummarizer {
    fail: bool,
}

impl FixedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Summarizer for FixedSummarizer {
    fn summarize(&self, source: &PodId, _content: &str) -> BoxFuture<'_, Result<String>> {
        let result = if self.fail {
            Err(PodwireError::Summarizer("scripted failure".into()))
        } else {
            Ok(format!("summary of {}", source))
        };
        Box::pin(async move { result })
    }
}
