use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info};

use podwire_core::config::{AppConfig, SimulatedDecision};
use podwire_core::error::Result;
use podwire_core::traits::{Approver, PodRunner, RunCleaner, Summarizer};
use podwire_core::types::{
    CanvasId, ConnectionId, DecideBatchRequest, DecideBatchResponse, EdgeDecision, EdgeError,
    FireRequest, PodId,
};

/// Runner that "runs" a pod by sleeping, then echoes what it was given.
pub struct SimulatedRunner {
    delay: Duration,
    busy: Mutex<HashSet<PodId>>,
    outputs: Mutex<HashMap<PodId, String>>,
}

impl SimulatedRunner {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            busy: Mutex::new(HashSet::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }
}

impl PodRunner for SimulatedRunner {
    fn is_busy(&self, id: &PodId) -> BoxFuture<'_, Result<bool>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.busy.lock().await.contains(&id)) })
    }

    fn last_output(&self, id: &PodId) -> BoxFuture<'_, Result<Option<String>>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.outputs.lock().await.get(&id).cloned()) })
    }

    fn fire(&self, request: FireRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let pod = request.pod_id;
            self.busy.lock().await.insert(pod.clone());
            debug!(pod_id = %pod, mode = %request.mode, bytes = request.content.len(), "Simulated run started");

            tokio::time::sleep(self.delay).await;

            let output = format!("{} handled {} bytes", pod, request.content.len());
            self.outputs.lock().await.insert(pod.clone(), output.clone());
            self.busy.lock().await.remove(&pod);
            Ok(output)
        })
    }

    fn abort(&self, id: &PodId) -> BoxFuture<'_, Result<()>> {
        let id = id.clone();
        Box::pin(async move {
            self.busy.lock().await.remove(&id);
            Ok(())
        })
    }
}

/// Approver answering from the `decision` field of each connection.
pub struct SimulatedApprover {
    decisions: HashMap<ConnectionId, SimulatedDecision>,
}

impl SimulatedApprover {
    pub fn from_config(config: &AppConfig) -> Self {
        let decisions = config
            .connections
            .iter()
            .filter_map(|c| c.decision.map(|d| (c.connection_id(), d)))
            .collect();
        Self { decisions }
    }
}

impl Approver for SimulatedApprover {
    fn decide_batch(&self, request: DecideBatchRequest) -> BoxFuture<'_, Result<DecideBatchResponse>> {
        Box::pin(async move {
            let mut response = DecideBatchResponse::default();
            for conn in request.connections {
                let decision = self
                    .decisions
                    .get(&conn.id)
                    .copied()
                    .unwrap_or(SimulatedDecision::Approve);
                match decision {
                    SimulatedDecision::Approve | SimulatedDecision::Reject => {
                        let approve = decision == SimulatedDecision::Approve;
                        response.results.push(EdgeDecision {
                            connection_id: conn.id,
                            should_trigger: approve,
                            reason: if approve { "approved by canvas file" } else { "rejected by canvas file" }
                                .to_string(),
                        });
                    }
                    SimulatedDecision::Error => response.errors.push(EdgeError {
                        connection_id: conn.id,
                        error: "simulated approval error".to_string(),
                    }),
                    SimulatedDecision::Omit => {}
                }
            }
            Ok(response)
        })
    }
}

/// Cleaner that only logs.
pub struct LoggingCleaner;

impl RunCleaner for LoggingCleaner {
    fn clear_run(&self, canvas: &CanvasId, pods: &[PodId]) -> BoxFuture<'_, Result<()>> {
        let canvas = canvas.clone();
        let pods: Vec<String> = pods.iter().map(|p| p.to_string()).collect();
        Box::pin(async move {
            info!(canvas_id = %canvas, pods = %pods.join(","), "Cleared run");
            Ok(())
        })
    }
}

/// Keeps the first line of an output.
pub struct FirstLineSummarizer;

impl Summarizer for FirstLineSummarizer {
    fn summarize(&self, _source: &PodId, content: &str) -> BoxFuture<'_, Result<String>> {
        let summary = content.lines().next().unwrap_or_default().to_string();
        Box::pin(async move { Ok(summary) })
    }
}
