use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, info, warn};

use podwire_core::error::Result;
use podwire_core::event::EventBus;
use podwire_core::traits::{Approver, GraphStore};
use podwire_core::types::{
    CanvasId, Connection, ConnectionId, DecideBatchRequest, DecideBatchResponse, DecideStatus,
    PodId, WorkflowEvent,
};

/// Reason recorded when the approver's response skips a connection.
pub const NO_DECISION_REASON: &str = "No decision returned for this connection";

/// Reason recorded for every connection of a batch whose request failed.
pub const BATCH_FAILED_REASON: &str = "AI decision request failed";

/// Reconciled decision for one requested connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecideOutcome {
    Approved { reason: String },
    Rejected { reason: String },
    Error { reason: String },
}

impl DecideOutcome {
    pub fn status(&self) -> DecideStatus {
        match self {
            DecideOutcome::Approved { .. } => DecideStatus::Approved,
            DecideOutcome::Rejected { .. } => DecideStatus::Rejected,
            DecideOutcome::Error { .. } => DecideStatus::Error,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            DecideOutcome::Approved { reason }
            | DecideOutcome::Rejected { reason }
            | DecideOutcome::Error { reason } => reason,
        }
    }
}

/// All `ai-decide` connections leaving one completed source.
#[derive(Debug, Clone)]
pub struct DecideBatch {
    pub canvas_id: CanvasId,
    pub source: PodId,
    /// Output of the source, handed downstream for approved connections.
    pub source_output: String,
    pub connections: Vec<Connection>,
}

impl DecideBatch {
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|c| c.id.clone()).collect()
    }
}

/// Match the approver's answer against the requested connections.
///
/// Every requested connection gets exactly one outcome, in request order.
/// Decisions win over per-connection errors; connections the response does
/// not mention, or every connection when the call failed, end in `Error`.
pub fn reconcile(
    requested: &[Connection],
    response: &Result<DecideBatchResponse>,
) -> Vec<(Connection, DecideOutcome)> {
    let response = match response {
        Ok(r) => r,
        Err(_) => {
            return requested
                .iter()
                .map(|c| {
                    (
                        c.clone(),
                        DecideOutcome::Error {
                            reason: BATCH_FAILED_REASON.to_string(),
                        },
                    )
                })
                .collect();
        }
    };

    let mut decisions: HashMap<&ConnectionId, DecideOutcome> = HashMap::new();
    for err in &response.errors {
        decisions.insert(
            &err.connection_id,
            DecideOutcome::Error {
                reason: err.error.clone(),
            },
        );
    }
    for result in &response.results {
        let reason = result.reason.clone();
        let outcome = if result.should_trigger {
            DecideOutcome::Approved { reason }
        } else {
            DecideOutcome::Rejected { reason }
        };
        decisions.insert(&result.connection_id, outcome);
    }

    requested
        .iter()
        .map(|c| {
            let outcome = decisions.remove(&c.id).unwrap_or_else(|| DecideOutcome::Error {
                reason: NO_DECISION_REASON.to_string(),
            });
            (c.clone(), outcome)
        })
        .collect()
}

/// Gates `ai-decide` connections behind one approval round trip per source.
pub struct AiDecideGate {
    graph: Arc<dyn GraphStore>,
    approver: Arc<dyn Approver>,
    event_bus: Arc<EventBus>,
    in_flight: DashSet<ConnectionId>,
}

impl AiDecideGate {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        approver: Arc<dyn Approver>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            graph,
            approver,
            event_bus,
            in_flight: DashSet::new(),
        }
    }

    /// Open a decision cycle for the given connections.
    ///
    /// Connections that already have a cycle in flight are left out. Returns
    /// `None` when nothing is left to decide.
    pub async fn begin(
        &self,
        canvas_id: &CanvasId,
        source: &PodId,
        source_output: String,
        connections: Vec<Connection>,
    ) -> Option<DecideBatch> {
        let mut admitted = Vec::with_capacity(connections.len());
        for conn in connections {
            if self.in_flight.insert(conn.id.clone()) {
                admitted.push(conn);
            } else {
                warn!(connection_id = %conn.id, "Decision already in flight, skipping");
            }
        }
        if admitted.is_empty() {
            return None;
        }

        for conn in &admitted {
            if let Err(e) = self
                .graph
                .update_decide_status(&conn.id, DecideStatus::Pending, None)
                .await
            {
                warn!(connection_id = %conn.id, error = %e, "Failed to mark decision pending");
            }
        }

        let batch = DecideBatch {
            canvas_id: canvas_id.clone(),
            source: source.clone(),
            source_output,
            connections: admitted,
        };

        info!(
            source_pod = %source,
            connections = batch.connections.len(),
            "Requesting AI decision batch"
        );
        self.event_bus.publish(WorkflowEvent::DecidePending {
            canvas_id: canvas_id.clone(),
            source: source.clone(),
            connection_ids: batch.connection_ids(),
        });

        Some(batch)
    }

    /// Send the batch to the approver.
    pub async fn request(&self, batch: &DecideBatch) -> Result<DecideBatchResponse> {
        self.approver
            .decide_batch(DecideBatchRequest {
                canvas_id: batch.canvas_id.clone(),
                source: batch.source.clone(),
                source_output: batch.source_output.clone(),
                connections: batch.connections.clone(),
                requested_at: Utc::now(),
            })
            .await
    }

    /// Close the decision cycle: record every connection's status, publish
    /// the result events, and return the reconciled outcomes.
    pub async fn resolve(
        &self,
        batch: &DecideBatch,
        response: Result<DecideBatchResponse>,
    ) -> Vec<(Connection, DecideOutcome)> {
        if let Err(ref e) = response {
            warn!(source_pod = %batch.source, error = %e, "AI decision batch failed");
        }

        let outcomes = reconcile(&batch.connections, &response);
        for (conn, outcome) in &outcomes {
            if let Err(e) = self
                .graph
                .update_decide_status(&conn.id, outcome.status(), Some(outcome.reason().to_string()))
                .await
            {
                warn!(connection_id = %conn.id, error = %e, "Failed to record decision");
            }
            self.in_flight.remove(&conn.id);

            let event = match outcome {
                DecideOutcome::Error { reason } => {
                    warn!(connection_id = %conn.id, reason = %reason, "No usable decision");
                    WorkflowEvent::DecideFailed {
                        canvas_id: batch.canvas_id.clone(),
                        connection_id: conn.id.clone(),
                        reason: reason.clone(),
                    }
                }
                decided => {
                    debug!(connection_id = %conn.id, status = ?decided.status(), "Decision recorded");
                    WorkflowEvent::DecideResolved {
                        canvas_id: batch.canvas_id.clone(),
                        connection_id: conn.id.clone(),
                        status: decided.status(),
                        reason: decided.reason().to_string(),
                    }
                }
            };
            self.event_bus.publish(event);
        }
        outcomes
    }

    /// Whether a decision cycle is open for this connection.
    pub fn is_in_flight(&self, id: &ConnectionId) -> bool {
        self.in_flight.contains(id)
    }
}
