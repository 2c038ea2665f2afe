use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique pod identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(pub String);

impl PodId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PodId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for PodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique connection (edge) identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workspace a pod belongs to.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanvasId(pub String);

impl From<&str> for CanvasId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for CanvasId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution state of a pod, as reported by the pod store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    #[default]
    Idle,
    Running,
    Gated,
}

/// A long-running chat-style job on a canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub canvas_id: CanvasId,
    pub name: String,
    #[serde(default)]
    pub state: PodState,
    /// Clear the whole downstream run once every terminal pod has finished.
    #[serde(default)]
    pub auto_clear: bool,
}

impl Pod {
    pub fn new(id: impl Into<String>, canvas_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PodId(id.into()),
            canvas_id: CanvasId(canvas_id.into()),
            name: name.into(),
            state: PodState::Idle,
            auto_clear: false,
        }
    }

    pub fn with_auto_clear(mut self, auto_clear: bool) -> Self {
        self.auto_clear = auto_clear;
        self
    }
}

/// How a connection reacts to its source pod completing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    /// Manual / immediate trigger path.
    Direct,
    /// Fires automatically when the source completes.
    #[default]
    Auto,
    /// Fires only if the approval collaborator says so.
    AiDecide,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Direct => write!(f, "direct"),
            TriggerMode::Auto => write!(f, "auto"),
            TriggerMode::AiDecide => write!(f, "ai-decide"),
        }
    }
}

/// Decision status of an `ai-decide` connection.
///
/// `None -> Pending -> {Approved, Rejected, Error}`; a new cycle always
/// restarts from `Pending`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecideStatus {
    #[default]
    #[serde(rename = "none")]
    Undecided,
    Pending,
    Approved,
    Rejected,
    Error,
}

/// A directed link between two pods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: PodId,
    pub target: PodId,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub decide_status: DecideStatus,
    #[serde(default)]
    pub decide_reason: Option<String>,
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        trigger_mode: TriggerMode,
    ) -> Self {
        Self {
            id: ConnectionId(id.into()),
            source: PodId(source.into()),
            target: PodId(target.into()),
            trigger_mode,
            decide_status: DecideStatus::Undecided,
            decide_reason: None,
        }
    }

    pub fn auto(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(id, source, target, TriggerMode::Auto)
    }

    pub fn direct(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(id, source, target, TriggerMode::Direct)
    }

    pub fn ai_decide(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::new(id, source, target, TriggerMode::AiDecide)
    }
}

/// Input handed to the pod runner when a trigger fires.
#[derive(Debug, Clone)]
pub struct FireRequest {
    pub canvas_id: CanvasId,
    pub pod_id: PodId,
    pub content: String,
    pub mode: TriggerMode,
}

/// One approval round trip: every `ai-decide` edge leaving one completed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideBatchRequest {
    pub canvas_id: CanvasId,
    pub source: PodId,
    pub source_output: String,
    pub connections: Vec<Connection>,
    pub requested_at: DateTime<Utc>,
}

/// A decision the approver returned for a single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDecision {
    pub connection_id: ConnectionId,
    pub should_trigger: bool,
    #[serde(default)]
    pub reason: String,
}

/// A per-connection failure inside an otherwise successful batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeError {
    pub connection_id: ConnectionId,
    pub error: String,
}

/// Approver response. Not guaranteed to cover every requested connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecideBatchResponse {
    #[serde(default)]
    pub results: Vec<EdgeDecision>,
    #[serde(default)]
    pub errors: Vec<EdgeError>,
}

/// Status event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A join target is still waiting on some of its sources.
    JoinPending {
        canvas_id: CanvasId,
        target: PodId,
        completed: Vec<PodId>,
        rejected: Vec<PodId>,
        pending: Vec<PodId>,
    },
    /// Every source of a join was rejected; the target will not fire.
    JoinAbandoned { canvas_id: CanvasId, target: PodId },
    /// An approval batch was sent for these connections.
    DecidePending {
        canvas_id: CanvasId,
        source: PodId,
        connection_ids: Vec<ConnectionId>,
    },
    /// The approver approved or rejected a connection.
    DecideResolved {
        canvas_id: CanvasId,
        connection_id: ConnectionId,
        status: DecideStatus,
        reason: String,
    },
    /// No usable decision for a connection.
    DecideFailed {
        canvas_id: CanvasId,
        connection_id: ConnectionId,
        reason: String,
    },
    /// Target was busy; the trigger waits in its queue.
    TriggerQueued {
        target: PodId,
        connection_id: ConnectionId,
        queue_len: usize,
    },
    /// A pod run was started.
    TriggerFired {
        canvas_id: CanvasId,
        source: PodId,
        target: PodId,
        mode: TriggerMode,
    },
    /// Starting or running a pod failed.
    TriggerFailed {
        canvas_id: CanvasId,
        target: PodId,
        error: String,
    },
    /// Every terminal pod of a run finished; the run was cleared.
    RunComplete {
        canvas_id: CanvasId,
        origin: PodId,
        pods: Vec<PodId>,
    },
    /// A standalone auto-clear pod cleared itself.
    PodCleared { canvas_id: CanvasId, pod: PodId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_mode_wire_names() {
        let json = serde_json::to_string(&TriggerMode::AiDecide).unwrap();
        assert_eq!(json, "\"ai-decide\"");
        let parsed: TriggerMode = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(parsed, TriggerMode::Direct);
        assert_eq!(TriggerMode::AiDecide.to_string(), "ai-decide");
    }

    #[test]
    fn test_decide_status_defaults_to_none() {
        let conn: Connection = serde_json::from_str(
            r#"{"id": "c1", "source": "a", "target": "b", "trigger_mode": "ai-decide"}"#,
        )
        .unwrap();
        assert_eq!(conn.decide_status, DecideStatus::Undecided);
        assert_eq!(
            serde_json::to_string(&conn.decide_status).unwrap(),
            "\"none\""
        );
        assert!(conn.decide_reason.is_none());
    }

    #[test]
    fn test_connection_builders() {
        let c = Connection::auto("c1", "a", "b");
        assert_eq!(c.source, PodId::from("a"));
        assert_eq!(c.target, PodId::from("b"));
        assert_eq!(c.trigger_mode, TriggerMode::Auto);

        assert_eq!(Connection::direct("c2", "a", "b").trigger_mode, TriggerMode::Direct);
        assert_eq!(
            Connection::ai_decide("c3", "a", "b").trigger_mode,
            TriggerMode::AiDecide
        );
    }

    #[test]
    fn test_batch_response_tolerates_missing_sections() {
        let resp: DecideBatchResponse = serde_json::from_str(
            r#"{"results": [{"connection_id": "c1", "should_trigger": true}]}"#,
        )
        .unwrap();
        assert_eq!(resp.results.len(), 1);
        assert!(resp.results[0].reason.is_empty());
        assert!(resp.errors.is_empty());
    }
}
