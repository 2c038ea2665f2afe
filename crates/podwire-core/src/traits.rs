use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Graph store: pods and connections, pure data access.
pub trait GraphStore: Send + Sync + 'static {
    /// Look up a pod. `None` if it no longer exists.
    fn pod(&self, id: &PodId) -> BoxFuture<'_, Result<Option<Pod>>>;

    /// Connections whose source is `id`.
    fn outgoing(&self, id: &PodId) -> BoxFuture<'_, Result<Vec<Connection>>>;

    /// Connections whose target is `id`.
    fn incoming(&self, id: &PodId) -> BoxFuture<'_, Result<Vec<Connection>>>;

    /// Every connection on a canvas.
    fn connections(&self, canvas: &CanvasId) -> BoxFuture<'_, Result<Vec<Connection>>>;

    /// Persist the decision status of an `ai-decide` connection.
    fn update_decide_status(
        &self,
        id: &ConnectionId,
        status: DecideStatus,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<()>>;
}

/// Pod runner: the chat execution engine.
pub trait PodRunner: Send + Sync + 'static {
    /// Whether the pod is currently running a turn.
    fn is_busy(&self, id: &PodId) -> BoxFuture<'_, Result<bool>>;

    /// The pod's most recent output, if any.
    fn last_output(&self, id: &PodId) -> BoxFuture<'_, Result<Option<String>>>;

    /// Start a run and resolve with its output once it finishes.
    fn fire(&self, request: FireRequest) -> BoxFuture<'_, Result<String>>;

    /// Abort the pod's current run.
    fn abort(&self, id: &PodId) -> BoxFuture<'_, Result<()>>;
}

/// Approval collaborator for `ai-decide` connections.
pub trait Approver: Send + Sync + 'static {
    /// Decide every connection of the batch in one round trip.
    fn decide_batch(
        &self,
        request: DecideBatchRequest,
    ) -> BoxFuture<'_, Result<DecideBatchResponse>>;
}

/// Clears chat history and output for every pod touched by a run.
pub trait RunCleaner: Send + Sync + 'static {
    fn clear_run(&self, canvas: &CanvasId, pods: &[PodId]) -> BoxFuture<'_, Result<()>>;
}

/// Condenses upstream output before it is handed downstream.
pub trait Summarizer: Send + Sync + 'static {
    fn summarize(&self, source: &PodId, content: &str) -> BoxFuture<'_, Result<String>>;
}
