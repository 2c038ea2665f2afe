use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use podwire_core::error::{PodwireError, Result};
use podwire_core::traits::GraphStore;
use podwire_core::types::{CanvasId, Connection, ConnectionId, DecideStatus, Pod, PodId};

#[derive(Default)]
struct GraphState {
    pods: HashMap<PodId, Pod>,
    /// Insertion order is kept so fan-out order is stable.
    connections: Vec<Connection>,
}

/// In-process graph store.
///
/// Removing a pod leaves its connections in place, the same way an external
/// store can briefly hold edges to a deleted pod; the dispatcher skips them.
#[derive(Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new(pods: Vec<Pod>, connections: Vec<Connection>) -> Self {
        let pods = pods.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            state: RwLock::new(GraphState { pods, connections }),
        }
    }

    pub async fn remove_pod(&self, id: &PodId) -> Option<Pod> {
        self.state.write().await.pods.remove(id)
    }

    pub async fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == *id)
            .cloned()
    }
}

impl GraphStore for MemoryGraph {
    fn pod(&self, id: &PodId) -> BoxFuture<'_, Result<Option<Pod>>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.state.read().await.pods.get(&id).cloned()) })
    }

    fn outgoing(&self, id: &PodId) -> BoxFuture<'_, Result<Vec<Connection>>> {
        let id = id.clone();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .connections
                .iter()
                .filter(|c| c.source == id)
                .cloned()
                .collect())
        })
    }

    fn incoming(&self, id: &PodId) -> BoxFuture<'_, Result<Vec<Connection>>> {
        let id = id.clone();
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .connections
                .iter()
                .filter(|c| c.target == id)
                .cloned()
                .collect())
        })
    }

    fn connections(&self, canvas: &CanvasId) -> BoxFuture<'_, Result<Vec<Connection>>> {
        let canvas = canvas.clone();
        Box::pin(async move {
            let state = self.state.read().await;
            // A connection belongs to the canvas of its source pod. Edges from
            // deleted pods are kept so propagation still sees them.
            Ok(state
                .connections
                .iter()
                .filter(|c| {
                    state
                        .pods
                        .get(&c.source)
                        .map_or(true, |p| p.canvas_id == canvas)
                })
                .cloned()
                .collect())
        })
    }

    fn update_decide_status(
        &self,
        id: &ConnectionId,
        status: DecideStatus,
        reason: Option<String>,
    ) -> BoxFuture<'_, Result<()>> {
        let id = id.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let conn = state
                .connections
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| PodwireError::ConnectionNotFound(id.to_string()))?;
            conn.decide_status = status;
            conn.decide_reason = reason;
            Ok(())
        })
    }
}
