use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use podwire_core::types::{CanvasId, ConnectionId, PodId, TriggerMode};

/// A trigger waiting for, or about to start, a run of its target pod.
#[derive(Debug, Clone)]
pub struct QueuedTrigger {
    pub canvas_id: CanvasId,
    pub connection_id: ConnectionId,
    pub source: PodId,
    pub target: PodId,
    pub content: String,
    pub mode: TriggerMode,
    /// Content is already composed (e.g. a merged join payload).
    pub preformatted: bool,
}

/// Per-target lane: whether the engine has a run in flight, and who waits.
#[derive(Debug, Default)]
struct Lane {
    running: bool,
    queue: VecDeque<QueuedTrigger>,
}

/// Outcome of offering a trigger to its target's lane.
#[derive(Debug)]
pub enum Admission {
    /// The lane was free and is now marked running; start this trigger.
    Start(QueuedTrigger),
    /// The target is busy; the trigger waits at this queue position.
    Queued { position: usize },
}

/// Per-target FIFO serializing runs of the same pod.
///
/// At most one engine-started run per pod is in flight. Waiting triggers are
/// released one per idle transition, in arrival order.
#[derive(Default)]
pub struct BusyQueue {
    lanes: DashMap<PodId, Lane>,
}

impl BusyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the trigger now if its target is free, otherwise enqueue it.
    ///
    /// `target_busy` is the runner's view of the pod (e.g. a manual run);
    /// the lane's own running flag covers runs the engine started. A trigger
    /// never overtakes ones already waiting.
    pub fn admit(&self, trigger: QueuedTrigger, target_busy: bool) -> Admission {
        let mut lane = self.lanes.entry(trigger.target.clone()).or_default();
        if lane.running || target_busy || !lane.queue.is_empty() {
            lane.queue.push_back(trigger);
            Admission::Queued {
                position: lane.queue.len(),
            }
        } else {
            lane.running = true;
            Admission::Start(trigger)
        }
    }

    /// Pop the next waiting trigger if no engine run is in flight, marking
    /// the lane running.
    pub fn drain(&self, target: &PodId) -> Option<QueuedTrigger> {
        match self.lanes.entry(target.clone()) {
            Entry::Occupied(mut entry) => {
                let lane = entry.get_mut();
                if lane.running {
                    return None;
                }
                match lane.queue.pop_front() {
                    Some(next) => {
                        lane.running = true;
                        Some(next)
                    }
                    None => {
                        entry.remove();
                        None
                    }
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Mark the engine's run of `target` finished.
    ///
    /// Returns whether the engine had started that run.
    pub fn finish(&self, target: &PodId) -> bool {
        match self.lanes.entry(target.clone()) {
            Entry::Occupied(mut entry) => {
                let lane = entry.get_mut();
                let was_running = lane.running;
                lane.running = false;
                if lane.queue.is_empty() {
                    entry.remove();
                }
                was_running
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Drop every waiting trigger for `target`, returning them in order.
    pub fn purge(&self, target: &PodId) -> Vec<QueuedTrigger> {
        match self.lanes.get_mut(target) {
            Some(mut lane) => lane.queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_running(&self, target: &PodId) -> bool {
        self.lanes.get(target).is_some_and(|l| l.running)
    }

    /// Number of triggers waiting for `target`.
    pub fn len(&self, target: &PodId) -> usize {
        self.lanes.get(target).map_or(0, |l| l.queue.len())
    }

    /// Ids of the connections waiting for `target`, in order.
    pub fn waiting(&self, target: &PodId) -> Vec<ConnectionId> {
        self.lanes
            .get(target)
            .map(|l| l.queue.iter().map(|t| t.connection_id.clone()).collect())
            .unwrap_or_default()
    }
}
