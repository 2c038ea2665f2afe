pub mod decide;
pub mod dispatcher;
pub mod graph;
pub mod join;
pub mod queue;
pub mod tracker;

pub use decide::{AiDecideGate, DecideBatch, DecideOutcome};
pub use dispatcher::{Collaborators, TriggerDispatcher};
pub use graph::{auto_reachable, compute_terminal_set, MemoryGraph, Propagation};
pub use join::{JoinBarrier, JoinOutcome, JoinStatus};
pub use queue::{Admission, BusyQueue, QueuedTrigger};
pub use tracker::{CompletedRun, TerminalTracker, TrackingRecord};
