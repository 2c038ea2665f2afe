pub mod propagation;
pub mod store;

pub use propagation::{auto_reachable, compute_terminal_set, Propagation};
pub use store::MemoryGraph;
