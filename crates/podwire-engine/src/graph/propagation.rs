use std::collections::{HashMap, HashSet, VecDeque};

use podwire_core::types::{Connection, PodId, TriggerMode};

/// Terminal pods of a run and the pods its `auto` edges reach.
#[derive(Debug, Clone, Default)]
pub struct Propagation {
    /// Terminal pod -> number of completions expected from it.
    pub terminals: HashMap<PodId, u32>,
    /// Every pod reached from the origin (origin first, BFS order).
    pub visited: Vec<PodId>,
}

impl Propagation {
    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Sum of expected completions over all terminals.
    pub fn expected_total(&self) -> u32 {
        self.terminals.values().sum()
    }
}

/// Breadth-first walk over `auto` edges from `origin`.
///
/// Counts start at 1 for the origin. A visited pod with at least one incoming
/// `direct` edge gets +1 (once, however many direct edges it has) before its
/// count is forwarded; the origin itself never gets the bonus. Pods without
/// outgoing `auto` edges are terminal. Each pod is visited once.
pub fn compute_terminal_set(connections: &[Connection], origin: &PodId) -> Propagation {
    let mut auto_out: HashMap<&PodId, Vec<&PodId>> = HashMap::new();
    let mut direct_targets: HashSet<&PodId> = HashSet::new();
    for conn in connections {
        match conn.trigger_mode {
            TriggerMode::Auto => auto_out.entry(&conn.source).or_default().push(&conn.target),
            TriggerMode::Direct => {
                direct_targets.insert(&conn.target);
            }
            TriggerMode::AiDecide => {}
        }
    }

    let mut counts: HashMap<PodId, u32> = HashMap::new();
    counts.insert(origin.clone(), 1);
    let mut seen: HashSet<PodId> = HashSet::new();
    seen.insert(origin.clone());
    let mut queue = VecDeque::from([origin.clone()]);
    let mut result = Propagation::default();

    while let Some(pod) = queue.pop_front() {
        let mut count = counts.get(&pod).copied().unwrap_or(0);
        if pod != *origin && direct_targets.contains(&pod) {
            count += 1;
            counts.insert(pod.clone(), count);
        }

        match auto_out.get(&pod) {
            Some(targets) if !targets.is_empty() => {
                for target in targets {
                    if seen.insert((*target).clone()) {
                        *counts.entry((*target).clone()).or_insert(0) += count;
                        queue.push_back((*target).clone());
                    }
                }
            }
            _ => {
                if pod != *origin {
                    result.terminals.insert(pod.clone(), count);
                }
            }
        }

        result.visited.push(pod);
    }

    result
}

/// Every pod reachable from `start` over `auto` edges, `start` included.
pub fn auto_reachable(connections: &[Connection], start: &PodId) -> HashSet<PodId> {
    let mut reached = HashSet::from([start.clone()]);
    let mut queue = VecDeque::from([start.clone()]);

    while let Some(pod) = queue.pop_front() {
        for conn in connections {
            if conn.trigger_mode == TriggerMode::Auto
                && conn.source == pod
                && reached.insert(conn.target.clone())
            {
                queue.push_back(conn.target.clone());
            }
        }
    }

    reached
}
