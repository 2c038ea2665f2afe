use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use podwire_core::types::{CanvasId, PodId};

use crate::graph::Propagation;

/// Expected vs. actual completions for one run.
#[derive(Debug, Clone)]
pub struct TrackingRecord {
    pub canvas_id: CanvasId,
    pub origin: PodId,
    pub expected: HashMap<PodId, u32>,
    pub actual: HashMap<PodId, u32>,
    /// Every pod the run reaches over `auto` edges, origin included.
    pub members: Vec<PodId>,
}

impl TrackingRecord {
    fn new(canvas_id: CanvasId, origin: PodId, plan: Propagation) -> Self {
        let actual = plan.terminals.keys().map(|k| (k.clone(), 0)).collect();
        Self {
            canvas_id,
            origin,
            expected: plan.terminals,
            actual,
            members: plan.visited,
        }
    }

    /// Every terminal has seen at least as many completions as expected.
    pub fn is_complete(&self) -> bool {
        self.expected
            .iter()
            .all(|(pod, expected)| self.actual.get(pod).copied().unwrap_or(0) >= *expected)
    }

    /// Completions still owed across all terminals.
    pub fn outstanding(&self) -> u32 {
        self.expected
            .iter()
            .map(|(pod, expected)| expected.saturating_sub(self.actual.get(pod).copied().unwrap_or(0)))
            .sum()
    }

    fn is_member(&self, pod: &PodId) -> bool {
        self.members.iter().any(|m| m == pod)
    }
}

/// A run whose terminals all finished; its record is already gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub canvas_id: CanvasId,
    pub origin: PodId,
    pub pods: Vec<PodId>,
}

/// Counts terminal completions per run and reports finished runs.
///
/// Records are keyed by origin pod. A finished record is taken out with
/// `remove_if`, so exactly one caller gets its `CompletedRun`.
#[derive(Default)]
pub struct TerminalTracker {
    records: DashMap<PodId, TrackingRecord>,
}

impl TerminalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a run from `origin`. Returns `false` (and tracks
    /// nothing) when the plan has no terminal pods.
    pub fn initialize(&self, canvas_id: CanvasId, origin: PodId, plan: Propagation) -> bool {
        if plan.is_empty() {
            return false;
        }
        info!(
            origin = %origin,
            terminals = plan.terminals.len(),
            expected = plan.expected_total(),
            "Tracking auto-clear run"
        );
        let record = TrackingRecord::new(canvas_id, origin.clone(), plan);
        if self.records.insert(origin.clone(), record).is_some() {
            warn!(origin = %origin, "Replaced an unfinished run record");
        }
        true
    }

    /// Count a completion of `pod` toward every run that has it as a terminal.
    pub fn record_completion(&self, pod: &PodId) -> Vec<CompletedRun> {
        let mut finished = Vec::new();
        for mut record in self.records.iter_mut() {
            if !record.expected.contains_key(pod) {
                continue;
            }
            *record.actual.entry(pod.clone()).or_insert(0) += 1;
            debug!(origin = %record.origin, pod_id = %pod, outstanding = record.outstanding(), "Terminal completed");
            if record.is_complete() {
                finished.push(record.origin.clone());
            }
        }
        self.take_completed(finished)
    }

    /// Branch pruning: one planned firing upstream of `reachable` will never
    /// happen. Decrement each reachable terminal once in every run that
    /// contains `pod`, then report runs that became complete.
    pub fn decrement_expected(&self, pod: &PodId, reachable: &HashSet<PodId>) -> Vec<CompletedRun> {
        let mut finished = Vec::new();
        for mut record in self.records.iter_mut() {
            if !record.is_member(pod) {
                continue;
            }
            let origin = record.origin.clone();
            for (terminal, expected) in record.expected.iter_mut() {
                if reachable.contains(terminal) {
                    *expected = expected.saturating_sub(1);
                    debug!(origin = %origin, terminal = %terminal, expected = *expected, "Pruned expected completion");
                }
            }
            if record.is_complete() {
                finished.push(origin);
            }
        }
        self.take_completed(finished)
    }

    fn take_completed(&self, origins: Vec<PodId>) -> Vec<CompletedRun> {
        origins
            .into_iter()
            .filter_map(|origin| self.records.remove_if(&origin, |_, r| r.is_complete()))
            .map(|(_, record)| {
                info!(origin = %record.origin, pods = record.members.len(), "Run complete");
                CompletedRun {
                    canvas_id: record.canvas_id,
                    origin: record.origin,
                    pods: record.members,
                }
            })
            .collect()
    }

    /// Canvases of the runs that include `pod`.
    pub fn canvases_of(&self, pod: &PodId) -> Vec<CanvasId> {
        let mut canvases: Vec<CanvasId> = Vec::new();
        for record in self.records.iter() {
            if record.is_member(pod) && !canvases.contains(&record.canvas_id) {
                canvases.push(record.canvas_id.clone());
            }
        }
        canvases
    }

    /// Stop tracking a run without cleanup.
    pub fn clear(&self, origin: &PodId) -> Option<TrackingRecord> {
        self.records.remove(origin).map(|(_, r)| r)
    }

    pub fn record(&self, origin: &PodId) -> Option<TrackingRecord> {
        self.records.get(origin).map(|r| r.clone())
    }

    pub fn is_tracking(&self, origin: &PodId) -> bool {
        self.records.contains_key(origin)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
