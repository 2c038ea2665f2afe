use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use podwire_core::config::JoinPolicy;
use podwire_core::types::{Connection, PodId};

/// Bookkeeping for one join target.
#[derive(Debug, Clone)]
struct JoinMembership {
    required: Vec<PodId>,
    /// Arrival order is the merge order.
    completed: Vec<(PodId, String)>,
    rejected: Vec<(PodId, String)>,
}

impl JoinMembership {
    fn new(required: &[PodId]) -> Self {
        Self {
            required: required.to_vec(),
            completed: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn complete(&mut self, source: &PodId, content: String) {
        self.rejected.retain(|(id, _)| id != source);
        match self.completed.iter_mut().find(|(id, _)| id == source) {
            Some(slot) => slot.1 = content,
            None => self.completed.push((source.clone(), content)),
        }
    }

    fn reject(&mut self, source: &PodId, reason: String) {
        self.completed.retain(|(id, _)| id != source);
        match self.rejected.iter_mut().find(|(id, _)| id == source) {
            Some(slot) => slot.1 = reason,
            None => self.rejected.push((source.clone(), reason)),
        }
    }

    fn is_resolved(&self, id: &PodId) -> bool {
        self.completed.iter().any(|(c, _)| c == id) || self.rejected.iter().any(|(r, _)| r == id)
    }

    fn all_resolved(&self) -> bool {
        self.required.iter().all(|id| self.is_resolved(id))
    }

    fn status(&self) -> JoinStatus {
        JoinStatus {
            completed: self.completed.iter().map(|(id, _)| id.clone()).collect(),
            rejected: self.rejected.iter().map(|(id, _)| id.clone()).collect(),
            pending: self
                .required
                .iter()
                .filter(|id| !self.is_resolved(id))
                .cloned()
                .collect(),
        }
    }
}

/// Snapshot of a join target's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStatus {
    pub completed: Vec<PodId>,
    pub rejected: Vec<PodId>,
    pub pending: Vec<PodId>,
}

/// Result of recording an arrival or rejection.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    /// Still waiting on some sources.
    Pending(JoinStatus),
    /// Every source resolved; fire with these `(source, content)` sections.
    Ready(Vec<(PodId, String)>),
    /// Every source resolved without a usable completion; do not fire.
    Abandoned(JoinStatus),
}

/// Tracks which upstream pods must finish before a join target may fire.
///
/// Memberships are keyed by target pod. A resolved membership is removed under
/// the same entry lock that resolved it, so only one caller ever sees `Ready`
/// or `Abandoned` for it.
pub struct JoinBarrier {
    memberships: DashMap<PodId, JoinMembership>,
    policy: JoinPolicy,
}

impl JoinBarrier {
    pub fn new(policy: JoinPolicy) -> Self {
        Self {
            memberships: DashMap::new(),
            policy,
        }
    }

    /// Record that `source` completed toward `target` with `content`.
    ///
    /// `required` is the full source set of the target; it is only used when
    /// the membership is created.
    pub fn record_arrival(
        &self,
        target: &PodId,
        required: &[PodId],
        source: &PodId,
        content: String,
    ) -> JoinOutcome {
        self.record(target, required, |m| m.complete(source, content))
    }

    /// Record that the edge from `source` into `target` was rejected.
    pub fn record_rejection(
        &self,
        target: &PodId,
        required: &[PodId],
        source: &PodId,
        reason: String,
    ) -> JoinOutcome {
        self.record(target, required, |m| m.reject(source, reason))
    }

    fn record(
        &self,
        target: &PodId,
        required: &[PodId],
        apply: impl FnOnce(&mut JoinMembership),
    ) -> JoinOutcome {
        match self.memberships.entry(target.clone()) {
            Entry::Occupied(mut entry) => {
                apply(entry.get_mut());
                match self.resolve(entry.get()) {
                    Some(outcome) => {
                        entry.remove();
                        outcome
                    }
                    None => JoinOutcome::Pending(entry.get().status()),
                }
            }
            Entry::Vacant(entry) => {
                debug!(target_pod = %target, sources = required.len(), "Creating join membership");
                let mut membership = JoinMembership::new(required);
                apply(&mut membership);
                match self.resolve(&membership) {
                    Some(outcome) => outcome,
                    None => {
                        let status = membership.status();
                        entry.insert(membership);
                        JoinOutcome::Pending(status)
                    }
                }
            }
        }
    }

    fn resolve(&self, membership: &JoinMembership) -> Option<JoinOutcome> {
        if !membership.all_resolved() {
            return None;
        }
        let abandon = match self.policy {
            JoinPolicy::FireWithCompleted => membership.completed.is_empty(),
            JoinPolicy::AbandonOnRejection => {
                membership.completed.is_empty() || !membership.rejected.is_empty()
            }
        };
        if abandon {
            Some(JoinOutcome::Abandoned(membership.status()))
        } else {
            Some(JoinOutcome::Ready(membership.completed.clone()))
        }
    }

    /// Progress of a target that is still waiting.
    pub fn snapshot(&self, target: &PodId) -> Option<JoinStatus> {
        self.memberships.get(target).map(|m| m.status())
    }

    /// Drop a membership without firing.
    pub fn clear(&self, target: &PodId) -> bool {
        self.memberships.remove(target).is_some()
    }

    /// Number of targets currently waiting.
    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }
}

impl Default for JoinBarrier {
    fn default() -> Self {
        Self::new(JoinPolicy::default())
    }
}

/// The sources a target waits on: distinct sources of every incoming edge,
/// in edge order.
pub fn required_sources(incoming: &[Connection]) -> Vec<PodId> {
    let mut sources: Vec<PodId> = Vec::new();
    for conn in incoming {
        if !sources.contains(&conn.source) {
            sources.push(conn.source.clone());
        }
    }
    sources
}

/// Compose a merged payload from `(source name, content)` sections.
pub fn merge_payload(sections: &[(String, String)], separator: &str) -> String {
    sections
        .iter()
        .map(|(name, content)| format!("## Source: {}\n\n{}", name, content))
        .collect::<Vec<_>>()
        .join(separator)
}
