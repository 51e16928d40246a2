//! Threshold counting of votes.
//!
//! All three protocols share the same quorum rule and the same tally structure, so latency
//! comparisons between them are made on equal terms.

use crate::error::SimulationError;
use crate::message::{Scope, VoteKind};
use crate::node::NodeId;
use crate::value::{Proposal, Vote};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Quorum threshold for a network of `nodes` participants: `floor(2n / 3) + 1`.
///
/// Failed nodes count towards `nodes`; the threshold is fixed for a whole run.
pub fn quorum_size(nodes: usize) -> usize {
    nodes * 2 / 3 + 1
}

/// Returns every key whose counter is at least `threshold`.
pub fn keys_with_at_least<K: Ord + Clone + Hash>(
    counts: &HashMap<K, usize>,
    threshold: usize,
) -> BTreeSet<K> {
    counts
        .iter()
        .filter(|(_, &count)| count >= threshold)
        .map(|(key, _)| key.clone())
        .collect()
}

/// Result of checking a tally against the quorum threshold.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum QuorumOutcome {
    /// Nothing has reached quorum yet.
    Pending,
    /// The nil sentinel reached quorum.
    Nil,
    /// A single proposal reached quorum.
    Value(Proposal),
}

impl QuorumOutcome {
    pub fn is_reached(&self) -> bool {
        !matches!(self, QuorumOutcome::Pending)
    }

    /// The quorum value as a vote, if any quorum was reached.
    pub fn vote(&self) -> Option<Vote> {
        match *self {
            QuorumOutcome::Pending => None,
            QuorumOutcome::Nil => Some(None),
            QuorumOutcome::Value(proposal) => Some(Some(proposal)),
        }
    }
}

/// Counts of votes of one kind within one scope, keyed by proposal or nil.
///
/// Counters only grow: there is no way to remove a vote once counted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoteCounts {
    counts: HashMap<Vote, usize>,
}

impl VoteCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vote: Vote) {
        *self.counts.entry(vote).or_insert(0) += 1;
    }

    pub fn count(&self, vote: &Vote) -> usize {
        self.counts.get(vote).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Every vote (including nil) counted at least `threshold` times.
    pub fn reached(&self, threshold: usize) -> BTreeSet<Vote> {
        keys_with_at_least(&self.counts, threshold)
    }

    /// Sum of this tally and `other`, key by key.
    pub fn combined(&self, other: &VoteCounts) -> VoteCounts {
        let mut counts = self.counts.clone();
        for (vote, count) in &other.counts {
            *counts.entry(*vote).or_insert(0) += count;
        }
        VoteCounts { counts }
    }

    /// Evaluates the tally against `threshold`.
    ///
    /// A proposal reaching quorum takes precedence over nil. Two distinct proposals reaching
    /// quorum in the same scope is reported as a safety violation observed by `node`.
    pub fn outcome(
        &self,
        threshold: usize,
        node: NodeId,
        kind: VoteKind,
        scope: Scope,
    ) -> Result<QuorumOutcome, SimulationError> {
        let reached = self.reached(threshold);
        let mut values = reached.iter().flatten();
        match (values.next(), values.next()) {
            (Some(&first), Some(&second)) => Err(SimulationError::SafetyViolation {
                node,
                kind,
                scope,
                first,
                second,
            }),
            (Some(&value), None) => Ok(QuorumOutcome::Value(value)),
            (None, _) if reached.contains(&None) => Ok(QuorumOutcome::Nil),
            (None, _) => Ok(QuorumOutcome::Pending),
        }
    }
}
