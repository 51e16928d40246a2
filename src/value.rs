//! Definitions central to proposed values.
//!
//! A [`Proposal`] is an opaque value minted by the leader of a cycle. Two proposals are equal
//! only if they are the same proposal: the identifier is unique within a simulation run, so
//! equality is identity rather than structure.
//!
//! Votes may be cast either for a proposal or explicitly for nothing. The latter is modelled
//! as the `None` variant of [`Vote`], which never compares equal to any proposal.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A value proposed by the leader of a cycle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct Proposal(u64);

impl Proposal {
    /// Wraps a raw identifier. Callers are responsible for uniqueness; inside a simulation
    /// proposals are minted through [`crate::simulation::Context::new_proposal`].
    pub fn from_id(id: u64) -> Self {
        Proposal(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A vote payload: `Some(proposal)` or `None` for the nil sentinel.
pub type Vote = Option<Proposal>;

/// Formats a vote, rendering the sentinel as `nil`.
pub fn display_vote(vote: &Vote) -> String {
    match vote {
        Some(proposal) => proposal.to_string(),
        None => "nil".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_identity() {
        let a = Proposal::from_id(1);
        let b = Proposal::from_id(2);
        assert_ne!(a, b);
        assert_eq!(a, Proposal::from_id(1));
        assert_ne!(Some(a), None);
    }

    #[test]
    fn test_sentinel_orders_before_proposals() {
        let nil: Vote = None;
        assert!(nil < Some(Proposal::from_id(0)));
        assert_eq!(display_vote(&nil), "nil");
        assert_eq!(display_vote(&Some(Proposal::from_id(7))), "P7");
    }
}
