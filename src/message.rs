//! Definitions central to simulated protocol messages.
//!
//! This module defines the closed set of messages exchanged by the three simulated protocols,
//! the kinds of votes they carry, and the routing envelope a message travels in. Messages are
//! small `Copy` values: the network model never serializes them.

use crate::node::NodeId;
use crate::value::{display_vote, Proposal, Vote};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of every message used by the simulated protocols.
///
/// Each protocol speaks a subset:
/// - Tendermint: `Proposal`, `PreVote`, `PreCommit`.
/// - Algorand: `Proposal`, `SoftVote`, `CertVote`, `NextVote`.
/// - Mir: `Proposal`, `PrepareVote`, `CommitVote`.
///
/// A node receiving a message outside its protocol's subset treats it as a fatal error.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Message {
    Proposal { cycle: u64, proposal: Proposal },
    PreVote { cycle: u64, vote: Vote },
    PreCommit { cycle: u64, vote: Vote },
    SoftVote { cycle: u64, vote: Vote },
    CertVote { cycle: u64, vote: Vote },
    NextVote { cycle: u64, vote: Vote },
    PrepareVote { cycle: u64, round: u64, vote: Vote },
    CommitVote { cycle: u64, round: u64, vote: Vote },
}

impl Message {
    /// The cycle this message belongs to.
    pub fn cycle(&self) -> u64 {
        match *self {
            Message::Proposal { cycle, .. }
            | Message::PreVote { cycle, .. }
            | Message::PreCommit { cycle, .. }
            | Message::SoftVote { cycle, .. }
            | Message::CertVote { cycle, .. }
            | Message::NextVote { cycle, .. }
            | Message::PrepareVote { cycle, .. }
            | Message::CommitVote { cycle, .. } => cycle,
        }
    }

    /// The kind of vote carried, or `None` for a proposal.
    pub fn vote_kind(&self) -> Option<VoteKind> {
        match self {
            Message::Proposal { .. } => None,
            Message::PreVote { .. } => Some(VoteKind::PreVote),
            Message::PreCommit { .. } => Some(VoteKind::PreCommit),
            Message::SoftVote { .. } => Some(VoteKind::SoftVote),
            Message::CertVote { .. } => Some(VoteKind::CertVote),
            Message::NextVote { .. } => Some(VoteKind::NextVote),
            Message::PrepareVote { .. } => Some(VoteKind::PrepareVote),
            Message::CommitVote { .. } => Some(VoteKind::CommitVote),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Proposal { cycle, proposal } => {
                write!(f, "Proposal[cycle={cycle}, proposal={proposal}]")
            }
            Message::PreVote { cycle, vote }
            | Message::PreCommit { cycle, vote }
            | Message::SoftVote { cycle, vote }
            | Message::CertVote { cycle, vote }
            | Message::NextVote { cycle, vote } => write!(
                f,
                "{}[cycle={cycle}, proposal={}]",
                self.vote_kind().map(|k| k.as_str()).unwrap_or("?"),
                display_vote(vote)
            ),
            Message::PrepareVote { cycle, round, vote }
            | Message::CommitVote { cycle, round, vote } => write!(
                f,
                "{}[cycle={cycle}, round={round}, proposal={}]",
                self.vote_kind().map(|k| k.as_str()).unwrap_or("?"),
                display_vote(vote)
            ),
        }
    }
}

/// The kind of a vote, used to label tallies and safety violations.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum VoteKind {
    PreVote,
    PreCommit,
    SoftVote,
    CertVote,
    NextVote,
    PrepareVote,
    CommitVote,
    /// Prepare-votes and commit-votes of one Mir round counted together.
    Prepared,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::PreVote => "pre-vote",
            VoteKind::PreCommit => "pre-commit",
            VoteKind::SoftVote => "soft-vote",
            VoteKind::CertVote => "cert-vote",
            VoteKind::NextVote => "next-vote",
            VoteKind::PrepareVote => "prepare-vote",
            VoteKind::CommitVote => "commit-vote",
            VoteKind::Prepared => "prepare+commit",
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision scope a quorum is evaluated in: a cycle, or a cycle and round for Mir.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Scope {
    pub cycle: u64,
    pub round: Option<u64>,
}

impl Scope {
    pub fn cycle(cycle: u64) -> Self {
        Scope { cycle, round: None }
    }

    pub fn round(cycle: u64, round: u64) -> Self {
        Scope {
            cycle,
            round: Some(round),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.round {
            Some(round) => write!(f, "cycle {} round {}", self.cycle, round),
            None => write!(f, "cycle {}", self.cycle),
        }
    }
}

/// A message together with its routing information.
///
/// The sender is recorded for tracing only: tallies count message occurrences, not distinct
/// senders.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Envelope {
    /// The node that broadcast the message.
    pub sender: NodeId,
    pub message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_cycle_and_kind() {
        let msg = Message::CommitVote {
            cycle: 4,
            round: 2,
            vote: None,
        };
        assert_eq!(msg.cycle(), 4);
        assert_eq!(msg.vote_kind(), Some(VoteKind::CommitVote));

        let proposal = Message::Proposal {
            cycle: 1,
            proposal: Proposal::from_id(9),
        };
        assert_eq!(proposal.vote_kind(), None);
    }

    #[test]
    fn test_message_display() {
        let msg = Message::PreVote {
            cycle: 0,
            vote: Some(Proposal::from_id(3)),
        };
        assert_eq!(msg.to_string(), "pre-vote[cycle=0, proposal=P3]");

        let msg = Message::PrepareVote {
            cycle: 1,
            round: 5,
            vote: None,
        };
        assert_eq!(msg.to_string(), "prepare-vote[cycle=1, round=5, proposal=nil]");
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::cycle(3).to_string(), "cycle 3");
        assert_eq!(Scope::round(3, 1).to_string(), "cycle 3 round 1");
    }
}
