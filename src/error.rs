//! Definition of the simulation errors.
//!
//! Every variant of [`SimulationError`] is fatal for the run that produced it: it means the
//! simulated protocol logic (or the way the simulation was assembled) is wrong. Conditions that
//! are expected during normal operation, such as stale timers or runs that exceed their time
//! limit, are not errors and never surface here.

use crate::message::{Scope, VoteKind};
use crate::node::NodeId;
use crate::value::Proposal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    /// Two distinct proposals reached quorum within the same decision scope.
    #[error("node {node}: safety violation, {kind} quorum on both {first} and {second} in {scope}")]
    SafetyViolation {
        node: NodeId,
        kind: VoteKind,
        scope: Scope,
        first: Proposal,
        second: Proposal,
    },

    /// A timeout fired in a state that never arms one.
    #[error("node {node}: unexpected timeout in state {state}")]
    UnexpectedTimeout { node: NodeId, state: &'static str },

    /// A message that the receiving protocol does not speak.
    #[error("node {node}: unexpected message {message}")]
    UnexpectedMessage { node: NodeId, message: String },

    /// Cert-votes reached quorum on the nil sentinel, which is never cert-voted.
    #[error("node {node}: cert-vote quorum on nil in cycle {cycle}")]
    NilCertificate { node: NodeId, cycle: u64 },

    /// The node at some position of the node list reports a different identifier.
    #[error("node at index {index} reports id {id}")]
    NodeIdMismatch { index: usize, id: NodeId },

    /// The network and the node list disagree on the number of participants.
    #[error("network has {network} nodes but {nodes} were supplied")]
    NodeCountMismatch { network: usize, nodes: usize },

    /// Two correct nodes decided different values.
    #[error("correct nodes decided different values: {first} and {second}")]
    ConflictingDecisions { first: Proposal, second: Proposal },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid experiment configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one correct node is required")]
    NoCorrectNodes,

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("timeout sweep range is empty: start {start} > end {end}")]
    EmptySweep { start: f64, end: f64 },

    #[error("latency jitter {0} is outside [0, 1]")]
    Jitter(f64),
}
