//! Definition of the simulated participant interface.

use crate::error::SimulationError;
use crate::message::Envelope;
use crate::simulation::Context;
use crate::value::Proposal;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Index of a node in its network. The network's node order defines leadership.
pub type NodeId = usize;

/// The value a node decided and the simulated time at which it did so.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub proposal: Proposal,
    /// Simulated seconds since the start of the run.
    pub time: f64,
}

/// Terminal output of a node: unset until the node terminates, immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct Output {
    decision: Option<Decision>,
    terminate_calls: u32,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the node's decision. The first call wins; later calls are logged and ignored.
    ///
    /// Returns whether the decision was recorded.
    pub fn terminate(&mut self, node: NodeId, proposal: Proposal, time: f64) -> bool {
        self.terminate_calls += 1;
        if let Some(decision) = &self.decision {
            warn!(
                "node {node}: ignoring terminate({proposal}, {time}), already decided {} at {}",
                decision.proposal, decision.time
            );
            return false;
        }
        debug!("node {node}: decided {proposal} at {time:.6}s");
        self.decision = Some(Decision { proposal, time });
        true
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.decision.is_some()
    }

    /// Number of times `terminate` was invoked. Correct protocol code invokes it at most once.
    pub fn terminate_calls(&self) -> u32 {
        self.terminate_calls
    }
}

/// A participant driven by the simulation.
///
/// Handlers run to completion one at a time. They may schedule timeouts and broadcast messages
/// through the [`Context`]. An `Err` aborts the whole run: it signals a broken protocol
/// invariant, never an expected runtime condition.
pub trait Node {
    fn id(&self) -> NodeId;

    /// Whether this node follows the protocol. Failed nodes are excluded from termination checks.
    fn is_correct(&self) -> bool {
        true
    }

    /// Called once at time 0, before any event is processed.
    fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError>;

    /// A timer armed for `time` fired.
    fn on_timeout(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError>;

    /// A message arrived at `time`.
    fn on_message(
        &mut self,
        ctx: &mut Context,
        time: f64,
        envelope: &Envelope,
    ) -> Result<(), SimulationError>;

    fn output(&self) -> &Output;

    fn decision(&self) -> Option<&Decision> {
        self.output().decision()
    }

    fn is_terminated(&self) -> bool {
        self.output().is_terminated()
    }
}

/// A crashed participant: it never sends anything, ignores every event and never decides.
#[derive(Debug)]
pub struct FailedNode {
    id: NodeId,
    output: Output,
}

impl FailedNode {
    pub fn new(id: NodeId) -> Self {
        FailedNode {
            id,
            output: Output::new(),
        }
    }
}

impl Node for FailedNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_correct(&self) -> bool {
        false
    }

    fn on_start(&mut self, _: &mut Context) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_timeout(&mut self, _: &mut Context, _: f64) -> Result<(), SimulationError> {
        Ok(())
    }

    fn on_message(&mut self, _: &mut Context, _: f64, _: &Envelope) -> Result<(), SimulationError> {
        Ok(())
    }

    fn output(&self) -> &Output {
        &self.output
    }
}
