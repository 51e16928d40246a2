//! Tendermint-style participant.
//!
//! Every cycle walks through three timeout-driven steps: proposal, pre-vote and pre-commit.
//! Messages never advance the step on their own; they only let a node notice a pre-commit
//! quorum, and thus decide, before the step timer fires. A cycle that does not decide is
//! followed by the next one with a doubled timeout.

use crate::error::SimulationError;
use crate::message::{Envelope, Message, Scope, VoteKind};
use crate::node::{Node, NodeId, Output};
use crate::simulation::Context;
use crate::tally::{QuorumOutcome, VoteCounts};
use crate::value::{Proposal, Vote};
use log::{debug, trace};
use std::collections::BTreeMap;

/// Step of the current cycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Step {
    Proposal,
    PreVote,
    PreCommit,
}

/// What this node has observed about one cycle.
#[derive(Debug, Default)]
struct CycleState {
    /// Distinct proposals received, in arrival order.
    proposals: Vec<Proposal>,
    prevotes: VoteCounts,
    precommits: VoteCounts,
}

impl CycleState {
    fn add_proposal(&mut self, proposal: Proposal) {
        if !self.proposals.contains(&proposal) {
            self.proposals.push(proposal);
        }
    }

    /// The proposal received in this cycle, if there was exactly one.
    fn single_proposal(&self) -> Option<Proposal> {
        match self.proposals.as_slice() {
            [proposal] => Some(*proposal),
            _ => None,
        }
    }
}

pub struct TendermintNode {
    id: NodeId,
    cycle: u64,
    step: Step,
    /// Step duration for the current cycle; doubles on every cycle change.
    timeout: f64,
    /// Time of the most recently armed timer. Any other timer is stale.
    next_timer: Option<f64>,
    cycles: BTreeMap<u64, CycleState>,
    output: Output,
}

impl TendermintNode {
    pub fn new(id: NodeId, initial_timeout: f64) -> Self {
        TendermintNode {
            id,
            cycle: 0,
            step: Step::Proposal,
            timeout: initial_timeout,
            next_timer: None,
            cycles: BTreeMap::new(),
            output: Output::new(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    fn cycle_state(&mut self, cycle: u64) -> &mut CycleState {
        self.cycles.entry(cycle).or_default()
    }

    fn arm_timer(&mut self, ctx: &mut Context, time: f64) {
        let fire_at = time + self.timeout;
        self.next_timer = Some(fire_at);
        ctx.schedule_timeout(self.id, fire_at);
    }

    fn enter_proposal(&mut self, ctx: &mut Context, time: f64) {
        self.step = Step::Proposal;
        if ctx.leader(self.cycle) == self.id {
            let proposal = ctx.new_proposal();
            debug!("node {}: proposing {proposal} for cycle {}", self.id, self.cycle);
            let message = Message::Proposal {
                cycle: self.cycle,
                proposal,
            };
            ctx.broadcast(self.id, message, time);
        }
        self.arm_timer(ctx, time);
    }

    /// The proposal from the latest earlier cycle whose pre-votes reached quorum on it.
    fn locked_proposal(&self, ctx: &Context) -> Result<Option<Proposal>, SimulationError> {
        for (&cycle, state) in self.cycles.range(..self.cycle).rev() {
            let outcome =
                state
                    .prevotes
                    .outcome(ctx.quorum(), self.id, VoteKind::PreVote, Scope::cycle(cycle))?;
            if let QuorumOutcome::Value(proposal) = outcome {
                return Ok(Some(proposal));
            }
        }
        Ok(None)
    }

    fn do_prevote(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        let vote: Vote = match self.locked_proposal(ctx)? {
            Some(locked) => {
                trace!("node {}: pre-voting locked {locked}", self.id);
                Some(locked)
            }
            None => {
                let cycle = self.cycle;
                self.cycle_state(cycle).single_proposal()
            }
        };
        let message = Message::PreVote {
            cycle: self.cycle,
            vote,
        };
        ctx.broadcast(self.id, message, time);
        self.step = Step::PreVote;
        self.arm_timer(ctx, time);
        Ok(())
    }

    fn do_precommit(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        let (id, cycle, quorum) = (self.id, self.cycle, ctx.quorum());
        let outcome = self.cycle_state(cycle).prevotes.outcome(
            quorum,
            id,
            VoteKind::PreVote,
            Scope::cycle(cycle),
        )?;
        let vote = match outcome {
            QuorumOutcome::Value(proposal) => Some(proposal),
            QuorumOutcome::Nil | QuorumOutcome::Pending => None,
        };
        ctx.broadcast(self.id, Message::PreCommit { cycle, vote }, time);
        self.step = Step::PreCommit;
        self.arm_timer(ctx, time);
        Ok(())
    }

    fn next_cycle(&mut self, ctx: &mut Context, time: f64) {
        self.cycle += 1;
        self.timeout *= 2.0;
        debug!(
            "node {}: cycle {} without decision, moving on with timeout {}",
            self.id,
            self.cycle - 1,
            self.timeout
        );
        self.enter_proposal(ctx, time);
    }
}

impl Node for TendermintNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError> {
        self.enter_proposal(ctx, 0.0);
        Ok(())
    }

    fn on_timeout(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        if self.output.is_terminated() {
            return Ok(());
        }
        if self.next_timer != Some(time) {
            // Superseded by a later timer.
            return Ok(());
        }

        match self.step {
            Step::Proposal => self.do_prevote(ctx, time),
            Step::PreVote => self.do_precommit(ctx, time),
            Step::PreCommit => {
                self.next_cycle(ctx, time);
                Ok(())
            }
        }
    }

    fn on_message(
        &mut self,
        ctx: &mut Context,
        time: f64,
        envelope: &Envelope,
    ) -> Result<(), SimulationError> {
        if self.output.is_terminated() {
            return Ok(());
        }

        match envelope.message {
            Message::Proposal { cycle, proposal } => {
                self.cycle_state(cycle).add_proposal(proposal);
            }
            Message::PreVote { cycle, vote } => {
                self.cycle_state(cycle).prevotes.add(vote);
            }
            Message::PreCommit { cycle, vote } => {
                let (id, quorum) = (self.id, ctx.quorum());
                let state = self.cycle_state(cycle);
                state.precommits.add(vote);
                let outcome = state.precommits.outcome(
                    quorum,
                    id,
                    VoteKind::PreCommit,
                    Scope::cycle(cycle),
                )?;
                if let QuorumOutcome::Value(proposal) = outcome {
                    self.output.terminate(id, proposal, time);
                }
            }
            other => {
                return Err(SimulationError::UnexpectedMessage {
                    node: self.id,
                    message: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn output(&self) -> &Output {
        &self.output
    }
}
