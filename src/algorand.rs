//! Algorand-style participant.
//!
//! A cycle has a timeout-driven skeleton (proposal, filtering, first finishing) and two
//! message-driven shortcuts: cert-voting as soon as soft-votes reach quorum, and moving to the
//! next cycle as soon as next-votes reach quorum. Next-vote quorums carry a value forward as
//! the starting value of the following cycle.

use crate::error::SimulationError;
use crate::message::{Envelope, Message, Scope, VoteKind};
use crate::node::{Node, NodeId, Output};
use crate::simulation::Context;
use crate::tally::{QuorumOutcome, VoteCounts};
use crate::value::{display_vote, Proposal, Vote};
use log::debug;
use std::collections::BTreeMap;

/// Phase of the current cycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Waiting for the leader's proposal; the next timeout runs the filtering step.
    Proposal,
    /// Soft-votes are being collected; the next timeout runs the first finishing step.
    Certifying,
    /// Next-voted; only a next-vote quorum moves the node on. No timer is armed.
    Finishing,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Proposal => "proposal",
            Phase::Certifying => "certifying",
            Phase::Finishing => "finishing",
        }
    }
}

#[derive(Debug, Default)]
struct CycleState {
    /// Value carried over from the previous cycle's next-vote quorum.
    starting_value: Vote,
    /// Distinct proposals received, in arrival order.
    proposals: Vec<Proposal>,
    /// The proposal this node cert-voted in this cycle.
    certified: Option<Proposal>,
    soft_votes: VoteCounts,
    cert_votes: VoteCounts,
    next_votes: VoteCounts,
}

impl CycleState {
    fn add_proposal(&mut self, proposal: Proposal) {
        if !self.proposals.contains(&proposal) {
            self.proposals.push(proposal);
        }
    }

    fn next_vote_outcome(
        &self,
        quorum: usize,
        node: NodeId,
        cycle: u64,
    ) -> Result<QuorumOutcome, SimulationError> {
        self.next_votes
            .outcome(quorum, node, VoteKind::NextVote, Scope::cycle(cycle))
    }
}

pub struct AlgorandNode {
    id: NodeId,
    timeout: f64,
    cycle: u64,
    phase: Phase,
    /// Time of the most recently armed timer. Any other timer is stale.
    next_timer: Option<f64>,
    cycles: BTreeMap<u64, CycleState>,
    output: Output,
}

impl AlgorandNode {
    pub fn new(id: NodeId, timeout: f64) -> Self {
        AlgorandNode {
            id,
            timeout,
            cycle: 0,
            phase: Phase::Proposal,
            next_timer: None,
            cycles: BTreeMap::new(),
            output: Output::new(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The value carried into `cycle`, `None` if it is nil or the cycle is unknown.
    pub fn starting_value(&self, cycle: u64) -> Vote {
        self.cycles.get(&cycle).and_then(|state| state.starting_value)
    }

    /// The proposal this node cert-voted in `cycle`, if any.
    pub fn certified(&self, cycle: u64) -> Option<Proposal> {
        self.cycles.get(&cycle).and_then(|state| state.certified)
    }

    fn cycle_state(&mut self, cycle: u64) -> &mut CycleState {
        self.cycles.entry(cycle).or_default()
    }

    /// Next-vote outcome of the cycle before the current one; `Pending` in cycle 0.
    fn previous_next_votes(&mut self, ctx: &Context) -> Result<QuorumOutcome, SimulationError> {
        if self.cycle == 0 {
            return Ok(QuorumOutcome::Pending);
        }
        let (id, previous) = (self.id, self.cycle - 1);
        self.cycle_state(previous)
            .next_vote_outcome(ctx.quorum(), id, previous)
    }

    fn arm_timer(&mut self, ctx: &mut Context, time: f64) {
        let fire_at = time + self.timeout;
        self.next_timer = Some(fire_at);
        ctx.schedule_timeout(self.id, fire_at);
    }

    fn start_proposal(&mut self, ctx: &mut Context, time: f64) {
        self.phase = Phase::Proposal;
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

    /// Soft-votes the proposal this cycle should converge on, if there is one.
    ///
    /// In cycle 0, or after a nil next-vote quorum, that is the first proposal received this
    /// cycle. After a next-vote quorum on a proposal, it is that proposal.
    fn do_filtering(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        let previous = self.previous_next_votes(ctx)?;
        let cycle = self.cycle;
        let soft_vote = match previous {
            QuorumOutcome::Value(proposal) if cycle > 0 => Some(proposal),
            _ if cycle == 0 || previous == QuorumOutcome::Nil => {
                self.cycle_state(cycle).proposals.first().copied()
            }
            _ => None,
        };

        if let Some(proposal) = soft_vote {
            let message = Message::SoftVote {
                cycle,
                vote: Some(proposal),
            };
            ctx.broadcast(self.id, message, time);
        }

        self.phase = Phase::Certifying;
        self.arm_timer(ctx, time);
        Ok(())
    }

    /// Next-votes the certified proposal, else nil after a nil quorum, else the starting value.
    fn do_first_finishing(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        let previous = self.previous_next_votes(ctx)?;
        let cycle = self.cycle;
        let state = self.cycle_state(cycle);
        let vote = match state.certified {
            Some(proposal) => Some(proposal),
            None if previous == QuorumOutcome::Nil => None,
            None => state.starting_value,
        };
        ctx.broadcast(self.id, Message::NextVote { cycle, vote }, time);
        self.phase = Phase::Finishing;
        Ok(())
    }

    fn handle_soft_vote(
        &mut self,
        ctx: &mut Context,
        time: f64,
        cycle: u64,
        vote: Vote,
    ) -> Result<(), SimulationError> {
        let (id, quorum) = (self.id, ctx.quorum());
        let current = cycle == self.cycle && self.phase == Phase::Certifying;
        let state = self.cycle_state(cycle);
        state.soft_votes.add(vote);
        if !current || state.certified.is_some() {
            return Ok(());
        }

        let outcome = state
            .soft_votes
            .outcome(quorum, id, VoteKind::SoftVote, Scope::cycle(cycle))?;
        if let QuorumOutcome::Value(proposal) = outcome {
            state.certified = Some(proposal);
            let message = Message::CertVote {
                cycle,
                vote: Some(proposal),
            };
            ctx.broadcast(id, message, time);
        }
        Ok(())
    }

    fn handle_cert_vote(
        &mut self,
        ctx: &Context,
        time: f64,
        cycle: u64,
        vote: Vote,
    ) -> Result<(), SimulationError> {
        let id = self.id;
        let state = self.cycle_state(cycle);
        state.cert_votes.add(vote);
        match state
            .cert_votes
            .outcome(ctx.quorum(), id, VoteKind::CertVote, Scope::cycle(cycle))?
        {
            QuorumOutcome::Value(proposal) => {
                self.output.terminate(id, proposal, time);
                Ok(())
            }
            QuorumOutcome::Nil => Err(SimulationError::NilCertificate { node: id, cycle }),
            QuorumOutcome::Pending => Ok(()),
        }
    }

    fn handle_next_vote(
        &mut self,
        ctx: &mut Context,
        time: f64,
        cycle: u64,
        vote: Vote,
    ) -> Result<(), SimulationError> {
        let (id, quorum) = (self.id, ctx.quorum());
        self.cycle_state(cycle).next_votes.add(vote);
        if cycle != self.cycle {
            return Ok(());
        }

        let mut advanced = false;
        loop {
            let current = self.cycle;
            let Some(carried) = self
                .cycle_state(current)
                .next_vote_outcome(quorum, id, current)?
                .vote()
            else {
                break;
            };
            self.cycle += 1;
            self.cycle_state(current + 1).starting_value = carried;
            advanced = true;
            debug!(
                "node {id}: next-vote quorum on {} in cycle {current}, entering cycle {}",
                display_vote(&carried),
                self.cycle
            );
        }

        if advanced {
            self.start_proposal(ctx, time);
        }
        Ok(())
    }
}

impl Node for AlgorandNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError> {
        self.start_proposal(ctx, 0.0);
        Ok(())
    }

    fn on_timeout(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        if self.output.is_terminated() {
            return Ok(());
        }
        if self.next_timer != Some(time) {
            // Superseded by a message-driven transition.
            return Ok(());
        }

        match self.phase {
            Phase::Proposal => self.do_filtering(ctx, time),
            Phase::Certifying => self.do_first_finishing(ctx, time),
            Phase::Finishing => Err(SimulationError::UnexpectedTimeout {
                node: self.id,
                state: self.phase.as_str(),
            }),
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
                Ok(())
            }
            Message::SoftVote { cycle, vote } => self.handle_soft_vote(ctx, time, cycle, vote),
            Message::CertVote { cycle, vote } => self.handle_cert_vote(ctx, time, cycle, vote),
            Message::NextVote { cycle, vote } => self.handle_next_vote(ctx, time, cycle, vote),
            other => Err(SimulationError::UnexpectedMessage {
                node: self.id,
                message: other.to_string(),
            }),
        }
    }

    fn output(&self) -> &Output {
        &self.output
    }
}
