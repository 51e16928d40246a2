//! Mir-style participant: Tendermint with pipelined rounds.
//!
//! Round 0 of each cycle is the proposal step. Every later round carries exactly one vote per
//! node, either a prepare-vote or a commit-vote. A proposal is *prepared* in a round once its
//! prepare- and commit-votes together reach quorum, and *committed* once its commit-votes alone
//! do. Rounds advance on timeouts and, faster, whenever the current round is prepared.

use crate::error::SimulationError;
use crate::message::{Envelope, Message, Scope, VoteKind};
use crate::node::{Node, NodeId, Output};
use crate::simulation::Context;
use crate::tally::{QuorumOutcome, VoteCounts};
use crate::value::{display_vote, Proposal};
use log::{debug, trace, warn};
use std::collections::BTreeMap;

/// Upper bound on the number of timeout doublings.
pub const MAX_BACKOFF_DOUBLINGS: u64 = 30;

/// Number of times the initial timeout is doubled in `round` of `cycle`.
///
/// Every cycle adds one doubling. From round 3 on, every second round adds another one.
pub fn backoff_doublings(cycle: u64, round: u64) -> u64 {
    let mut doublings = cycle;
    if round >= 3 {
        doublings = doublings.saturating_add((round - 1) / 2);
    }
    doublings
}

/// Timeout armed when entering `round` of `cycle`, capped at [`MAX_BACKOFF_DOUBLINGS`].
pub fn backoff_timeout(initial_timeout: f64, cycle: u64, round: u64) -> f64 {
    let mut doublings = backoff_doublings(cycle, round);
    if doublings > MAX_BACKOFF_DOUBLINGS {
        warn!(
            "timeout for cycle {cycle} round {round} needs {doublings} doublings, capping at {MAX_BACKOFF_DOUBLINGS}"
        );
        doublings = MAX_BACKOFF_DOUBLINGS;
    }
    initial_timeout * (1u64 << doublings) as f64
}

#[derive(Debug, Default)]
struct RoundState {
    prepares: VoteCounts,
    commits: VoteCounts,
}

impl RoundState {
    fn prepared(
        &self,
        quorum: usize,
        node: NodeId,
        scope: Scope,
    ) -> Result<QuorumOutcome, SimulationError> {
        self.prepares
            .combined(&self.commits)
            .outcome(quorum, node, VoteKind::Prepared, scope)
    }

    fn committed(
        &self,
        quorum: usize,
        node: NodeId,
        scope: Scope,
    ) -> Result<QuorumOutcome, SimulationError> {
        self.commits
            .outcome(quorum, node, VoteKind::CommitVote, scope)
    }
}

#[derive(Debug, Default)]
struct CycleState {
    /// Distinct proposals received, in arrival order.
    proposals: Vec<Proposal>,
    rounds: BTreeMap<u64, RoundState>,
}

impl CycleState {
    fn add_proposal(&mut self, proposal: Proposal) {
        if !self.proposals.contains(&proposal) {
            self.proposals.push(proposal);
        }
    }

    fn round_state(&mut self, round: u64) -> &mut RoundState {
        self.rounds.entry(round).or_default()
    }

    fn prepared(
        &self,
        quorum: usize,
        node: NodeId,
        cycle: u64,
        round: u64,
    ) -> Result<QuorumOutcome, SimulationError> {
        match self.rounds.get(&round) {
            Some(state) => state.prepared(quorum, node, Scope::round(cycle, round)),
            None => Ok(QuorumOutcome::Pending),
        }
    }

    /// Whether any round of this cycle has a commit quorum, nil included.
    fn has_commit(&self, quorum: usize, node: NodeId, cycle: u64) -> Result<bool, SimulationError> {
        for (&round, state) in &self.rounds {
            if state
                .committed(quorum, node, Scope::round(cycle, round))?
                .is_reached()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct MirNode {
    id: NodeId,
    initial_timeout: f64,
    cycle: u64,
    /// Round within the current cycle; reset to 0 on every cycle change.
    round: u64,
    /// Time of the most recently armed timer. Any other timer is stale.
    next_timer: Option<f64>,
    cycles: BTreeMap<u64, CycleState>,
    output: Output,
}

impl MirNode {
    pub fn new(id: NodeId, initial_timeout: f64) -> Self {
        MirNode {
            id,
            initial_timeout,
            cycle: 0,
            round: 0,
            next_timer: None,
            cycles: BTreeMap::new(),
            output: Output::new(),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    fn cycle_state(&mut self, cycle: u64) -> &mut CycleState {
        self.cycles.entry(cycle).or_default()
    }

    fn arm_timer(&mut self, ctx: &mut Context, time: f64) {
        let fire_at = time + backoff_timeout(self.initial_timeout, self.cycle, self.round);
        self.next_timer = Some(fire_at);
        ctx.schedule_timeout(self.id, fire_at);
    }

    /// The message this node sends on entering the current round, if any.
    ///
    /// In round 0 only the leader sends, its proposal. Later rounds re-vote the latest prepared
    /// value: a commit-vote if it was prepared in the previous round, a prepare-vote otherwise.
    /// Without a prepared value, the node prepare-votes the only proposal it has seen, or nil.
    fn current_vote(&mut self, ctx: &mut Context) -> Result<Option<Message>, SimulationError> {
        let (id, cycle, round) = (self.id, self.cycle, self.round);
        if round == 0 {
            if ctx.leader(cycle) != id {
                return Ok(None);
            }
            let proposal = ctx.new_proposal();
            debug!("node {id}: proposing {proposal} for cycle {cycle}");
            return Ok(Some(Message::Proposal { cycle, proposal }));
        }

        let quorum = ctx.quorum();
        let state = self.cycle_state(cycle);
        for previous in (1..round).rev() {
            if let Some(vote) = state.prepared(quorum, id, cycle, previous)?.vote() {
                let message = if previous == round - 1 {
                    Message::CommitVote { cycle, round, vote }
                } else {
                    Message::PrepareVote { cycle, round, vote }
                };
                return Ok(Some(message));
            }
        }

        let vote = match state.proposals.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        Ok(Some(Message::PrepareVote { cycle, round, vote }))
    }

    fn vote(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        if let Some(message) = self.current_vote(ctx)? {
            ctx.broadcast(self.id, message, time);
        }
        Ok(())
    }

    fn advance_round(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        self.round += 1;
        self.vote(ctx, time)?;
        self.arm_timer(ctx, time);
        Ok(())
    }

    /// Advances if `round` of `cycle` is the current round and is prepared.
    fn advance_if_prepared(
        &mut self,
        ctx: &mut Context,
        time: f64,
        cycle: u64,
        round: u64,
    ) -> Result<(), SimulationError> {
        if cycle != self.cycle || round != self.round {
            return Ok(());
        }
        let (id, quorum) = (self.id, ctx.quorum());
        if self
            .cycle_state(cycle)
            .prepared(quorum, id, cycle, round)?
            .is_reached()
        {
            self.advance_round(ctx, time)?;
        }
        Ok(())
    }

    fn handle_proposal(
        &mut self,
        ctx: &mut Context,
        time: f64,
        cycle: u64,
        proposal: Proposal,
    ) -> Result<(), SimulationError> {
        self.cycle_state(cycle).add_proposal(proposal);
        if cycle == self.cycle && self.round == 0 {
            self.round = 1;
            let message = Message::PrepareVote {
                cycle,
                round: 1,
                vote: Some(proposal),
            };
            ctx.broadcast(self.id, message, time);
            self.arm_timer(ctx, time);
        }
        Ok(())
    }

    fn handle_commit_vote(
        &mut self,
        ctx: &mut Context,
        time: f64,
        cycle: u64,
        round: u64,
        vote: Option<Proposal>,
    ) -> Result<(), SimulationError> {
        let (id, quorum) = (self.id, ctx.quorum());
        let state = self.cycle_state(cycle).round_state(round);
        state.commits.add(vote);

        match state.committed(quorum, id, Scope::round(cycle, round))? {
            QuorumOutcome::Value(proposal) => {
                self.output.terminate(id, proposal, time);
                Ok(())
            }
            QuorumOutcome::Nil if cycle == self.cycle => {
                self.round = 0;
                let mut next = self.cycle;
                while self.cycle_state(next).has_commit(quorum, id, next)? {
                    next += 1;
                }
                self.cycle = next;
                debug!(
                    "node {id}: nil committed in cycle {cycle} round {round}, entering cycle {}",
                    self.cycle
                );
                self.vote(ctx, time)?;
                self.arm_timer(ctx, time);
                Ok(())
            }
            _ => self.advance_if_prepared(ctx, time, cycle, round),
        }
    }
}

impl Node for MirNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_start(&mut self, ctx: &mut Context) -> Result<(), SimulationError> {
        self.vote(ctx, 0.0)?;
        self.arm_timer(ctx, 0.0);
        Ok(())
    }

    fn on_timeout(&mut self, ctx: &mut Context, time: f64) -> Result<(), SimulationError> {
        if self.output.is_terminated() {
            return Ok(());
        }
        if self.next_timer != Some(time) {
            return Ok(());
        }
        self.advance_round(ctx, time)
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
                self.handle_proposal(ctx, time, cycle, proposal)
            }
            Message::PrepareVote { cycle, round, vote } => {
                self.cycle_state(cycle)
                    .round_state(round)
                    .prepares
                    .add(vote);
                trace!(
                    "node {}: prepare-vote for {} in cycle {cycle} round {round}",
                    self.id,
                    display_vote(&vote)
                );
                self.advance_if_prepared(ctx, time, cycle, round)
            }
            Message::CommitVote { cycle, round, vote } => {
                self.handle_commit_vote(ctx, time, cycle, round, vote)
            }
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
