use bftsim::algorand::AlgorandNode;
use bftsim::experiment::Protocol;
use bftsim::geometry::EarthPosition;
use bftsim::mir::MirNode;
use bftsim::network::Network;
use bftsim::node::{FailedNode, Node, NodeId};
use bftsim::simulation::{RunOutcome, Simulation};
use bftsim::value::Proposal;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// Node `i` is correct iff `layout[i]`; correct nodes are built by `make`.
fn build_nodes<F>(layout: &[bool], make: F) -> Vec<Box<dyn Node>>
where
    F: Fn(NodeId) -> Box<dyn Node>,
{
    layout
        .iter()
        .enumerate()
        .map(|(id, &correct)| {
            if correct {
                make(id)
            } else {
                Box::new(FailedNode::new(id)) as Box<dyn Node>
            }
        })
        .collect()
}

// Zero-latency run of `protocol` with initial timeout 1.0.
fn run_zero_latency(
    protocol: Protocol,
    layout: &[bool],
    time_limit: f64,
) -> (Simulation, RunOutcome) {
    let nodes = build_nodes(layout, |id| protocol.correct_node(id, 1.0));
    let mut simulation = Simulation::new(Network::constant(layout.len(), 0.0), nodes).unwrap();
    let outcome = simulation.run(time_limit).unwrap();
    (simulation, outcome)
}

// Every correct node decided `proposal` at `time`, exactly once.
fn assert_all_decided(simulation: &Simulation, proposal: Proposal, time: f64) {
    for node in simulation.nodes().iter().filter(|n| n.is_correct()) {
        let decision = node
            .decision()
            .unwrap_or_else(|| panic!("node {} did not decide", node.id()));
        assert_eq!(decision.proposal, proposal, "node {}", node.id());
        assert_eq!(decision.time, time, "node {}", node.id());
        assert_eq!(node.output().terminate_calls(), 1);
    }
}

#[test]
fn test_tendermint_happy_case() {
    let (simulation, outcome) = run_zero_latency(Protocol::Tendermint, &[true; 4], 100.0);
    assert_eq!(outcome, RunOutcome::Completed);
    // The leader's proposal is pre-voted at T and pre-committed at 2T.
    assert_all_decided(&simulation, Proposal::from_id(0), 2.0);
}

#[test]
fn test_tendermint_failed_leader() {
    let (simulation, outcome) =
        run_zero_latency(Protocol::Tendermint, &[false, true, true, true], 100.0);
    assert_eq!(outcome, RunOutcome::Completed);
    // Cycle 0 ends at 3.0; cycle 1 runs with a doubled timeout.
    assert_all_decided(&simulation, Proposal::from_id(0), 7.0);
}

#[test]
fn test_algorand_happy_case() {
    let (simulation, outcome) = run_zero_latency(Protocol::Algorand, &[true; 4], 100.0);
    assert_eq!(outcome, RunOutcome::Completed);
    assert_all_decided(&simulation, Proposal::from_id(0), 1.0);
}

#[test]
fn test_algorand_failed_leader_falls_back_to_next_cycle() {
    let layout = [false, true, true, true];
    let nodes = build_nodes(&layout, |id| {
        Box::new(AlgorandNode::new(id, 1.0)) as Box<dyn Node>
    });
    let mut simulation = Simulation::new(Network::constant(4, 0.0), nodes).unwrap();

    assert_eq!(simulation.run(100.0).unwrap(), RunOutcome::Completed);
    // Nil is next-voted at 2T, node 1 proposes for cycle 1 and it is certified at 3T.
    assert_all_decided(&simulation, Proposal::from_id(0), 3.0);
}

#[test]
fn test_mir_happy_case() {
    let (simulation, outcome) = run_zero_latency(Protocol::Mir, &[true; 4], 100.0);
    assert_eq!(outcome, RunOutcome::Completed);
    // Without latency, prepare and commit quorums form immediately.
    assert_all_decided(&simulation, Proposal::from_id(0), 0.0);
}

#[test]
fn test_mir_failed_leader_skips_cycle() {
    let layout = [false, true, true, true];
    let nodes = build_nodes(&layout, |id| {
        Box::new(MirNode::new(id, 1.0)) as Box<dyn Node>
    });
    let mut simulation = Simulation::new(Network::constant(4, 0.0), nodes).unwrap();

    assert_eq!(simulation.run(100.0).unwrap(), RunOutcome::Completed);
    // Nil is prepared and committed at the first timeout, then node 1's proposal goes through.
    assert_all_decided(&simulation, Proposal::from_id(0), 1.0);
}

#[test]
fn test_time_limit_gives_inconclusive_run() {
    for protocol in [Protocol::Tendermint, Protocol::Mir] {
        let (simulation, outcome) =
            run_zero_latency(protocol, &[true, false, false, false], 10.0);
        assert_eq!(outcome, RunOutcome::Inconclusive, "{protocol}");
        assert!(!simulation.all_correct_terminated());
        assert!(simulation.reports().iter().all(|r| !r.terminated()));
    }
}

#[test]
fn test_failed_nodes_are_excluded_from_termination() {
    let (simulation, _) = run_zero_latency(Protocol::Mir, &[true, true, true, false], 100.0);
    assert!(simulation.all_correct_terminated());
    let reports = simulation.reports();
    assert!(!reports[3].correct);
    assert!(!reports[3].terminated());
}

#[test]
fn test_leader_rotation() {
    let network = Network::constant(5, 0.0);
    let leaders: Vec<NodeId> = (0..7).map(|cycle| network.leader(cycle)).collect();
    assert_eq!(leaders, vec![0, 1, 2, 3, 4, 0, 1]);
}

#[test]
fn test_geo_networks_decide_at_most_one_value() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for sample in 0..8 {
        for protocol in Protocol::ALL {
            let mut layout = vec![true; 7];
            layout[rng.gen_range(0..7)] = false;
            layout[rng.gen_range(0..7)] = false;

            let positions = (0..7).map(|_| EarthPosition::random(&mut rng)).collect();
            let network = Network::fiber(positions, 0.1, rng.gen());
            let nodes = build_nodes(&layout, |id| protocol.correct_node(id, 0.2));
            let mut simulation = Simulation::new(network, nodes).unwrap();
            simulation.run(30.0).unwrap();

            let decided: Vec<Proposal> = simulation
                .reports()
                .iter()
                .filter_map(|r| r.decision.map(|d| d.proposal))
                .collect();
            assert!(
                decided.windows(2).all(|w| w[0] == w[1]),
                "{protocol} sample {sample} decided {decided:?}"
            );
            for node in simulation.nodes() {
                assert!(node.output().terminate_calls() <= 1);
            }
        }
    }
}
