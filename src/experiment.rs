//! Latency experiments: many randomized runs per protocol and initial timeout.
//!
//! Each sample places every node uniformly on the Earth, shuffles which of them are failed,
//! connects them by fiber and runs one protocol until every correct node decides or the time
//! limit passes. Samples that do not finish are dropped from the averages.

use crate::algorand::AlgorandNode;
use crate::config::ExperimentConfig;
use crate::error::SimulationError;
use crate::geometry::EarthPosition;
use crate::mir::MirNode;
use crate::network::Network;
use crate::node::{FailedNode, Node, NodeId};
use crate::simulation::{RunOutcome, Simulation};
use crate::tendermint::TendermintNode;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Protocol {
    Tendermint,
    Algorand,
    Mir,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Tendermint, Protocol::Algorand, Protocol::Mir];

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Tendermint => "Tendermint",
            Protocol::Algorand => "Algorand",
            Protocol::Mir => "Mir",
        }
    }

    /// A correct node of this protocol.
    pub fn correct_node(&self, id: NodeId, initial_timeout: f64) -> Box<dyn Node> {
        match self {
            Protocol::Tendermint => Box::new(TendermintNode::new(id, initial_timeout)),
            Protocol::Algorand => Box::new(AlgorandNode::new(id, initial_timeout)),
            Protocol::Mir => Box::new(MirNode::new(id, initial_timeout)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of termination times, in seconds.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl Default for LatencyStats {
    fn default() -> Self {
        LatencyStats {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl LatencyStats {
    pub fn record(&mut self, time: f64) {
        self.count += 1;
        self.min = self.min.min(time);
        self.max = self.max.max(time);
        self.sum += time;
    }

    pub fn combine(&mut self, other: &LatencyStats) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
    }

    /// `None` when nothing was recorded.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl FromIterator<f64> for LatencyStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = LatencyStats::default();
        for time in iter {
            stats.record(time);
        }
        stats
    }
}

/// Runs `protocol` once on a freshly randomized network.
///
/// Returns `None` when the run hit the time limit or some correct node did not decide.
/// Correct nodes deciding different values is an error.
pub fn run_sample(
    protocol: Protocol,
    initial_timeout: f64,
    config: &ExperimentConfig,
    rng: &mut ChaCha8Rng,
) -> Result<Option<LatencyStats>, SimulationError> {
    let mut layout: Vec<bool> = std::iter::repeat(true)
        .take(config.correct_nodes)
        .chain(std::iter::repeat(false).take(config.failed_nodes))
        .collect();
    layout.shuffle(rng);

    let positions: Vec<EarthPosition> = (0..layout.len())
        .map(|_| EarthPosition::random(rng))
        .collect();
    let network = Network::fiber(positions, config.latency_jitter, rng.gen());

    let nodes: Vec<Box<dyn Node>> = layout
        .iter()
        .enumerate()
        .map(|(id, &correct)| {
            if correct {
                protocol.correct_node(id, initial_timeout)
            } else {
                Box::new(FailedNode::new(id)) as Box<dyn Node>
            }
        })
        .collect();

    let mut simulation = Simulation::new(network, nodes)?;
    if simulation.run(config.time_limit)? == RunOutcome::Inconclusive {
        debug!("{protocol} run with timeout {initial_timeout} exceeded the time limit");
        return Ok(None);
    }

    let reports: Vec<_> = simulation
        .reports()
        .into_iter()
        .filter(|report| report.correct)
        .collect();
    let decisions: Vec<_> = reports.iter().filter_map(|report| report.decision).collect();
    if decisions.len() < reports.len() {
        warn!(
            "{protocol}: only {} of {} correct nodes terminated",
            decisions.len(),
            reports.len()
        );
        return Ok(None);
    }

    if let Some(first) = decisions.first() {
        if let Some(other) = decisions.iter().find(|d| d.proposal != first.proposal) {
            return Err(SimulationError::ConflictingDecisions {
                first: first.proposal,
                second: other.proposal,
            });
        }
    }

    Ok(Some(decisions.iter().map(|d| d.time).collect()))
}

/// Mean termination latency of each protocol for one initial timeout.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SweepRow {
    pub initial_timeout: f64,
    pub tendermint: Option<f64>,
    pub algorand: Option<f64>,
    pub mir: Option<f64>,
}

impl SweepRow {
    pub fn latency(&self, protocol: Protocol) -> Option<f64> {
        match protocol {
            Protocol::Tendermint => self.tendermint,
            Protocol::Algorand => self.algorand,
            Protocol::Mir => self.mir,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub rows: Vec<SweepRow>,
}

impl SweepReport {
    /// The initial timeout with the lowest mean latency for `protocol`, with that latency.
    /// Ties go to the smaller timeout.
    pub fn best(&self, protocol: Protocol) -> Option<(f64, f64)> {
        let mut best: Option<(f64, f64)> = None;
        for row in &self.rows {
            if let Some(latency) = row.latency(protocol) {
                if best.map_or(true, |(_, current)| latency < current) {
                    best = Some((row.initial_timeout, latency));
                }
            }
        }
        best
    }

    /// Relative improvement of Mir's best latency over the better of the other two.
    pub fn mir_speedup(&self) -> Option<f64> {
        let (_, mir) = self.best(Protocol::Mir)?;
        let second = [Protocol::Tendermint, Protocol::Algorand]
            .iter()
            .filter_map(|protocol| self.best(*protocol))
            .map(|(_, latency)| latency)
            .reduce(f64::min)?;
        Some((second - mir) / second)
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();

        writeln!(f, "initial_timeout, tendermint, algorand, this_work")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:.2}, {}, {}, {}",
                row.initial_timeout,
                cell(row.tendermint),
                cell(row.algorand),
                cell(row.mir)
            )?;
        }

        writeln!(f)?;
        for protocol in Protocol::ALL {
            match self.best(protocol) {
                Some((timeout, latency)) => writeln!(
                    f,
                    "{protocol} best with timeout {timeout:.2}: {latency:.4}"
                )?,
                None => writeln!(f, "{protocol} never terminated")?,
            }
        }
        if let Some(speedup) = self.mir_speedup() {
            writeln!(f, "Mir speedup: {speedup:.4}")?;
        }
        Ok(())
    }
}

/// Runs `config.samples` samples of every protocol for every initial timeout of the sweep.
pub fn sweep(config: &ExperimentConfig) -> Result<SweepReport, SimulationError> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut report = SweepReport::default();

    for initial_timeout in config.timeouts.values() {
        let mut overall = [LatencyStats::default(); 3];
        for _ in 0..config.samples {
            for (stats, protocol) in overall.iter_mut().zip(Protocol::ALL) {
                if let Some(sample) = run_sample(protocol, initial_timeout, config, &mut rng)? {
                    stats.combine(&sample);
                }
            }
        }

        let [tendermint, algorand, mir] = overall;
        let row = SweepRow {
            initial_timeout,
            tendermint: tendermint.mean(),
            algorand: algorand.mean(),
            mir: mir.mean(),
        };
        info!(
            "timeout {initial_timeout:.2}: tendermint {:?}, algorand {:?}, mir {:?}",
            row.tendermint, row.algorand, row.mir
        );
        report.rows.push(row);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutSweep;
    use crate::error::ConfigError;

    fn small_config(correct_nodes: usize, failed_nodes: usize) -> ExperimentConfig {
        ExperimentConfig {
            correct_nodes,
            failed_nodes,
            samples: 3,
            time_limit: 60.0,
            timeouts: TimeoutSweep::single(0.5),
            latency_jitter: 0.0,
            seed: 7,
        }
    }

    #[test]
    fn test_latency_stats() {
        let mut stats: LatencyStats = [0.5, 1.5].into_iter().collect();
        assert_eq!(stats.mean(), Some(1.0));

        stats.combine(&[4.0].into_iter().collect());
        assert_eq!(stats.count, 3);
        assert_eq!((stats.min, stats.max), (0.5, 4.0));
        assert_eq!(stats.mean(), Some(2.0));

        assert_eq!(LatencyStats::default().mean(), None);
    }

    #[test]
    fn test_all_correct_samples_terminate() {
        let config = small_config(7, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for protocol in Protocol::ALL {
            let stats = run_sample(protocol, 0.5, &config, &mut rng)
                .unwrap()
                .unwrap_or_else(|| panic!("{protocol} did not terminate"));
            assert_eq!(stats.count, 7);
            assert!(stats.min >= 0.0);
            assert!(stats.max < config.time_limit);
        }
    }

    #[test]
    fn test_samples_with_failures_are_safe() {
        let config = small_config(5, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..5 {
            for protocol in Protocol::ALL {
                if let Some(stats) = run_sample(protocol, 0.3, &config, &mut rng).unwrap() {
                    assert_eq!(stats.count, 5);
                }
            }
        }
    }

    #[test]
    fn test_too_short_time_limit_drops_sample() {
        let config = ExperimentConfig {
            time_limit: 0.1,
            ..small_config(4, 0)
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        // Tendermint cannot decide before two timeouts have elapsed.
        assert_eq!(
            run_sample(Protocol::Tendermint, 0.5, &config, &mut rng).unwrap(),
            None
        );
    }

    #[test]
    fn test_sweep_is_deterministic() {
        let config = ExperimentConfig {
            timeouts: TimeoutSweep {
                start: 0.25,
                end: 0.5,
                step: 0.25,
            },
            ..small_config(4, 0)
        };
        let first = sweep(&config).unwrap();
        let second = sweep(&config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.rows.len(), 2);
        assert!(first.rows.iter().all(|row| row.mir.is_some()));
    }

    #[test]
    fn test_sweep_rejects_invalid_config() {
        let config = ExperimentConfig {
            correct_nodes: 0,
            ..Default::default()
        };
        assert_eq!(
            sweep(&config),
            Err(SimulationError::Config(ConfigError::NoCorrectNodes))
        );
    }

    #[test]
    fn test_report_best_and_speedup() {
        let report = SweepReport {
            rows: vec![
                SweepRow {
                    initial_timeout: 0.1,
                    tendermint: Some(2.0),
                    algorand: None,
                    mir: Some(1.5),
                },
                SweepRow {
                    initial_timeout: 0.2,
                    tendermint: Some(1.0),
                    algorand: Some(2.0),
                    mir: Some(0.5),
                },
                SweepRow {
                    initial_timeout: 0.3,
                    tendermint: Some(1.0),
                    algorand: Some(1.25),
                    mir: None,
                },
            ],
        };

        assert_eq!(report.best(Protocol::Tendermint), Some((0.2, 1.0)));
        assert_eq!(report.best(Protocol::Algorand), Some((0.3, 1.25)));
        assert_eq!(report.best(Protocol::Mir), Some((0.2, 0.5)));
        assert_eq!(report.mir_speedup(), Some(0.5));

        let text = report.to_string();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("initial_timeout, tendermint, algorand, this_work")
        );
        assert_eq!(lines.next(), Some("0.10, 2, , 1.5"));
        assert!(text.contains("Tendermint best with timeout 0.20: 1.0000"));
        assert!(text.contains("Mir speedup: 0.5000"));
    }
}
