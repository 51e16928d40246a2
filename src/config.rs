use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Range of initial timeouts to try, in seconds. Both ends are inclusive.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSweep {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl TimeoutSweep {
    /// A sweep over the single timeout `value`.
    pub fn single(value: f64) -> Self {
        TimeoutSweep {
            start: value,
            end: value,
            step: value,
        }
    }

    /// Timeouts of the sweep in increasing order.
    ///
    /// Each value is computed as `start + i * step` so rounding errors do not accumulate.
    pub fn values(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.end < self.start {
            return Vec::new();
        }
        // Tolerate `end` landing a hair below the last step.
        let steps = ((self.end - self.start) / self.step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| self.start + i as f64 * self.step)
            .collect()
    }
}

impl Default for TimeoutSweep {
    fn default() -> Self {
        TimeoutSweep {
            start: 0.01,
            end: 0.40,
            step: 0.01,
        }
    }
}

/// Experiment configuration. Describes the simulated population and how to sample it.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Nodes that follow the protocol.
    pub correct_nodes: usize,

    /// Crashed nodes. They count towards the quorum but never send anything.
    pub failed_nodes: usize,

    /// Runs per protocol and initial timeout.
    pub samples: usize,

    /// Simulated seconds after which a run is abandoned as inconclusive.
    pub time_limit: f64,

    /// Initial timeouts to sweep over.
    pub timeouts: TimeoutSweep,

    /// Every latency is multiplied by `1 + U(0, latency_jitter)`. Zero keeps latencies exact.
    pub latency_jitter: f64,

    /// Seed for node placement, role shuffling and latency jitter.
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            correct_nodes: 90,
            failed_nodes: 10,
            samples: 1000,
            time_limit: 4.0,
            timeouts: TimeoutSweep::default(),
            latency_jitter: 0.0,
            seed: 12345,
        }
    }
}

impl ExperimentConfig {
    pub fn total_nodes(&self) -> usize {
        self.correct_nodes + self.failed_nodes
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correct_nodes == 0 {
            return Err(ConfigError::NoCorrectNodes);
        }
        if self.samples == 0 {
            return Err(ConfigError::NonPositive("samples"));
        }
        if !(self.time_limit > 0.0) {
            return Err(ConfigError::NonPositive("time_limit"));
        }
        if !(self.timeouts.start > 0.0) {
            return Err(ConfigError::NonPositive("timeouts.start"));
        }
        if !(self.timeouts.step > 0.0) {
            return Err(ConfigError::NonPositive("timeouts.step"));
        }
        if self.timeouts.end < self.timeouts.start {
            return Err(ConfigError::EmptySweep {
                start: self.timeouts.start,
                end: self.timeouts.end,
            });
        }
        if !(0.0..=1.0).contains(&self.latency_jitter) {
            return Err(ConfigError::Jitter(self.latency_jitter));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.total_nodes(), 100);
    }

    #[test]
    fn test_default_sweep_values() {
        let values = TimeoutSweep::default().values();
        assert_eq!(values.len(), 40);
        assert_eq!(values[0], 0.01);
        assert!((values[39] - 0.40).abs() < 1e-12);
    }

    #[test]
    fn test_single_sweep() {
        assert_eq!(TimeoutSweep::single(0.25).values(), vec![0.25]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ExperimentConfig {
            correct_nodes: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCorrectNodes));

        let config = ExperimentConfig {
            time_limit: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NonPositive("time_limit")));

        let config = ExperimentConfig {
            timeouts: TimeoutSweep {
                start: 0.2,
                end: 0.1,
                step: 0.01,
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptySweep {
                start: 0.2,
                end: 0.1
            })
        );

        let config = ExperimentConfig {
            latency_jitter: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Jitter(1.5)));

        let config = ExperimentConfig {
            timeouts: TimeoutSweep {
                start: 0.1,
                end: 0.2,
                step: f64::NAN,
            },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive("timeouts.step"))
        );
    }
}
