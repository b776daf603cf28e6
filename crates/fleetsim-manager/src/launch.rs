//! Launch and dropout scheduling: pure offset math, separated from the
//! tasks that execute it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing discipline for starting a group's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStrategy {
    Immediate,
    Linear,
    Batch,
    Exponential,
}

/// Group launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchConfig {
    pub strategy: LaunchStrategy,
    /// Base delay; defaults to 0 for immediate and 1000 ms otherwise.
    pub delay_ms: Option<u64>,
    pub batch_size: usize,
    pub max_delay_ms: u64,
    pub exponent_base: f64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            strategy: LaunchStrategy::Immediate,
            delay_ms: None,
            batch_size: 100,
            max_delay_ms: 60_000,
            exponent_base: 1.5,
        }
    }
}

impl LaunchConfig {
    pub fn delay(&self) -> Duration {
        let default = match self.strategy {
            LaunchStrategy::Immediate => 0,
            _ => 1000,
        };
        Duration::from_millis(self.delay_ms.unwrap_or(default))
    }
}

/// Start-time offset from the group-start epoch for member index `i`.
pub fn launch_offset(config: &LaunchConfig, i: usize) -> Duration {
    let delay = config.delay();
    match config.strategy {
        LaunchStrategy::Immediate => Duration::ZERO,
        LaunchStrategy::Linear => delay * i as u32,
        LaunchStrategy::Batch => {
            let batch = config.batch_size.max(1);
            delay * (i / batch) as u32
        }
        LaunchStrategy::Exponential => {
            let max = Duration::from_millis(config.max_delay_ms);
            let scaled = delay.mul_f64(config.exponent_base.max(0.0).powi(i as i32));
            scaled.min(max)
        }
    }
}

/// Offsets for every member of an `n`-member launch.
pub fn launch_offsets(config: &LaunchConfig, n: usize) -> Vec<Duration> {
    (0..n).map(|i| launch_offset(config, i)).collect()
}

/// Timing discipline for programmed failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropoutStrategy {
    Immediate,
    Linear,
    Exponential,
    Random,
}

/// Group dropout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DropoutConfig {
    pub strategy: DropoutStrategy,
    /// Absolute number of devices to drop. Takes precedence over
    /// `percentage`.
    pub count: Option<usize>,
    /// Percentage of the group's running simulated members to drop.
    pub percentage: Option<f64>,
    pub delay_ms: u64,
    pub exponent_base: f64,
    /// Caps the exponential schedule and spans the random one. Absent means
    /// the exponential schedule is uncapped.
    pub duration_ms: Option<u64>,
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            strategy: DropoutStrategy::Immediate,
            count: None,
            percentage: None,
            delay_ms: 1000,
            exponent_base: 1.5,
            duration_ms: None,
            reconnect: false,
            reconnect_delay_ms: 1000,
        }
    }
}

impl DropoutConfig {
    /// Number of devices to select out of `running` candidates.
    pub fn selection_size(&self, running: usize) -> usize {
        if let Some(count) = self.count {
            return count.min(running);
        }
        if let Some(percentage) = self.percentage {
            return ((percentage / 100.0) * running as f64).floor() as usize;
        }
        0
    }
}

/// Picks the dropout targets from the running simulated members, which must
/// be sorted ascending by device id. Non-random strategies are
/// deterministic; `random` samples uniformly without replacement from the
/// given seed.
pub fn select_targets(candidates: &[String], config: &DropoutConfig, seed: u64) -> Vec<String> {
    let n = config.selection_size(candidates.len());
    if n == 0 {
        return Vec::new();
    }

    match config.strategy {
        DropoutStrategy::Random => {
            // Partial Fisher-Yates: the first n slots end up uniform
            let mut rng = StdRng::seed_from_u64(seed);
            let mut pool: Vec<String> = candidates.to_vec();
            for i in 0..n {
                let j = rng.gen_range(i..pool.len());
                pool.swap(i, j);
            }
            pool.truncate(n);
            pool
        }
        _ => candidates.iter().take(n).cloned().collect(),
    }
}

/// Disconnect-time offsets for `n` selected devices, index-aligned with the
/// selection order.
pub fn dropout_offsets(config: &DropoutConfig, n: usize, seed: u64) -> Vec<Duration> {
    let delay = Duration::from_millis(config.delay_ms);
    match config.strategy {
        DropoutStrategy::Immediate => vec![Duration::ZERO; n],
        DropoutStrategy::Linear => (0..n).map(|k| delay * k as u32).collect(),
        DropoutStrategy::Exponential => (0..n)
            .map(|k| {
                let scaled = delay.mul_f64(config.exponent_base.max(0.0).powi(k as i32));
                match config.duration_ms {
                    Some(cap) => scaled.min(Duration::from_millis(cap)),
                    None => scaled,
                }
            })
            .collect(),
        DropoutStrategy::Random => {
            let span = config.duration_ms.unwrap_or(0);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut offsets: Vec<Duration> = (0..n)
                .map(|_| {
                    if span == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_millis(rng.gen_range(0..span))
                    }
                })
                .collect();
            offsets.sort();
            offsets
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("x-{}", i)).collect()
    }

    #[test]
    fn test_immediate_launch_offsets() {
        let config = LaunchConfig::default();
        assert!(launch_offsets(&config, 5).iter().all(|d| d.is_zero()));
    }

    #[test]
    fn test_linear_launch_offsets() {
        let config = LaunchConfig {
            strategy: LaunchStrategy::Linear,
            delay_ms: Some(100),
            ..Default::default()
        };
        let offsets = launch_offsets(&config, 4);
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn test_batch_launch_offsets() {
        let config = LaunchConfig {
            strategy: LaunchStrategy::Batch,
            delay_ms: Some(200),
            batch_size: 3,
            ..Default::default()
        };
        let offsets = launch_offsets(&config, 10);
        let ms: Vec<u128> = offsets.iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![0, 0, 0, 200, 200, 200, 400, 400, 400, 600]);
    }

    #[test]
    fn test_exponential_launch_offsets_capped() {
        let config = LaunchConfig {
            strategy: LaunchStrategy::Exponential,
            delay_ms: Some(1000),
            exponent_base: 2.0,
            max_delay_ms: 5000,
            ..Default::default()
        };
        let ms: Vec<u128> = launch_offsets(&config, 5)
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(ms, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_exponential_base_one_degenerates_to_fixed_delay() {
        let config = LaunchConfig {
            strategy: LaunchStrategy::Exponential,
            delay_ms: Some(500),
            exponent_base: 1.0,
            ..Default::default()
        };
        let ms: Vec<u128> = launch_offsets(&config, 4)
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(ms, vec![500, 500, 500, 500]);
    }

    #[test]
    fn test_launch_default_delay_is_zero_only_for_immediate() {
        let immediate = LaunchConfig::default();
        assert_eq!(immediate.delay(), Duration::ZERO);

        let linear = LaunchConfig {
            strategy: LaunchStrategy::Linear,
            ..Default::default()
        };
        assert_eq!(linear.delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_selection_count_takes_precedence() {
        let config = DropoutConfig {
            count: Some(3),
            percentage: Some(90.0),
            ..Default::default()
        };
        assert_eq!(config.selection_size(10), 3);
        assert_eq!(config.selection_size(2), 2);
    }

    #[test]
    fn test_selection_percentage_floors() {
        let config = DropoutConfig {
            percentage: Some(50.0),
            ..Default::default()
        };
        assert_eq!(config.selection_size(10), 5);
        assert_eq!(config.selection_size(5), 2);
        assert_eq!(config.selection_size(0), 0);
    }

    #[test]
    fn test_deterministic_selection_is_ascending_prefix() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Linear,
            count: Some(3),
            ..Default::default()
        };
        let targets = select_targets(&ids(6), &config, 1);
        assert_eq!(targets, vec!["x-0", "x-1", "x-2"]);
    }

    #[test]
    fn test_random_selection_seeded_and_without_replacement() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Random,
            count: Some(4),
            ..Default::default()
        };
        let a = select_targets(&ids(10), &config, 42);
        let b = select_targets(&ids(10), &config, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);

        let mut unique = a.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_dropout_offsets_linear() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Linear,
            delay_ms: 250,
            ..Default::default()
        };
        let ms: Vec<u128> = dropout_offsets(&config, 3, 0)
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(ms, vec![0, 250, 500]);
    }

    #[test]
    fn test_dropout_offsets_exponential_duration_cap() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Exponential,
            delay_ms: 1000,
            exponent_base: 2.0,
            duration_ms: Some(3000),
            ..Default::default()
        };
        let ms: Vec<u128> = dropout_offsets(&config, 4, 0)
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(ms, vec![1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_dropout_offsets_random_sorted_within_span() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Random,
            duration_ms: Some(1000),
            ..Default::default()
        };
        let offsets = dropout_offsets(&config, 8, 7);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        assert!(offsets.iter().all(|d| d < &Duration::from_millis(1000)));
    }

    #[test]
    fn test_dropout_random_zero_duration_fires_at_zero() {
        let config = DropoutConfig {
            strategy: DropoutStrategy::Random,
            duration_ms: Some(0),
            count: Some(3),
            ..Default::default()
        };
        assert!(dropout_offsets(&config, 3, 1).iter().all(|d| d.is_zero()));
    }
}
