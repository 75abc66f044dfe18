//! Utility functions and helpers

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

use crate::error::{LqrError, Result};

/// Timing utilities for performance measurement
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic generator for a given seed
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Monte Carlo discounted returns, reset at every terminal step
///
/// `terminals[t]` marks the last step of an episode, so the return at `t`
/// only accumulates costs up to and including `t`.
pub fn discounted_returns(costs: &[f32], terminals: &[bool], gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.0; costs.len()];
    let mut running = 0.0;

    for (i, (&cost, &terminal)) in costs.iter().zip(terminals).enumerate().rev() {
        if terminal {
            running = 0.0;
        }
        running = cost + gamma * running;
        returns[i] = running;
    }

    returns
}

/// Sample mean and unbiased standard deviation (0 for fewer than two values)
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / (n - 1.0);
    (mean, var.sqrt())
}

/// `(x - mean) / (std + eps)`
pub fn normalize(values: &[f32], eps: f32) -> Vec<f32> {
    let (mean, std) = mean_std(values);
    values.iter().map(|v| (v - mean) / (std + eps)).collect()
}

/// `n` evenly spaced points from `low` to `high` inclusive
pub fn linspace(low: f64, high: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![low],
        _ => {
            let step = (high - low) / (n - 1) as f64;
            (0..n).map(|i| low + step * i as f64).collect()
        }
    }
}

/// Row-major host data to a `[rows, cols]` float tensor
pub fn tensor_from_rows<B: Backend>(
    data: Vec<f32>,
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(data, [rows, cols]).convert::<B::FloatElem>(), device)
}

pub fn tensor_from_vec<B: Backend>(data: Vec<f32>, device: &B::Device) -> Tensor<B, 1> {
    let len = data.len();
    Tensor::from_data(TensorData::new(data, [len]).convert::<B::FloatElem>(), device)
}

/// Copy a tensor back to the host as `f32`
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| LqrError::TensorData(format!("{err:?}")))
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs_f64();

    if total_seconds < 60.0 {
        format!("{:.2}s", total_seconds)
    } else if total_seconds < 3600.0 {
        let minutes = (total_seconds / 60.0).floor();
        let seconds = total_seconds % 60.0;
        format!("{:.0}m {:.1}s", minutes, seconds)
    } else {
        let hours = (total_seconds / 3600.0).floor();
        let minutes = ((total_seconds % 3600.0) / 60.0).floor();
        format!("{:.0}h {:.0}m", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_reset_at_terminals() {
        let costs = [1.0, 1.0, 1.0, 2.0, 2.0];
        let terminals = [false, false, true, false, false];
        let returns = discounted_returns(&costs, &terminals, 0.5);

        assert_eq!(returns, vec![1.75, 1.5, 1.0, 3.0, 2.0]);
    }

    #[test]
    fn undiscounted_returns_are_suffix_sums() {
        let returns = discounted_returns(&[1.0, 2.0, 3.0], &[false, false, false], 1.0);
        assert_eq!(returns, vec![6.0, 5.0, 3.0]);
    }

    #[test]
    fn normalization_centres_values() {
        let normalized = normalize(&[1.0, 2.0, 3.0, 4.0], 1e-8);
        let (mean, std) = mean_std(&normalized);
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn single_value_normalizes_to_zero() {
        assert_eq!(normalize(&[5.0], 1e-8), vec![0.0]);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }

    #[test]
    fn linspace_includes_endpoints() {
        let points = linspace(-1.0, 1.0, 5);
        assert_eq!(points, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5.0s");
        assert_eq!(format_duration(Duration::from_secs(7260)), "2h 1m");
    }
}
