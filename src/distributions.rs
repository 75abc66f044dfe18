//! Probability distributions for policy gradient methods

use burn::tensor::{backend::Backend, Tensor};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::f32::consts::PI;

use crate::error::{LqrError, Result};
use crate::utils::tensor_from_rows;

/// Base trait for parametric distributions
pub trait ParametricDistribution<B: Backend> {
    fn sample(&self, params: Tensor<B, 2>, rng: &mut impl Rng) -> Tensor<B, 2>;
    /// Log density of each row, `[batch]`
    fn log_prob(&self, params: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1>;
    fn entropy(&self, params: Tensor<B, 2>) -> Tensor<B, 1>;
    fn mode(&self, params: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Diagonal Gaussian around the network output with a constant standard deviation
#[derive(Clone, Copy, Debug)]
pub struct FixedStdNormal {
    pub std: f32,
}

impl FixedStdNormal {
    pub fn new(std: f32) -> Result<Self> {
        if !(std > 0.0 && std.is_finite()) {
            return Err(LqrError::InvalidConfig(format!(
                "action standard deviation must be positive, got {std}"
            )));
        }
        Ok(Self { std })
    }

    fn variance(&self) -> f32 {
        self.std * self.std
    }

    /// Differential entropy of an `action_size`-dimensional sample
    pub fn entropy_value(&self, action_size: usize) -> f32 {
        0.5 * action_size as f32 * (1.0 + (2.0 * PI * self.variance()).ln())
    }
}

impl<B: Backend> ParametricDistribution<B> for FixedStdNormal {
    fn sample(&self, params: Tensor<B, 2>, rng: &mut impl Rng) -> Tensor<B, 2> {
        let [batch_size, action_size] = params.dims();
        let noise: Vec<f32> = (0..batch_size * action_size)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * self.std)
            .collect();
        let noise = tensor_from_rows::<B>(noise, batch_size, action_size, &params.device());

        params + noise
    }

    fn log_prob(&self, params: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch_size, action_size] = params.dims();
        let var = self.variance();
        let normalizer = 0.5 * action_size as f32 * ((2.0 * PI).ln() + var.ln());

        let squared = (actions - params).powf_scalar(2.0).sum_dim(1);
        squared
            .div_scalar(-2.0 * var)
            .sub_scalar(normalizer)
            .reshape([batch_size])
    }

    fn entropy(&self, params: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch_size, action_size] = params.dims();
        Tensor::full([batch_size], self.entropy_value(action_size), &params.device())
    }

    fn mode(&self, params: Tensor<B, 2>) -> Tensor<B, 2> {
        params
    }
}

/// Energy-based policy over a finite candidate set, `π(a_i) ∝ exp(-E_i / τ)`
#[derive(Clone, Copy, Debug)]
pub struct Boltzmann {
    pub temperature: f32,
}

impl Boltzmann {
    pub fn new(temperature: f32) -> Result<Self> {
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(LqrError::InvalidConfig(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        Ok(Self { temperature })
    }

    /// Log-probabilities of each candidate, shifted by the minimum energy for stability
    pub fn log_probs(&self, energies: &[f32]) -> Result<Vec<f32>> {
        if energies.is_empty() {
            return Err(LqrError::InvalidConfig(
                "Boltzmann policy needs at least one candidate".to_string(),
            ));
        }
        if energies.iter().any(|e| !e.is_finite()) {
            return Err(LqrError::TensorData(
                "non-finite energy in candidate set".to_string(),
            ));
        }

        let min_energy = energies.iter().copied().fold(f32::INFINITY, f32::min);
        let logits: Vec<f32> = energies
            .iter()
            .map(|e| -(e - min_energy) / self.temperature)
            .collect();
        let log_sum = logits.iter().map(|l| l.exp()).sum::<f32>().ln();

        Ok(logits.iter().map(|l| l - log_sum).collect())
    }

    pub fn probabilities(&self, energies: &[f32]) -> Result<Vec<f32>> {
        Ok(self.log_probs(energies)?.into_iter().map(f32::exp).collect())
    }

    /// Sample a candidate index together with its log-probability
    pub fn sample(&self, energies: &[f32], rng: &mut impl Rng) -> Result<(usize, f32)> {
        let log_probs = self.log_probs(energies)?;
        let weights: Vec<f32> = log_probs.iter().map(|l| l.exp()).collect();
        let index = WeightedIndex::new(&weights)
            .map_err(|err| LqrError::TensorData(format!("Boltzmann weights: {err}")))?
            .sample(rng);

        Ok((index, log_probs[index]))
    }

    /// Lowest-energy candidate
    pub fn mode(&self, energies: &[f32]) -> Option<usize> {
        energies
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    pub fn entropy(&self, energies: &[f32]) -> Result<f32> {
        let log_probs = self.log_probs(energies)?;
        Ok(-log_probs.iter().map(|l| l.exp() * l).sum::<f32>())
    }
}
