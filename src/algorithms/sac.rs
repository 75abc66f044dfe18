//! Energy-based soft actor-critic with a quadratic Q function
//!
//! The agent learns `Q(s, a)`, the expected (soft) cost of taking `a` in `s`,
//! with a single-hidden-layer network whose activation is `x²`. There is no
//! separate actor: the policy is the Boltzmann distribution
//! `π(a|s) ∝ exp(-Q(s, a) / τ)`, evaluated on a fresh uniform candidate set at
//! every decision. Because the network is a quadratic form of `[s, a]`, its
//! greedy action is linear in the state and can be read against the LQR gain.

use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::path::Path;
use tracing::{debug, warn};

use crate::algorithms::Agent;
use crate::distributions::Boltzmann;
use crate::environments::{Action, Observation, RolloutBuffer};
use crate::error::{LqrError, Result};
use crate::networks::{QuadraticCritic, QuadraticCriticConfig};
use crate::training::{SacConfig, TrainingMetrics};
use crate::utils::{discounted_returns, linspace, tensor_from_rows, tensor_from_vec, tensor_to_vec};

const MODEL_FILE: &str = "sac_q";

pub struct SAC<B: AutodiffBackend> {
    model: QuadraticCritic<B>,
    model_old: QuadraticCritic<B::InnerBackend>,
    policy: Boltzmann,
    optimizer: OptimizerAdaptor<Adam, QuadraticCritic<B>, B>,
    /// Fixed action grid, row-major `[count, action_size]`, for greedy decisions
    greedy_candidates: Vec<f32>,
    config: SacConfig,
    state_size: usize,
    action_size: usize,
    device: B::Device,
}

/// Pair one state with every candidate action, `[count, state_size + action_size]`
fn state_action_rows(state: &[f32], candidates: &[f32], action_size: usize) -> Vec<f32> {
    candidates
        .chunks(action_size)
        .flat_map(|action| state.iter().chain(action.iter()).copied())
        .collect()
}

/// Concatenated `[s, a]` rows of a rollout
fn rollout_rows(memory: &RolloutBuffer) -> Vec<f32> {
    memory
        .states
        .iter()
        .zip(&memory.actions)
        .flat_map(|(s, a)| s.iter().chain(a.iter()).copied())
        .collect()
}

impl<B: AutodiffBackend> SAC<B> {
    pub fn new(
        state_size: usize,
        action_size: usize,
        config: SacConfig,
        rng: &mut impl Rng,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;

        let model = QuadraticCriticConfig::new(state_size + action_size)
            .with_hidden_size(config.hidden_size)
            .with_bias(true)
            .init::<B>(rng, device)?;

        let optimizer = AdamConfig::new()
            .with_beta_1(config.betas.0)
            .with_beta_2(config.betas.1)
            .init();

        let bound = config.action_bound;
        let greedy_candidates = if action_size == 1 {
            linspace(-bound as f64, bound as f64, config.greedy_resolution)
                .into_iter()
                .map(|a| a as f32)
                .collect()
        } else {
            let dist = Uniform::new_inclusive(-bound, bound);
            (0..config.greedy_resolution * action_size)
                .map(|_| dist.sample(rng))
                .collect()
        };

        Ok(Self {
            model_old: model.valid(),
            model,
            policy: Boltzmann::new(config.tau)?,
            optimizer,
            greedy_candidates,
            config,
            state_size,
            action_size,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &SacConfig {
        &self.config
    }

    pub fn model(&self) -> &QuadraticCritic<B> {
        &self.model
    }

    fn check_state(&self, state: &Observation) -> Result<()> {
        if state.len() != self.state_size {
            return Err(LqrError::DimensionMismatch(format!(
                "state has length {}, agent expects {}",
                state.len(),
                self.state_size
            )));
        }
        Ok(())
    }

    /// `Q_old(s, a_i)` for every candidate `a_i`
    fn energies(&self, state: &Observation, candidates: &[f32]) -> Result<Vec<f32>> {
        let count = candidates.len() / self.action_size;
        let state = state.to_vec();
        let rows = state_action_rows(&state, candidates, self.action_size);
        let input = tensor_from_rows::<B::InnerBackend>(
            rows,
            count,
            self.state_size + self.action_size,
            &self.device,
        );
        tensor_to_vec(self.model_old.forward(input))
    }

    fn candidate(&self, candidates: &[f32], index: usize) -> Action {
        let start = index * self.action_size;
        Array1::from_vec(candidates[start..start + self.action_size].to_vec())
    }

    /// Q-values of the stored state/action pairs under the current model
    pub fn q_values(&self, memory: &RolloutBuffer) -> Result<Vec<f32>> {
        memory.validate()?;
        if memory.is_empty() {
            return Ok(Vec::new());
        }
        let n = memory.len();
        let input = tensor_from_rows::<B::InnerBackend>(
            rollout_rows(memory),
            n,
            self.state_size + self.action_size,
            &self.device,
        );
        let q = self.model.valid().forward(input).reshape([n]);
        tensor_to_vec(q)
    }

    /// Monte Carlo targets; with entropy regularisation each stage cost becomes `c + τ·log π`
    pub fn targets(&self, memory: &RolloutBuffer) -> Vec<f32> {
        let costs: Vec<f32> = if self.config.entropy_regularized {
            memory
                .costs
                .iter()
                .zip(&memory.log_probs)
                .map(|(c, lp)| c + self.config.tau * lp)
                .collect()
        } else {
            memory.costs.clone()
        };
        discounted_returns(&costs, &memory.is_terminals, self.config.gamma)
    }

    /// Restore weights written by [`Agent::save`]
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model = self
            .model
            .clone()
            .load_file(dir.join(MODEL_FILE), &recorder, &self.device)?;
        self.model_old = self.model.valid();
        Ok(())
    }
}

impl<B: AutodiffBackend> Agent for SAC<B> {
    fn name(&self) -> &'static str {
        "SAC"
    }

    fn select_action(
        &self,
        state: &Observation,
        memory: &mut RolloutBuffer,
        rng: &mut impl Rng,
    ) -> Result<Action> {
        self.check_state(state)?;

        let bound = self.config.action_bound;
        let dist = Uniform::new_inclusive(-bound, bound);
        let candidates: Vec<f32> = (0..self.config.num_candidates * self.action_size)
            .map(|_| dist.sample(rng))
            .collect();

        let energies = self.energies(state, &candidates)?;
        let (index, log_prob) = self.policy.sample(&energies, rng)?;
        let action = self.candidate(&candidates, index);
        memory.push_decision(state.clone(), action.clone(), log_prob);

        Ok(action)
    }

    fn update(&mut self, memory: &RolloutBuffer) -> Result<TrainingMetrics> {
        memory.validate()?;
        if memory.is_empty() {
            warn!("SAC update skipped: rollout buffer is empty");
            return Ok(TrainingMetrics::default());
        }

        let n = memory.len();
        let targets = tensor_from_vec::<B>(self.targets(memory), &self.device);
        let inputs = tensor_from_rows::<B>(
            rollout_rows(memory),
            n,
            self.state_size + self.action_size,
            &self.device,
        );

        let mut last_loss = 0.0;
        for _ in 0..self.config.k_epochs {
            let q = self.model.forward(inputs.clone()).reshape([n]);
            let loss = (q - targets.clone()).powf_scalar(2.0).mean().mul_scalar(0.5);

            last_loss = loss.clone().into_scalar().elem::<f32>();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self
                .optimizer
                .step(self.config.lr, self.model.clone(), grads);
        }
        self.model_old = self.model.valid();

        let mean_log_prob = memory.log_probs.iter().sum::<f32>() / n as f32;
        let metrics = TrainingMetrics {
            policy_loss: self.config.tau * mean_log_prob,
            value_loss: last_loss,
            entropy: -mean_log_prob,
            samples: n,
            ..Default::default()
        };

        debug!(
            "SAC update on {} samples: Q loss {:.4}, entropy {:.4}",
            n, metrics.value_loss, metrics.entropy
        );
        Ok(metrics)
    }

    fn greedy_action(&self, state: &Observation) -> Result<Action> {
        self.check_state(state)?;
        let energies = self.energies(state, &self.greedy_candidates)?;
        let index = self
            .policy
            .mode(&energies)
            .ok_or_else(|| LqrError::InvalidConfig("empty greedy candidate grid".to_string()))?;
        Ok(self.candidate(&self.greedy_candidates, index))
    }

    /// `min_a Q(s, a)` over the greedy grid
    fn state_values(&self, states: &[Observation]) -> Result<Vec<f32>> {
        states
            .iter()
            .map(|state| {
                self.check_state(state)?;
                let energies = self.energies(state, &self.greedy_candidates)?;
                Ok(energies.into_iter().fold(f32::INFINITY, f32::min))
            })
            .collect()
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model.clone().save_file(dir.join(MODEL_FILE), &recorder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::seeded_rng;
    use burn::backend::{Autodiff, NdArray};
    use ndarray::arr1;

    type TestBackend = Autodiff<NdArray>;

    fn agent(config: SacConfig) -> SAC<TestBackend> {
        let mut rng = seeded_rng(1);
        SAC::new(1, 1, config, &mut rng, &Default::default()).unwrap()
    }

    fn rollout(agent: &SAC<TestBackend>, steps: usize) -> RolloutBuffer {
        let mut memory = RolloutBuffer::new();
        let mut rng = seeded_rng(2);
        let mut state = arr1(&[1.0f32]);
        for t in 0..steps {
            let action = agent.select_action(&state, &mut memory, &mut rng).unwrap();
            memory.push_outcome(state[0] * state[0] + action[0] * action[0], t + 1 == steps);
            state = arr1(&[state[0] + action[0]]);
        }
        memory
    }

    #[test]
    fn state_action_rows_interleave() {
        let rows = state_action_rows(&[1.0, 2.0], &[0.1, -0.1, 0.5], 1);
        assert_eq!(rows, vec![1.0, 2.0, 0.1, 1.0, 2.0, -0.1, 1.0, 2.0, 0.5]);
    }

    #[test]
    fn actions_stay_inside_the_bound() {
        let agent = agent(SacConfig {
            action_bound: 2.0,
            ..SacConfig::default()
        });
        let mut memory = RolloutBuffer::new();
        let mut rng = seeded_rng(3);
        for _ in 0..20 {
            let action = agent
                .select_action(&arr1(&[4.0]), &mut memory, &mut rng)
                .unwrap();
            assert!(action[0].abs() <= 2.0);
        }
        assert_eq!(memory.states.len(), 20);
        assert!(memory.log_probs.iter().all(|lp| *lp <= 0.0));
    }

    #[test]
    fn greedy_action_comes_from_the_grid() {
        let agent = agent(SacConfig {
            greedy_resolution: 11,
            action_bound: 1.0,
            ..SacConfig::default()
        });
        let action = agent.greedy_action(&arr1(&[0.5])).unwrap();
        let on_grid = (0..11).any(|i| (action[0] - (-1.0 + 0.2 * i as f32)).abs() < 1e-5);
        assert!(on_grid);
    }

    #[test]
    fn state_value_is_minimum_over_grid() {
        let agent = agent(SacConfig::default());
        let state = arr1(&[0.3f32]);
        let energies = agent.energies(&state, &agent.greedy_candidates).unwrap();
        let min = energies.iter().copied().fold(f32::INFINITY, f32::min);
        let value = agent.state_values(&[state]).unwrap()[0];
        assert_eq!(value, min);
    }

    #[test]
    fn soft_targets_add_entropy_cost() {
        let agent = agent(SacConfig {
            tau: 0.5,
            gamma: 1.0,
            ..SacConfig::default()
        });
        let mut memory = RolloutBuffer::new();
        memory.push_decision(arr1(&[1.0]), arr1(&[0.0]), -2.0);
        memory.push_outcome(1.0, false);
        memory.push_decision(arr1(&[1.0]), arr1(&[0.0]), -1.0);
        memory.push_outcome(1.0, true);

        assert_eq!(agent.targets(&memory), vec![0.5, 0.5]);

        let plain = self::agent(SacConfig {
            entropy_regularized: false,
            ..SacConfig::default()
        });
        assert_eq!(plain.targets(&memory), vec![2.0, 1.0]);
    }

    #[test]
    fn update_fits_q_towards_targets() {
        let mut agent = agent(SacConfig {
            action_bound: 1.0,
            ..SacConfig::default()
        });
        let memory = rollout(&agent, 10);
        let targets = agent.targets(&memory);
        let error = |q: &[f32]| -> f32 {
            q.iter()
                .zip(&targets)
                .map(|(q, t)| (q - t).powi(2))
                .sum::<f32>()
        };

        let before = error(&agent.q_values(&memory).unwrap());
        let metrics = agent.update(&memory).unwrap();
        let after = error(&agent.q_values(&memory).unwrap());

        assert_eq!(metrics.samples, 10);
        assert!(metrics.entropy >= 0.0);
        assert!(after < before);
    }

    #[test]
    fn q_values_reject_unsynced_buffers() {
        let agent = agent(SacConfig::default());
        let mut memory = rollout(&agent, 3);
        let mut rng = seeded_rng(5);
        agent
            .select_action(&arr1(&[1.0]), &mut memory, &mut rng)
            .unwrap();

        assert!(matches!(
            agent.q_values(&memory),
            Err(LqrError::DimensionMismatch(_))
        ));
        assert!(agent.q_values(&RolloutBuffer::new()).unwrap().is_empty());
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = agent(SacConfig::default());
        let memory = rollout(&trained, 5);
        trained.update(&memory).unwrap();
        trained.save(dir.path()).unwrap();

        let mut rng = seeded_rng(42);
        let mut restored =
            SAC::<TestBackend>::new(1, 1, SacConfig::default(), &mut rng, &Default::default())
                .unwrap();
        restored.load(dir.path()).unwrap();

        let sample_state = [arr1(&[0.8f32])];
        let expected = trained.state_values(&sample_state).unwrap()[0];
        let actual = restored.state_values(&sample_state).unwrap()[0];
        assert!((expected - actual).abs() <= 1e-4 * (1.0 + expected.abs()));
    }
}
