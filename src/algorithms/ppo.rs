//! Proximal Policy Optimization (PPO) implementation
//!
//! Costs are minimised rather than rewards maximised, so the clipped surrogate
//! keeps the pessimistic (larger) of the two cost estimates. Actor and critic
//! are separate networks with separate Adam optimisers; rollouts are collected
//! with `policy_old`, a frozen copy of the actor refreshed after every update.

use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::{backend::AutodiffBackend, ElementConversion, Tensor};
use ndarray::Array1;
use rand::Rng;
use std::path::Path;
use tracing::{debug, warn};

use crate::algorithms::Agent;
use crate::distributions::{FixedStdNormal, ParametricDistribution};
use crate::environments::{Action, Observation, RolloutBuffer};
use crate::error::{LqrError, Result};
use crate::networks::{GaussianActor, GaussianActorConfig, QuadraticCritic, QuadraticCriticConfig};
use crate::training::{PpoConfig, TrainingMetrics};
use crate::utils::{discounted_returns, normalize, tensor_from_rows, tensor_from_vec, tensor_to_vec};

const ACTOR_FILE: &str = "ppo_actor";
const CRITIC_FILE: &str = "ppo_critic";

/// PPO agent with a Gaussian actor and a quadratic state-value critic
pub struct PPO<B: AutodiffBackend> {
    actor: GaussianActor<B>,
    critic: QuadraticCritic<B>,
    policy_old: GaussianActor<B::InnerBackend>,
    distribution: FixedStdNormal,
    actor_optimizer: OptimizerAdaptor<Adam, GaussianActor<B>, B>,
    critic_optimizer: OptimizerAdaptor<Adam, QuadraticCritic<B>, B>,
    config: PpoConfig,
    state_size: usize,
    action_size: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> PPO<B> {
    pub fn new(
        state_size: usize,
        action_size: usize,
        config: PpoConfig,
        rng: &mut impl Rng,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;

        let actor = GaussianActorConfig::new(state_size, action_size)
            .with_hidden_size(config.hidden_size)
            .with_mirrored(config.mirrored_init)
            .init::<B>(rng, device)?;
        let critic = QuadraticCriticConfig::new(state_size)
            .with_hidden_size(config.hidden_size)
            .with_mirrored(config.mirrored_init)
            .init::<B>(rng, device)?;

        let (beta_1, beta_2) = config.betas;
        let actor_optimizer = AdamConfig::new()
            .with_beta_1(beta_1)
            .with_beta_2(beta_2)
            .init();
        let critic_optimizer = AdamConfig::new()
            .with_beta_1(beta_1)
            .with_beta_2(beta_2)
            .init();

        Ok(Self {
            policy_old: actor.valid(),
            actor,
            critic,
            distribution: FixedStdNormal::new(config.action_std)?,
            actor_optimizer,
            critic_optimizer,
            config,
            state_size,
            action_size,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn actor(&self) -> &GaussianActor<B> {
        &self.actor
    }

    pub fn critic(&self) -> &QuadraticCritic<B> {
        &self.critic
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

    fn rollout_tensors(&self, memory: &RolloutBuffer) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let n = memory.len();
        let states = tensor_from_rows::<B>(memory.flat_states(), n, self.state_size, &self.device);
        let actions =
            tensor_from_rows::<B>(memory.flat_actions(), n, self.action_size, &self.device);
        (states, actions)
    }

    fn monte_carlo_returns(&self, memory: &RolloutBuffer) -> Vec<f32> {
        discounted_returns(&memory.costs, &memory.is_terminals, self.config.gamma)
    }

    /// Clipped-surrogate update of the actor for `k_epochs`, then refresh `policy_old`
    pub fn update_actor(&mut self, memory: &RolloutBuffer) -> Result<TrainingMetrics> {
        memory.validate()?;
        if memory.is_empty() {
            return Ok(TrainingMetrics::default());
        }
        let n = memory.len();
        let alpha = self.config.alpha;
        let eps = self.config.eps_clip;

        let returns = normalize(&self.monte_carlo_returns(memory), 1e-8);
        let (states, actions) = self.rollout_tensors(memory);
        let old_log_probs = tensor_from_vec::<B>(memory.log_probs.clone(), &self.device);

        let values = self
            .critic
            .forward(states.clone())
            .mul_scalar(alpha)
            .reshape([n])
            .detach();
        let advantages = tensor_from_vec::<B>(returns, &self.device) - values;

        let mut metrics = TrainingMetrics::default();
        for _ in 0..self.config.k_epochs {
            let means = self.actor.forward(states.clone());
            let log_probs = self.distribution.log_prob(means, actions.clone());
            let ratios = (log_probs.clone() - old_log_probs.clone()).exp();

            let surr1 = ratios.clone() * advantages.clone();
            let surr2 = ratios.clone().clamp(1.0 - eps, 1.0 + eps) * advantages.clone();
            let loss = surr1.max_pair(surr2).mean();

            metrics.policy_loss = loss.clone().into_scalar().elem::<f32>();
            let ratio_values = tensor_to_vec(ratios.detach())?;
            metrics.approx_kl =
                ratio_values.iter().map(|r| -r.ln()).sum::<f32>() / n as f32;
            metrics.clip_fraction = ratio_values
                .iter()
                .filter(|r| (*r - 1.0).abs() > eps)
                .count() as f32
                / n as f32;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.actor);
            self.actor = self
                .actor_optimizer
                .step(self.config.actor_lr, self.actor.clone(), grads);
        }

        self.policy_old = self.actor.valid();
        Ok(metrics)
    }

    /// `α·(G - mean)/(std + 1e-5)`, the regression target of `α·critic(s)`
    pub fn critic_targets(&self, memory: &RolloutBuffer) -> Vec<f32> {
        let alpha = self.config.alpha;
        normalize(&self.monte_carlo_returns(memory), 1e-5)
            .into_iter()
            .map(|g| alpha * g)
            .collect()
    }

    /// Fit `α·critic(s)` to the scaled returns for `k_epochs`, returns the last loss
    pub fn update_critic(&mut self, memory: &RolloutBuffer) -> Result<f32> {
        memory.validate()?;
        if memory.is_empty() {
            return Ok(0.0);
        }
        let n = memory.len();
        let alpha = self.config.alpha;

        let targets = tensor_from_vec::<B>(self.critic_targets(memory), &self.device);
        let (states, _) = self.rollout_tensors(memory);

        let mut last_loss = 0.0;
        for _ in 0..self.config.k_epochs {
            let values = self
                .critic
                .forward(states.clone())
                .mul_scalar(alpha)
                .reshape([n]);
            let loss = (values - targets.clone())
                .powf_scalar(2.0)
                .mean()
                .mul_scalar(0.5 / (alpha * alpha));

            last_loss = loss.clone().into_scalar().elem::<f32>();

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.critic);
            self.critic = self
                .critic_optimizer
                .step(self.config.critic_lr, self.critic.clone(), grads);
        }

        Ok(last_loss)
    }

    /// Restore weights written by [`Agent::save`]
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.actor = self
            .actor
            .clone()
            .load_file(dir.join(ACTOR_FILE), &recorder, &self.device)?;
        self.critic = self
            .critic
            .clone()
            .load_file(dir.join(CRITIC_FILE), &recorder, &self.device)?;
        self.policy_old = self.actor.valid();
        Ok(())
    }
}

impl<B: AutodiffBackend> Agent for PPO<B> {
    fn name(&self) -> &'static str {
        "PPO"
    }

    fn select_action(
        &self,
        state: &Observation,
        memory: &mut RolloutBuffer,
        rng: &mut impl Rng,
    ) -> Result<Action> {
        self.check_state(state)?;

        let input = tensor_from_rows::<B::InnerBackend>(state.to_vec(), 1, self.state_size, &self.device);
        let mean = self.policy_old.forward(input);
        let action = self.distribution.sample(mean.clone(), rng);
        let log_prob = self.distribution.log_prob(mean, action.clone());

        let action = Array1::from_vec(tensor_to_vec(action)?);
        let log_prob = tensor_to_vec(log_prob)?[0];
        memory.push_decision(state.clone(), action.clone(), log_prob);

        Ok(action)
    }

    fn update(&mut self, memory: &RolloutBuffer) -> Result<TrainingMetrics> {
        memory.validate()?;
        if memory.is_empty() {
            warn!("PPO update skipped: rollout buffer is empty");
            return Ok(TrainingMetrics::default());
        }

        let mut metrics = self.update_actor(memory)?;
        metrics.value_loss = self.update_critic(memory)?;
        metrics.entropy = self.distribution.entropy_value(self.action_size);
        metrics.samples = memory.len();

        debug!(
            "PPO update on {} samples: policy {:.4}, value {:.4}, KL {:.4}, clipped {:.2}",
            metrics.samples,
            metrics.policy_loss,
            metrics.value_loss,
            metrics.approx_kl,
            metrics.clip_fraction
        );
        Ok(metrics)
    }

    fn greedy_action(&self, state: &Observation) -> Result<Action> {
        self.check_state(state)?;
        let input = tensor_from_rows::<B::InnerBackend>(state.to_vec(), 1, self.state_size, &self.device);
        let mean = self.distribution.mode(self.policy_old.forward(input));
        Ok(Array1::from_vec(tensor_to_vec(mean)?))
    }

    fn state_values(&self, states: &[Observation]) -> Result<Vec<f32>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        for state in states {
            self.check_state(state)?;
        }
        let flat: Vec<f32> = states.iter().flat_map(|s| s.iter().copied()).collect();
        let input = tensor_from_rows::<B::InnerBackend>(flat, states.len(), self.state_size, &self.device);
        let values = self
            .critic
            .valid()
            .forward(input)
            .mul_scalar(self.config.alpha);
        tensor_to_vec(values)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.actor.clone().save_file(dir.join(ACTOR_FILE), &recorder)?;
        self.critic.clone().save_file(dir.join(CRITIC_FILE), &recorder)?;
        Ok(())
    }
}
