//! Side-by-side comparison of a trained agent with the optimal LQR controller

use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::algorithms::Agent;
use crate::control::{simulate_discrete, true_loss, LinearSystem, LqrSolution, Trajectory};
use crate::error::{LqrError, Result};
use crate::training::TrainingSummary;
use crate::utils::linspace;

/// Where and how long the comparison is sampled
///
/// Curves are taken along the first state axis with every other coordinate
/// held at zero, and compare the first action component.
#[derive(Clone, Debug)]
pub struct ComparisonSettings {
    pub horizon: usize,
    /// Horizon and discount the LQR value curve is computed with
    pub value_horizon: usize,
    pub gamma: f64,
    pub value_range: (f64, f64),
    pub policy_range: (f64, f64),
    pub points: usize,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            horizon: 50,
            value_horizon: 50,
            gamma: 1.0,
            value_range: (-1.0, 1.0),
            policy_range: (-10.0, 10.0),
            points: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CurvePoint {
    pub state: f64,
    pub agent: f64,
    pub lqr: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ComparisonReport {
    pub agent: String,
    pub lqr_gain: Vec<Vec<f64>>,
    pub cost_to_go: Vec<Vec<f64>>,
    pub initial_state: Vec<f64>,
    pub agent_trajectory: Trajectory,
    pub lqr_trajectory: Trajectory,
    pub agent_total_cost: f64,
    pub lqr_total_cost: f64,
    pub value_curve: Vec<CurvePoint>,
    pub policy_curve: Vec<CurvePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingSummary>,
}

fn rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

fn on_first_axis(dim: usize, value: f64) -> Array1<f64> {
    let mut x = Array1::zeros(dim);
    x[0] = value;
    x
}

/// Closed-loop rollout under the agent's greedy policy
pub fn simulate_agent<A: Agent>(
    agent: &A,
    system: &LinearSystem,
    x0: &Array1<f64>,
    horizon: usize,
) -> Result<Trajectory> {
    let mut trajectory = Trajectory::default();
    let mut x = x0.clone();
    for _ in 0..horizon {
        let action = agent.greedy_action(&x.mapv(|v| v as f32))?;
        let u = action.mapv(f64::from);
        if u.len() != system.action_dim() {
            return Err(LqrError::DimensionMismatch(format!(
                "agent produced {} actions, system expects {}",
                u.len(),
                system.action_dim()
            )));
        }
        let next = system.step(x.view(), u.view());
        trajectory.states.push(x.to_vec());
        trajectory.actions.push(u.to_vec());
        x = next;
    }
    Ok(trajectory)
}

pub fn compare_with_lqr<A: Agent>(
    agent: &A,
    system: &LinearSystem,
    lqr: &LqrSolution,
    x0: &Array1<f64>,
    settings: &ComparisonSettings,
) -> Result<ComparisonReport> {
    let n = system.state_dim();
    if x0.len() != n {
        return Err(LqrError::DimensionMismatch(format!(
            "initial state has length {}, system expects {n}",
            x0.len()
        )));
    }

    let agent_trajectory = simulate_agent(agent, system, x0, settings.horizon)?;
    let lqr_trajectory = simulate_discrete(system, &lqr.gain, x0.view(), settings.horizon)?;

    let (low, high) = settings.value_range;
    let value_states: Vec<Array1<f64>> = linspace(low, high, settings.points)
        .into_iter()
        .map(|s| on_first_axis(n, s))
        .collect();
    let observations: Vec<_> = value_states.iter().map(|x| x.mapv(|v| v as f32)).collect();
    let agent_values = agent.state_values(&observations)?;
    let lqr_values = true_loss(
        system,
        &lqr.gain,
        &value_states,
        settings.value_horizon,
        settings.gamma,
    )?;
    let value_curve = value_states
        .iter()
        .zip(agent_values.iter().zip(&lqr_values))
        .map(|(x, (agent, lqr))| CurvePoint {
            state: x[0],
            agent: f64::from(*agent),
            lqr: *lqr,
        })
        .collect();

    let (low, high) = settings.policy_range;
    let policy_curve = linspace(low, high, settings.points)
        .into_iter()
        .map(|s| {
            let x = on_first_axis(n, s);
            let action = agent.greedy_action(&x.mapv(|v| v as f32))?;
            Ok(CurvePoint {
                state: s,
                agent: f64::from(action[0]),
                lqr: lqr.control(x.view())[0],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ComparisonReport {
        agent: agent.name().to_string(),
        lqr_gain: rows(&lqr.gain),
        cost_to_go: rows(&lqr.cost_to_go),
        initial_state: x0.to_vec(),
        agent_total_cost: agent_trajectory.total_cost(system),
        lqr_total_cost: lqr_trajectory.total_cost(system),
        agent_trajectory,
        lqr_trajectory,
        value_curve,
        policy_curve,
        training: None,
    })
}

impl ComparisonReport {
    pub fn with_training(mut self, summary: TrainingSummary) -> Self {
        self.training = Some(summary);
        self
    }

    /// Largest gap between agent and LQR actions on the policy curve
    pub fn max_policy_error(&self) -> f64 {
        self.policy_curve
            .iter()
            .map(|p| (p.agent - p.lqr).abs())
            .fold(0.0, f64::max)
    }

    /// How much more the agent's rollout cost than the optimal one
    pub fn cost_ratio(&self) -> f64 {
        if self.lqr_total_cost > 0.0 {
            self.agent_total_cost / self.lqr_total_cost
        } else {
            f64::NAN
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
