//! PPO training on the LQR plant
//!
//! Trains a PPO agent, then compares its greedy policy and value estimates
//! with the optimal Riccati controller and writes the comparison as JSON.

use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use ndarray::Array1;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lqr_policy_gradients::{
    algorithms::{Agent, PPO},
    control::dlqr,
    environments::Environment,
    evaluation::compare_with_lqr,
    training::{PpoTrainingConfig, Trainer},
    utils::seeded_rng,
};

type Backend = Autodiff<NdArray>;

#[derive(Parser, Debug)]
#[command(about = "Train PPO on a discrete-time LQR problem")]
struct Args {
    /// JSON experiment config; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    episodes: Option<usize>,
    /// Where the comparison report is written
    #[arg(long, default_value = "ppo_report.json")]
    report: PathBuf,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// First coordinate of the evaluation start state
    #[arg(long, default_value_t = 1.0)]
    x0: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PpoTrainingConfig::from_file(path)?,
        None => PpoTrainingConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(episodes) = args.episodes {
        config.episodes = episodes;
    }
    if args.checkpoint_dir.is_some() {
        config.checkpoint_dir = args.checkpoint_dir.clone();
    }
    info!("configuration: {:?}", config);

    let system = config.system.to_system()?;
    let lqr = dlqr(&system)?;
    info!(
        "LQR gain {}, cost-to-go {}, closed-loop eigenvalues {:?}",
        lqr.gain,
        lqr.cost_to_go,
        lqr.closed_loop_eigenvalues
    );

    let env = config.environment()?;
    let device = Default::default();
    let mut rng = seeded_rng(config.seeds().network);
    let agent = PPO::<Backend>::new(
        env.observation_size(),
        env.action_size(),
        config.agent.clone(),
        &mut rng,
        &device,
    )?;

    let mut trainer = Trainer::new(agent, env, config.trainer_config()?)?;
    let summary = trainer.train()?;
    let agent = trainer.into_agent();

    let mut x0 = Array1::zeros(system.state_dim());
    x0[0] = args.x0;
    let settings = config.comparison_settings();
    let report = compare_with_lqr(&agent, &system, &lqr, &x0, &settings)?.with_training(summary);
    info!(
        "total cost over {} steps: PPO {:.4}, LQR {:.4} (ratio {:.3}), max policy error {:.4}",
        settings.horizon,
        report.agent_total_cost,
        report.lqr_total_cost,
        report.cost_ratio(),
        report.max_policy_error()
    );

    report.write_json(&args.report)?;
    info!("report written to {}", args.report.display());

    if let Some(dir) = &config.checkpoint_dir {
        agent.save(dir)?;
        info!("checkpoint saved to {}", dir.display());
    }

    Ok(())
}
