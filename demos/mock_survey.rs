//! Samples the cosmology of a simulated survey and writes the chains as CSV.
//!
//! ```text
//! RUST_LOG=info cargo run --release --example mock_survey -- [output_dir]
//! ```

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sn_hyper::simulate::MockSurvey;
use sn_hyper::{
    cosmology_reweighter, CosmologyConfig, CsvCheckpoint, Driver, DriverSettings, FlatLambdaCdm,
    GridAxis, GridSpace, RayonEvaluator,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "mock_survey_chains".to_string());

    let grid = GridSpace::new(
        GridAxis::linspace(0.05, 0.65, 12)?,
        GridAxis::linspace(37., 44., 28)?,
    );
    let distance = FlatLambdaCdm::default();
    let survey = MockSurvey::default().with_objects(200).with_truth(vec![68., 0.31]);
    let mock = survey
        .generate(&grid, &distance, &mut ChaCha8Rng::seed_from_u64(17))
        .context("Could not simulate the survey")?;

    let reweighter = cosmology_reweighter(&mock.catalog, &CosmologyConfig::default(), distance)?;
    let evaluator = RayonEvaluator::new(
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    )?;
    let sink = CsvCheckpoint::new(&output_dir)?;
    let settings = DriverSettings::default()
        .with_walkers(16)
        .with_steps(50, 500)
        .with_seed(17);

    let mut driver = Driver::new(&reweighter, &evaluator, sink, settings)?;
    let output = driver.run()?;

    let mean = output.posterior_mean();
    let std = output.posterior_std();
    println!(
        "burn-in epochs: {} (converged: {})",
        output.burn_in_epochs(),
        output.converged
    );
    for (i, name) in output.param_names.iter().enumerate() {
        println!(
            "{:>4} = {:.3} ± {:.3} (truth {})",
            name, mean[i], std[i], survey.true_params[i]
        );
    }
    println!("mean acceptance: {:.3}", output.mean_acceptance());
    println!("chains written to {}", output_dir);
    Ok(())
}
