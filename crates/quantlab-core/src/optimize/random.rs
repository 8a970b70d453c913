//! Seeded random search with dedup and early stopping.

use super::{
    param_hash, rank_trials, OptimizationConfig, OptimizationMethod, OptimizationRunResult,
    Optimizer, ParamSet,
};
use crate::error::Result;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashSet;

/// Evaluation batch size: samples are drawn up front (deterministic
/// sequence), evaluated in parallel batches, and the early-stopping scan
/// walks the sample order so results are reproducible.
const BATCH: usize = 8;

/// Randomly sample `iterations` distinct points from the space and
/// evaluate them, stopping early after the configured number of
/// consecutive non-improving samples.
pub fn random_search(
    optimizer: &Optimizer<'_>,
    config: &OptimizationConfig,
) -> Result<OptimizationRunResult> {
    config.validate()?;

    let points = sample_points(config);
    tracing::info!(
        requested = config.iterations,
        sampled = points.len(),
        seed = config.seed,
        "starting random search"
    );

    let mut trials = Vec::with_capacity(points.len());
    let mut best = config.direction.worst();
    let mut non_improving = 0usize;
    let mut stopped_early = false;

    for batch in points.chunks(BATCH) {
        let evaluated: Vec<_> = batch
            .par_iter()
            .map(|params| optimizer.evaluate(params.clone(), config.objective, config.direction))
            .collect();
        for trial in evaluated {
            let improved = trial.valid && config.direction.improves(trial.objective_value, best);
            if improved {
                best = trial.objective_value;
                non_improving = 0;
            } else {
                non_improving += 1;
            }
            trials.push(trial);
            if let Some(rounds) = config.early_stopping_rounds {
                if non_improving >= rounds {
                    stopped_early = true;
                    break;
                }
            }
        }
        if stopped_early {
            break;
        }
    }

    tracing::info!(
        evaluated = trials.len(),
        stopped_early,
        "random search complete"
    );
    let evaluated = trials.len();
    rank_trials(&mut trials, config.direction);
    Ok(OptimizationRunResult {
        method: OptimizationMethod::Random,
        objective: config.objective,
        direction: config.direction,
        trials,
        evaluated,
    })
}

/// Draw up to `iterations` distinct parameter points. Duplicates (by
/// canonical hash) are redrawn, bounded so small lattices terminate.
fn sample_points(config: &OptimizationConfig) -> Vec<ParamSet> {
    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut seen = HashSet::new();
    let mut points = Vec::with_capacity(config.iterations);
    let max_attempts = config.iterations.saturating_mul(20).max(64);
    let mut attempts = 0;
    while points.len() < config.iterations && attempts < max_attempts {
        attempts += 1;
        let params: ParamSet = config
            .space
            .iter()
            .map(|(name, range)| (name.clone(), range.sample(&mut rng)))
            .collect();
        if seen.insert(param_hash(&params)) {
            points.push(params);
        }
    }
    points
}
