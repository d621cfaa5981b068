use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;

use crate::aggregator::Metric;
use crate::error::ValidationError;
use crate::executor::ParallelExecutor;
use crate::identity::StrategyIdentity;
use crate::model::StrategyContext;
use crate::permutation::PermutationExecutor;
use crate::pvalue::PValuePolicy;

/// Computes step-down-adjusted p-values for a family of strategies sorted
/// descending by baseline statistic. Implementations must be stateless
/// between invocations, must not mutate `sorted_strategy_data`, must return
/// exactly one entry per input strategy's combined hash, and are themselves
/// responsible for enforcing `adj_p_i >= adj_p_{i-1}` (monotonicity).
pub trait StepwiseAlgorithm: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        sorted_strategy_data: &[StrategyContext],
        num_permutations: u32,
        permutation_executor: &PermutationExecutor,
        parallel_executor: &dyn ParallelExecutor,
        p_value_policy: &dyn PValuePolicy,
        significance_level: Decimal,
    ) -> Result<HashMap<u64, Decimal>, ValidationError>;
}

fn validate_sorted_descending(sorted: &[StrategyContext]) -> Result<(), ValidationError> {
    if sorted.windows(2).any(|w| w[0].baseline_stat < w[1].baseline_stat) {
        return Err(ValidationError::Precondition(
            "strategy data must be sorted descending by baseline statistic".to_string(),
        ));
    }
    Ok(())
}

/// Re-runs a fresh Monte Carlo draw of `num_permutations` at every step,
/// shrinking the active comparison pool each time a strategy is promoted.
/// Mirrors `MastersRomanoWolf`'s per-step re-shuffle/re-backtest approach.
pub struct SlowStepwise;

impl StepwiseAlgorithm for SlowStepwise {
    fn run(
        &self,
        sorted_strategy_data: &[StrategyContext],
        num_permutations: u32,
        permutation_executor: &PermutationExecutor,
        parallel_executor: &dyn ParallelExecutor,
        p_value_policy: &dyn PValuePolicy,
        significance_level: Decimal,
    ) -> Result<HashMap<u64, Decimal>, ValidationError> {
        validate_sorted_descending(sorted_strategy_data)?;

        let mut active_set: HashSet<u64> = sorted_strategy_data
            .iter()
            .map(|c| StrategyIdentity::combined_hash(&c.strategy))
            .collect();
        let mut pvals = HashMap::new();
        let mut last_adj = Decimal::ZERO;

        for (i, ctx) in sorted_strategy_data.iter().enumerate() {
            let hash = StrategyIdentity::combined_hash(&ctx.strategy);

            if !active_set.contains(&hash) {
                pvals.insert(hash, last_adj);
                continue;
            }

            let active_vec: Vec<_> = sorted_strategy_data
                .iter()
                .filter(|c| active_set.contains(&StrategyIdentity::combined_hash(&c.strategy)))
                .map(|c| c.strategy.clone())
                .collect();

            let exceed = permutation_executor.count_exceedances(
                num_permutations,
                ctx.baseline_stat,
                &active_vec,
                parallel_executor,
            )?;
            let raw_p = p_value_policy.p_value(exceed.saturating_sub(1), num_permutations);
            let adj = raw_p.max(last_adj);
            pvals.insert(hash, adj);

            let rate = exceed as f64 / (num_permutations as f64 + 1.0);
            permutation_executor.observers.notify_metric(
                &ctx.strategy,
                Metric::BaselineStatExceedanceRate,
                Decimal::try_from(rate).unwrap_or(Decimal::ZERO),
            );

            if adj <= significance_level {
                last_adj = adj;
                active_set.remove(&hash);
            } else {
                for remaining in &sorted_strategy_data[i + 1..] {
                    let remaining_hash = StrategyIdentity::combined_hash(&remaining.strategy);
                    pvals.insert(remaining_hash, adj);
                }
                break;
            }
        }

        Ok(pvals)
    }
}

/// Runs a single Monte Carlo sweep over every strategy at once, then folds
/// the per-permutation statistic matrix into exceedance counts with one
/// worst-to-best running-max pass per permutation. Mirrors
/// `MastersRomanoWolfImproved`/`FastMastersPermutationPolicy`.
pub struct FastOneSweep;

impl StepwiseAlgorithm for FastOneSweep {
    fn run(
        &self,
        sorted_strategy_data: &[StrategyContext],
        num_permutations: u32,
        permutation_executor: &PermutationExecutor,
        parallel_executor: &dyn ParallelExecutor,
        p_value_policy: &dyn PValuePolicy,
        significance_level: Decimal,
    ) -> Result<HashMap<u64, Decimal>, ValidationError> {
        validate_sorted_descending(sorted_strategy_data)?;

        if sorted_strategy_data.is_empty() {
            return Ok(HashMap::new());
        }
        if num_permutations == 0 {
            return Err(ValidationError::Precondition(
                "num_permutations must be nonzero".to_string(),
            ));
        }

        let strategies: Vec<_> = sorted_strategy_data.iter().map(|c| c.strategy.clone()).collect();
        let sweep = permutation_executor.sweep_all(num_permutations, &strategies, parallel_executor)?;

        let mut counts: HashMap<u64, u32> = sorted_strategy_data
            .iter()
            .map(|c| (StrategyIdentity::combined_hash(&c.strategy), 1))
            .collect();

        for permuted_stats in &sweep {
            let mut max_so_far = Decimal::MIN;
            let mut counted_hashes: HashSet<u64> = HashSet::new();

            for i in (0..sorted_strategy_data.len()).rev() {
                let stat = permuted_stats[i];
                if stat > max_so_far {
                    max_so_far = stat;
                }

                let hash = StrategyIdentity::combined_hash(&sorted_strategy_data[i].strategy);
                if counted_hashes.contains(&hash) {
                    continue;
                }
                counted_hashes.insert(hash);

                if max_so_far >= sorted_strategy_data[i].baseline_stat {
                    *counts.get_mut(&hash).expect("hash seeded above") += 1;
                }
            }
        }

        let mut pvals = HashMap::new();
        let mut last_adj = Decimal::ZERO;

        for (i, ctx) in sorted_strategy_data.iter().enumerate() {
            let hash = StrategyIdentity::combined_hash(&ctx.strategy);
            let exceed = counts[&hash];
            let raw_p = p_value_policy.p_value(exceed.saturating_sub(1), num_permutations);
            let adj = raw_p.max(last_adj);
            pvals.insert(hash, adj);

            let rate = exceed as f64 / (num_permutations as f64 + 1.0);
            permutation_executor.observers.notify_metric(
                &ctx.strategy,
                Metric::BaselineStatExceedanceRate,
                Decimal::try_from(rate).unwrap_or(Decimal::ZERO),
            );

            if adj <= significance_level {
                last_adj = adj;
            } else {
                for remaining in &sorted_strategy_data[i + 1..] {
                    let remaining_hash = StrategyIdentity::combined_hash(&remaining.strategy);
                    pvals.insert(remaining_hash, adj);
                }
                break;
            }
        }

        Ok(pvals)
    }
}
