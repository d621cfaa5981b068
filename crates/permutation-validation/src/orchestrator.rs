use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::aggregator::StatsAggregator;
use crate::algorithms::StepwiseAlgorithm;
use crate::backtester::Backtester;
use crate::error::ValidationError;
use crate::executor::ParallelExecutor;
use crate::identity::StrategyIdentity;
use crate::model::{Portfolio, Security, Strategy, StrategyContext};
use crate::observer::{AggregatingObserver, ObserverHub, PermutationObserver};
use crate::permutation::PermutationExecutor;
use crate::pvalue::PValuePolicy;
use crate::statistic::PermutationStatistic;
use crate::synthetic::SyntheticSeriesBuilder;

/// Read-only projection of a completed run, for `tracing`/CLI consumption.
/// Adds no algorithmic behavior of its own.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub tested: usize,
    pub surviving: usize,
    pub defaulted_to_one: usize,
    pub min_adjusted_p_value: Option<Decimal>,
    pub median_adjusted_p_value: Option<Decimal>,
}

/// Ties together baseline preparation, family/direction partitioning, and
/// the chosen stepwise algorithm into one validation run, the way
/// `PALMastersMonteCarloValidation` orchestrates `MastersRomanoWolf`/
/// `MastersRomanoWolfImproved` underneath a single entry point.
pub struct ValidationOrchestrator<'a> {
    algorithm: &'a dyn StepwiseAlgorithm,
    p_value_policy: &'a dyn PValuePolicy,
    parallel_executor: &'a dyn ParallelExecutor,
    synthetic_builder: &'a dyn SyntheticSeriesBuilder,
    statistic: &'a dyn PermutationStatistic,
    template_backtester: &'a dyn Backtester,
    observers: ObserverHub,
    aggregator: Arc<StatsAggregator>,
    num_permutations: u32,
    base_seed: u64,
}

impl<'a> ValidationOrchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        algorithm: &'a dyn StepwiseAlgorithm,
        p_value_policy: &'a dyn PValuePolicy,
        parallel_executor: &'a dyn ParallelExecutor,
        synthetic_builder: &'a dyn SyntheticSeriesBuilder,
        statistic: &'a dyn PermutationStatistic,
        template_backtester: &'a dyn Backtester,
        num_permutations: u32,
        base_seed: u64,
    ) -> Result<Self, ValidationError> {
        if num_permutations == 0 {
            return Err(ValidationError::Precondition(
                "num_permutations must be nonzero".to_string(),
            ));
        }

        let aggregator = Arc::new(StatsAggregator::new());
        let observers = ObserverHub::new();
        observers.attach(Arc::new(AggregatingObserver::new(aggregator.clone())));

        Ok(Self {
            algorithm,
            p_value_policy,
            parallel_executor,
            synthetic_builder,
            statistic,
            template_backtester,
            observers,
            aggregator,
            num_permutations,
            base_seed,
        })
    }

    pub fn attach_observer(&self, observer: Arc<dyn PermutationObserver>) {
        self.observers.attach(observer);
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    /// Runs baseline preparation, partitioning, and the stepwise algorithm
    /// for every partition, merging results into one p-value per strategy.
    /// Strategies with no p-value in the merged map (should not happen for
    /// a correct algorithm, but defended against here as the original does)
    /// default to 1.0 with a warning.
    pub fn run(
        &self,
        base_security: &Security,
        strategies: &[Strategy],
        significance_level: Decimal,
        partition_by_family: bool,
    ) -> Result<HashMap<u64, Decimal>, ValidationError> {
        if strategies.is_empty() {
            return Err(ValidationError::Precondition(
                "no strategies provided".to_string(),
            ));
        }

        self.aggregator.clear();
        info!(
            num_strategies = strategies.len(),
            partition_by_family, "starting permutation validation run"
        );

        let portfolio = Portfolio::with_security(base_security.clone());
        let mut contexts = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let cloned = strategy.clone_onto(&portfolio);
            let mut bt = self.template_backtester.clone_box();
            bt.set_single_strategy(cloned);
            bt.backtest()?;
            let outcome = bt.as_ref().outcome().ok_or_else(|| {
                ValidationError::Executor("baseline backtest produced no outcome".to_string())
            })?;
            let baseline_stat = if outcome.num_trades_including_open >= self.statistic.min_trades() {
                self.statistic.extract(&outcome)
            } else {
                Decimal::MIN
            };
            contexts.push(StrategyContext {
                strategy: strategy.clone(),
                baseline_stat,
            });
        }

        let permutation_executor = PermutationExecutor {
            synthetic_builder: self.synthetic_builder,
            statistic: self.statistic,
            template_backtester: self.template_backtester,
            base_security,
            observers: &self.observers,
            base_seed: self.base_seed,
        };

        let partitions = if partition_by_family {
            partition_by_pattern(contexts)
        } else {
            partition_by_direction(contexts)
        };

        let mut merged = HashMap::new();
        for (label, mut family) in partitions {
            family.sort_by(|a, b| b.baseline_stat.cmp(&a.baseline_stat));
            info!(partition = %label, count = family.len(), "running stepwise algorithm for partition");
            let result = self.algorithm.run(
                &family,
                self.num_permutations,
                &permutation_executor,
                self.parallel_executor,
                self.p_value_policy,
                significance_level,
            )?;
            merged.extend(result);
        }

        let mut final_pvals = HashMap::new();
        for strategy in strategies {
            let hash = StrategyIdentity::combined_hash(strategy);
            let pval = merged.get(&hash).copied().unwrap_or_else(|| {
                warn!(combined_hash = hash, "no p-value computed for strategy, defaulting to 1.0");
                Decimal::ONE
            });
            final_pvals.insert(hash, pval);
        }

        Ok(final_pvals)
    }

    pub fn summary(
        &self,
        strategies: &[Strategy],
        pvals: &HashMap<u64, Decimal>,
        significance_level: Decimal,
    ) -> ValidationSummary {
        let tested = strategies.len();
        let surviving = strategies
            .iter()
            .filter(|s| {
                pvals
                    .get(&StrategyIdentity::combined_hash(s))
                    .map(|p| *p <= significance_level)
                    .unwrap_or(false)
            })
            .count();
        let defaulted_to_one = strategies
            .iter()
            .filter(|s| !pvals.contains_key(&StrategyIdentity::combined_hash(s)))
            .count();
        let mut values: Vec<Decimal> = strategies
            .iter()
            .filter_map(|s| pvals.get(&StrategyIdentity::combined_hash(s)).copied())
            .collect();
        values.sort();

        ValidationSummary {
            tested,
            surviving,
            defaulted_to_one,
            min_adjusted_p_value: values.first().copied(),
            median_adjusted_p_value: median_of_sorted(&values),
        }
    }
}

fn median_of_sorted(sorted: &[Decimal]) -> Option<Decimal> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    Some(if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::from(2)
    })
}

fn partition_by_direction(contexts: Vec<StrategyContext>) -> Vec<(String, Vec<StrategyContext>)> {
    let mut long = Vec::new();
    let mut short = Vec::new();
    for ctx in contexts {
        match ctx.strategy.direction() {
            crate::model::Direction::Long => long.push(ctx),
            crate::model::Direction::Short => short.push(ctx),
        }
    }
    let mut partitions = Vec::new();
    if !long.is_empty() {
        partitions.push(("long".to_string(), long));
    }
    if !short.is_empty() {
        partitions.push(("short".to_string(), short));
    }
    partitions
}

fn partition_by_pattern(contexts: Vec<StrategyContext>) -> Vec<(String, Vec<StrategyContext>)> {
    let mut families: HashMap<u64, Vec<StrategyContext>> = HashMap::new();
    for ctx in contexts {
        families
            .entry(ctx.strategy.pattern_hash())
            .or_default()
            .push(ctx);
    }
    families
        .into_iter()
        .map(|(pattern_hash, family)| (format!("pattern-{pattern_hash:x}"), family))
        .collect()
}
