use std::sync::atomic::{AtomicU32, Ordering};

use rust_decimal::Decimal;

use crate::backtester::Backtester;
use crate::error::ValidationError;
use crate::executor::ParallelExecutor;
use crate::model::{Portfolio, Security, Strategy};
use crate::observer::ObserverHub;
use crate::statistic::PermutationStatistic;
use crate::synthetic::SyntheticSeriesBuilder;

/// The per-permutation procedure shared by both stepwise algorithms: build
/// one synthetic series, swap it into a fresh portfolio, clone and run each
/// strategy against it, gate its statistic on the minimum trade count, and
/// notify observers either way.
pub struct PermutationExecutor<'a> {
    pub synthetic_builder: &'a dyn SyntheticSeriesBuilder,
    pub statistic: &'a dyn PermutationStatistic,
    pub template_backtester: &'a dyn Backtester,
    pub base_security: &'a Security,
    pub observers: &'a ObserverHub,
    pub base_seed: u64,
}

impl<'a> PermutationExecutor<'a> {
    /// Runs one permutation draw and returns each strategy's gated statistic
    /// in the same order as `strategies`. Strategies whose backtest falls
    /// short of `statistic.min_trades()` get `Decimal::MIN`, the sentinel
    /// that never wins a running max.
    fn run_permutation_over(
        &self,
        permutation_index: u32,
        strategies: &[Strategy],
    ) -> Result<Vec<Decimal>, ValidationError> {
        let synthetic_security =
            self.synthetic_builder
                .build(self.base_security, self.base_seed, permutation_index as u64)?;
        let mut portfolio = Portfolio::empty();
        portfolio.replace_security(synthetic_security);

        let mut stats = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let cloned_strategy = strategy.clone_onto(&portfolio);
            let mut bt = self.template_backtester.clone_box();
            bt.set_single_strategy(cloned_strategy);
            bt.backtest()?;

            let outcome = bt.as_ref().outcome().ok_or_else(|| {
                ValidationError::Executor("backtester produced no outcome after backtest".to_string())
            })?;

            let (ordering_stat, reported_stat) =
                if outcome.num_trades_including_open >= self.statistic.min_trades() {
                    let value = self.statistic.extract(&outcome);
                    (value, value)
                } else {
                    (Decimal::MIN, self.statistic.min_trade_failure_value())
                };
            self.observers.notify(&outcome, reported_stat);
            stats.push(ordering_stat);
        }
        Ok(stats)
    }

    /// Counts permutations whose max statistic across `active_strategies`
    /// meets or exceeds `baseline_stat`, starting the count at 1 for the
    /// unpermuted draw. An empty active set is a no-op that returns an
    /// exceedance count of 1 without running any backtest (S3).
    pub fn count_exceedances(
        &self,
        num_permutations: u32,
        baseline_stat: Decimal,
        active_strategies: &[Strategy],
        executor: &dyn ParallelExecutor,
    ) -> Result<u32, ValidationError> {
        if active_strategies.is_empty() {
            tracing::warn!("count_exceedances called with no active strategies; returning exceedance count of 1");
            return Ok(1);
        }
        if num_permutations == 0 {
            return Err(ValidationError::Precondition(
                "num_permutations must be nonzero".to_string(),
            ));
        }

        let count = AtomicU32::new(1);
        executor.parallel_for(num_permutations, &|p| {
            match self.run_permutation_over(p, active_strategies) {
                Ok(stats) => {
                    let max_stat = stats.into_iter().max().unwrap_or(Decimal::MIN);
                    if max_stat >= baseline_stat {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "permutation draw failed, excluded from count");
                }
            }
        });
        Ok(count.load(Ordering::SeqCst))
    }

    /// Runs every permutation over every strategy in `all_strategies` (not
    /// just an active subset), returning a per-strategy statistic matrix of
    /// shape `[num_permutations][all_strategies.len()]`, in strategy order.
    /// Used by the fast one-sweep algorithm's bulk phase.
    pub fn sweep_all(
        &self,
        num_permutations: u32,
        all_strategies: &[Strategy],
        executor: &dyn ParallelExecutor,
    ) -> Result<Vec<Vec<Decimal>>, ValidationError> {
        if all_strategies.is_empty() {
            return Ok(Vec::new());
        }
        if num_permutations == 0 {
            return Err(ValidationError::Precondition(
                "num_permutations must be nonzero".to_string(),
            ));
        }

        let rows: Vec<std::sync::Mutex<Option<Vec<Decimal>>>> =
            (0..num_permutations).map(|_| std::sync::Mutex::new(None)).collect();

        executor.parallel_for(num_permutations, &|p| {
            match self.run_permutation_over(p, all_strategies) {
                Ok(stats) => {
                    *rows[p as usize].lock().unwrap() = Some(stats);
                }
                Err(error) => {
                    tracing::warn!(%error, "permutation sweep draw failed, treated as all-uninformative");
                    *rows[p as usize].lock().unwrap() =
                        Some(vec![Decimal::MIN; all_strategies.len()]);
                }
            }
        });

        Ok(rows
            .into_iter()
            .map(|row| row.into_inner().unwrap().unwrap_or_default())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Metric;
    use crate::backtester::testing::ConstantBacktester;
    use crate::executor::SingleThreadExecutor;
    use crate::model::{Direction, HistoricalBar, PatternTree};
    use crate::observer::PermutationObserver;
    use crate::outcome::BacktestOutcome;
    use crate::statistic::ConstantStatistic;
    use crate::synthetic::N1MaxDestruction;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingObserver {
        reported: std::sync::Mutex<Vec<Decimal>>,
        calls: AtomicUsize,
    }

    impl PermutationObserver for RecordingObserver {
        fn update(&self, _outcome: &BacktestOutcome, statistic: Decimal) {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.reported.lock().unwrap().push(statistic);
        }
        fn update_metric(&self, _strategy: &Strategy, _metric: Metric, _value: Decimal) {}
    }

    fn security() -> Security {
        let mut bars = Vec::new();
        let mut price = Decimal::new(100, 0);
        for day in 1..=6u32 {
            let close = price + Decimal::new(1, 0);
            bars.push(HistoricalBar {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                open: price,
                high: close + Decimal::ONE,
                low: price - Decimal::ONE,
                close,
            });
            price = close;
        }
        Security::new("SPY", bars).unwrap()
    }

    fn strategy(name: &str) -> Strategy {
        let pattern = Arc::new(PatternTree::new(
            Decimal::new(2, 0),
            Decimal::new(1, 0),
            Direction::Long,
            5,
            None,
            None,
        ));
        Strategy::new(pattern, name, Direction::Long)
    }

    #[test]
    fn empty_active_set_returns_one_without_running_backtests() {
        let sec = security();
        let builder = N1MaxDestruction;
        let stat = ConstantStatistic::new(Decimal::new(5, 1));
        let bt = ConstantBacktester::new(10);
        let observers = ObserverHub::new();
        let exec = PermutationExecutor {
            synthetic_builder: &builder,
            statistic: &stat,
            template_backtester: &bt,
            base_security: &sec,
            observers: &observers,
            base_seed: 1,
        };
        let count = exec
            .count_exceedances(100, Decimal::ONE, &[], &SingleThreadExecutor)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn constant_statistic_above_baseline_counts_every_permutation() {
        let sec = security();
        let builder = N1MaxDestruction;
        let stat = ConstantStatistic::new(Decimal::new(5, 1));
        let bt = ConstantBacktester::new(10);
        let observers = ObserverHub::new();
        let exec = PermutationExecutor {
            synthetic_builder: &builder,
            statistic: &stat,
            template_backtester: &bt,
            base_security: &sec,
            observers: &observers,
            base_seed: 1,
        };
        let strategies = vec![strategy("alpha")];
        let count = exec
            .count_exceedances(50, Decimal::new(4, 1), &strategies, &SingleThreadExecutor)
            .unwrap();
        assert_eq!(count, 51);
    }

    #[test]
    fn constant_statistic_below_baseline_only_counts_seed_draw() {
        let sec = security();
        let builder = N1MaxDestruction;
        let stat = ConstantStatistic::new(Decimal::new(5, 1));
        let bt = ConstantBacktester::new(10);
        let observers = ObserverHub::new();
        let exec = PermutationExecutor {
            synthetic_builder: &builder,
            statistic: &stat,
            template_backtester: &bt,
            base_security: &sec,
            observers: &observers,
            base_seed: 1,
        };
        let strategies = vec![strategy("alpha")];
        let count = exec
            .count_exceedances(50, Decimal::new(6, 1), &strategies, &SingleThreadExecutor)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn failed_min_trades_reports_the_policy_failure_value_but_never_wins_ordering() {
        let sec = security();
        let builder = N1MaxDestruction;
        // trade_count (2) stays below min_trades (5) on every draw.
        let stat = ConstantStatistic::with_min_trades(Decimal::new(9, 1), 5);
        let bt = ConstantBacktester::new(2);
        let observers = ObserverHub::new();
        let recorder = Arc::new(RecordingObserver::default());
        observers.attach(recorder.clone());
        let exec = PermutationExecutor {
            synthetic_builder: &builder,
            statistic: &stat,
            template_backtester: &bt,
            base_security: &sec,
            observers: &observers,
            base_seed: 1,
        };
        let strategies = vec![strategy("alpha")];
        // baseline_stat set far below the sentinel so a bug that let
        // Decimal::MIN win would be caught immediately.
        let count = exec
            .count_exceedances(10, Decimal::new(-1000, 0), &strategies, &SingleThreadExecutor)
            .unwrap();
        assert_eq!(count, 1, "Decimal::MIN must never exceed any real baseline");
        assert_eq!(recorder.calls.load(AtomicOrdering::SeqCst), 10);
        for reported in recorder.reported.lock().unwrap().iter() {
            assert_eq!(*reported, stat.min_trade_failure_value());
        }
    }

    #[test]
    fn sweep_all_returns_one_row_per_permutation() {
        let sec = security();
        let builder = N1MaxDestruction;
        let stat = ConstantStatistic::new(Decimal::new(5, 1));
        let bt = ConstantBacktester::new(10);
        let observers = ObserverHub::new();
        let exec = PermutationExecutor {
            synthetic_builder: &builder,
            statistic: &stat,
            template_backtester: &bt,
            base_security: &sec,
            observers: &observers,
            base_seed: 1,
        };
        let strategies = vec![strategy("alpha"), strategy("beta")];
        let rows = exec.sweep_all(10, &strategies, &SingleThreadExecutor).unwrap();
        assert_eq!(rows.len(), 10);
        for row in &rows {
            assert_eq!(row.len(), 2);
        }
    }
}
