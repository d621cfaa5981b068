use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use dashmap::DashMap;
use uuid::Uuid;

use crate::accumulator::Accumulator;
use crate::identity::StrategyIdentity;
use crate::model::Strategy;

/// The metrics collected per strategy over the course of a permutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    PermutedTestStatistic,
    NumTrades,
    NumBarsInTrades,
    BaselineStatExceedanceRate,
}

struct StrategyBucket {
    accumulators: RwLock<HashMap<Metric, Mutex<Accumulator>>>,
    last_uuid: RwLock<Uuid>,
    pattern_hash: u64,
}

impl StrategyBucket {
    fn new(strategy: &Strategy) -> Self {
        Self {
            accumulators: RwLock::new(HashMap::new()),
            last_uuid: RwLock::new(strategy.instance_id()),
            pattern_hash: strategy.pattern_hash(),
        }
    }
}

/// Thread-safe statistics store keyed by `combined_hash`. Side tables
/// (instance uuid, pattern hash) exist purely for diagnostics — they are
/// never read back as lookup keys, only combined_hash is (I1/I4).
///
/// All mutation goes through an exclusive lock on the bucket's accumulator
/// map. An earlier design that took a shared (read) lock for writes here
/// produced silent data loss under concurrent access; every write site below
/// takes `.write()`, never `.read()`.
#[derive(Default)]
pub struct StatsAggregator {
    buckets: DashMap<u64, StrategyBucket>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    pub fn add(&self, strategy: &Strategy, metric: Metric, value: f64) {
        let hash = StrategyIdentity::combined_hash(strategy);
        let bucket = self
            .buckets
            .entry(hash)
            .or_insert_with(|| StrategyBucket::new(strategy));
        *bucket.last_uuid.write().unwrap() = strategy.instance_id();

        let accs = bucket.accumulators.write().unwrap();
        if let Some(acc) = accs.get(&metric) {
            acc.lock().unwrap().add(value);
            return;
        }
        drop(accs);
        let mut accs_mut = bucket.accumulators.write().unwrap();
        accs_mut
            .entry(metric)
            .or_insert_with(|| Mutex::new(Accumulator::new()))
            .lock()
            .unwrap()
            .add(value);
    }

    fn with_accumulator<R>(&self, strategy: &Strategy, metric: Metric, f: impl FnOnce(&Accumulator) -> R) -> Option<R> {
        let hash = StrategyIdentity::combined_hash(strategy);
        let bucket = self.buckets.get(&hash)?;
        let accs = bucket.accumulators.read().unwrap();
        let acc = accs.get(&metric)?;
        Some(f(&acc.lock().unwrap()))
    }

    pub fn min(&self, strategy: &Strategy, metric: Metric) -> Option<f64> {
        self.with_accumulator(strategy, metric, |a| a.min()).flatten()
    }

    pub fn max(&self, strategy: &Strategy, metric: Metric) -> Option<f64> {
        self.with_accumulator(strategy, metric, |a| a.max()).flatten()
    }

    pub fn median(&self, strategy: &Strategy, metric: Metric) -> Option<f64> {
        self.with_accumulator(strategy, metric, |a| a.median()).flatten()
    }

    pub fn std_dev(&self, strategy: &Strategy, metric: Metric) -> Option<f64> {
        self.with_accumulator(strategy, metric, |a| a.std_dev()).flatten()
    }

    pub fn count(&self, strategy: &Strategy, metric: Metric) -> u64 {
        self.with_accumulator(strategy, metric, |a| a.count()).unwrap_or(0)
    }

    pub fn strategy_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn strategy_uuid(&self, strategy: &Strategy) -> Option<Uuid> {
        let hash = StrategyIdentity::combined_hash(strategy);
        self.buckets.get(&hash).map(|b| *b.last_uuid.read().unwrap())
    }

    pub fn pattern_hash_of(&self, strategy: &Strategy) -> Option<u64> {
        let hash = StrategyIdentity::combined_hash(strategy);
        self.buckets.get(&hash).map(|b| b.pattern_hash)
    }

    /// Diagnostic-only: combined hashes of every strategy sharing a pattern
    /// hash, regardless of name. Never used as a lookup key elsewhere.
    pub fn strategies_with_pattern(&self, pattern_hash: u64) -> Vec<u64> {
        self.buckets
            .iter()
            .filter(|entry| entry.value().pattern_hash == pattern_hash)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Resets every bucket and its side tables. Must run before every
    /// `ValidationOrchestrator` run — a partial clear would leave stale side
    /// tables referencing accumulators with no data.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, PatternTree};
    use rust_decimal::Decimal;
    use std::sync::Arc;

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
    fn add_and_read_back_metric() {
        let agg = StatsAggregator::new();
        let strat = strategy("alpha");
        agg.add(&strat, Metric::PermutedTestStatistic, 1.0);
        agg.add(&strat, Metric::PermutedTestStatistic, 2.0);
        assert_eq!(agg.count(&strat, Metric::PermutedTestStatistic), 2);
        assert_eq!(agg.min(&strat, Metric::PermutedTestStatistic), Some(1.0));
        assert_eq!(agg.max(&strat, Metric::PermutedTestStatistic), Some(2.0));
    }

    #[test]
    fn clones_of_same_strategy_share_a_bucket() {
        let agg = StatsAggregator::new();
        let strat = strategy("alpha");
        let clone = strat.clone_onto(&crate::model::Portfolio::empty());
        agg.add(&strat, Metric::NumTrades, 3.0);
        agg.add(&clone, Metric::NumTrades, 5.0);
        assert_eq!(agg.count(&strat, Metric::NumTrades), 2);
        assert_eq!(agg.strategy_count(), 1);
    }

    #[test]
    fn different_names_same_pattern_do_not_collide() {
        let agg = StatsAggregator::new();
        let a = strategy("alpha");
        let b = strategy("beta");
        agg.add(&a, Metric::NumTrades, 1.0);
        agg.add(&b, Metric::NumTrades, 2.0);
        assert_eq!(agg.strategy_count(), 2);
        let shared = agg.strategies_with_pattern(a.pattern_hash());
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn clear_drops_buckets_and_side_tables() {
        let agg = StatsAggregator::new();
        let strat = strategy("alpha");
        agg.add(&strat, Metric::NumTrades, 1.0);
        agg.clear();
        assert_eq!(agg.strategy_count(), 0);
        assert_eq!(agg.count(&strat, Metric::NumTrades), 0);
    }
}
