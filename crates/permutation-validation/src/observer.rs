use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;

use crate::aggregator::{Metric, StatsAggregator};
use crate::model::Strategy;
use crate::outcome::BacktestOutcome;

/// Telemetry sink for permutation draws. Implementations must not block or
/// re-enter the hub that is calling them (`ObserverHub::notify*` holds a
/// read lock across the callback).
pub trait PermutationObserver: Send + Sync {
    fn update(&self, outcome: &BacktestOutcome, statistic: Decimal);
    fn update_metric(&self, strategy: &Strategy, metric: Metric, value: Decimal);
}

/// Subject half of the observer/subject pair. Attach/detach take the
/// exclusive lock; notification takes the shared lock so concurrent
/// permutation workers can all notify without serializing on each other.
#[derive(Default)]
pub struct ObserverHub {
    observers: RwLock<Vec<Arc<dyn PermutationObserver>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, observer: Arc<dyn PermutationObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub fn detach(&self, observer: &Arc<dyn PermutationObserver>) {
        self.observers
            .write()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn notify(&self, outcome: &BacktestOutcome, statistic: Decimal) {
        for obs in self.observers.read().unwrap().iter() {
            obs.update(outcome, statistic);
        }
    }

    pub fn notify_metric(&self, strategy: &Strategy, metric: Metric, value: Decimal) {
        for obs in self.observers.read().unwrap().iter() {
            obs.update_metric(strategy, metric, value);
        }
    }
}

/// Routes subject notifications into a `StatsAggregator`, mirroring the
/// permuted-statistic/num-trades/num-bars-in-trades triple the original
/// collector stores per observed backtest.
pub struct AggregatingObserver {
    aggregator: Arc<StatsAggregator>,
}

impl AggregatingObserver {
    pub fn new(aggregator: Arc<StatsAggregator>) -> Self {
        Self { aggregator }
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }
}

impl PermutationObserver for AggregatingObserver {
    fn update(&self, outcome: &BacktestOutcome, statistic: Decimal) {
        use rust_decimal::prelude::ToPrimitive;
        self.aggregator.add(
            &outcome.strategy,
            Metric::PermutedTestStatistic,
            statistic.to_f64().unwrap_or(0.0),
        );
        self.aggregator.add(
            &outcome.strategy,
            Metric::NumTrades,
            outcome.num_trades_including_open as f64,
        );
        self.aggregator.add(
            &outcome.strategy,
            Metric::NumBarsInTrades,
            outcome.num_bars_in_trades_including_open as f64,
        );
    }

    fn update_metric(&self, strategy: &Strategy, metric: Metric, value: Decimal) {
        use rust_decimal::prelude::ToPrimitive;
        self.aggregator.add(strategy, metric, value.to_f64().unwrap_or(0.0));
    }
}
