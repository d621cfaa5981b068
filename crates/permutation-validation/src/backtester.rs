use crate::error::ValidationError;
use crate::model::Strategy;
use crate::outcome::{BacktestOutcome, ClosedTrade};

/// The external backtesting engine, as seen by this crate: an opaque
/// collaborator that can be cloned, given exactly one strategy, run once,
/// and queried for counts and closed-trade history. A real implementation
/// lives outside this crate; only the contract and a test double live here.
pub trait Backtester: Send + Sync {
    fn clone_box(&self) -> Box<dyn Backtester>;
    fn set_single_strategy(&mut self, strategy: Strategy);
    fn backtest(&mut self) -> Result<(), ValidationError>;
    fn strategy(&self) -> Option<&Strategy>;
    fn num_trades_including_open(&self) -> u32;
    fn num_bars_in_trades_including_open(&self) -> u32;
    fn closed_trades(&self) -> &[ClosedTrade];
}

impl dyn Backtester {
    /// Packages a completed run's counts and trade history together with
    /// the attached strategy's identity, for observers and statistic
    /// policies. `None` if no strategy was ever attached.
    pub fn outcome(&self) -> Option<BacktestOutcome> {
        let strategy = self.strategy()?.clone();
        Some(BacktestOutcome {
            strategy,
            num_trades_including_open: self.num_trades_including_open(),
            num_bars_in_trades_including_open: self.num_bars_in_trades_including_open(),
            closed_trades: self.closed_trades().to_vec(),
        })
    }
}

/// Test-only backtester implementations, analogous to the original's
/// `DummyBackTester` stub: enough behavior to exercise the permutation
/// scheduler and stepwise algorithms without a real backtesting engine.
pub mod testing {
    use super::*;
    use crate::model::Direction;

    /// Applies a fixed one-bar-per-trade rule to whatever security is bound
    /// to the attached strategy: long strategies take the bar's
    /// open-to-close move as pnl, short strategies take its negation. This
    /// gives tests of the synthetic series pipeline a statistic that
    /// actually varies across permutations.
    #[derive(Clone, Default)]
    pub struct RuleBasedMockBacktester {
        strategy: Option<Strategy>,
        closed_trades: Vec<ClosedTrade>,
    }

    impl RuleBasedMockBacktester {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Backtester for RuleBasedMockBacktester {
        fn clone_box(&self) -> Box<dyn Backtester> {
            Box::new(self.clone())
        }

        fn set_single_strategy(&mut self, strategy: Strategy) {
            self.strategy = Some(strategy);
            self.closed_trades.clear();
        }

        fn backtest(&mut self) -> Result<(), ValidationError> {
            let strategy = self
                .strategy
                .as_ref()
                .ok_or_else(|| ValidationError::Precondition("no strategy attached".to_string()))?;
            let security = strategy.bound_security().ok_or_else(|| {
                ValidationError::Precondition("strategy has no bound security".to_string())
            })?;

            let trades = security
                .bars()
                .iter()
                .map(|bar| {
                    let move_ = bar.close - bar.open;
                    let pnl = match strategy.direction() {
                        Direction::Long => move_,
                        Direction::Short => -move_,
                    };
                    ClosedTrade { pnl }
                })
                .collect();
            self.closed_trades = trades;
            Ok(())
        }

        fn strategy(&self) -> Option<&Strategy> {
            self.strategy.as_ref()
        }

        fn num_trades_including_open(&self) -> u32 {
            self.closed_trades.len() as u32
        }

        fn num_bars_in_trades_including_open(&self) -> u32 {
            self.closed_trades.len() as u32
        }

        fn closed_trades(&self) -> &[ClosedTrade] {
            &self.closed_trades
        }
    }

    /// Reports a fixed trade/bar count and never inspects the bound
    /// security. Pairs with `ConstantStatistic`, which ignores the outcome,
    /// in tests that only exercise the stepwise algorithms' control flow.
    #[derive(Clone)]
    pub struct ConstantBacktester {
        strategy: Option<Strategy>,
        trade_count: u32,
    }

    impl ConstantBacktester {
        pub fn new(trade_count: u32) -> Self {
            Self {
                strategy: None,
                trade_count,
            }
        }
    }

    impl Backtester for ConstantBacktester {
        fn clone_box(&self) -> Box<dyn Backtester> {
            Box::new(self.clone())
        }

        fn set_single_strategy(&mut self, strategy: Strategy) {
            self.strategy = Some(strategy);
        }

        fn backtest(&mut self) -> Result<(), ValidationError> {
            if self.strategy.is_none() {
                return Err(ValidationError::Precondition("no strategy attached".to_string()));
            }
            Ok(())
        }

        fn strategy(&self) -> Option<&Strategy> {
            self.strategy.as_ref()
        }

        fn num_trades_including_open(&self) -> u32 {
            self.trade_count
        }

        fn num_bars_in_trades_including_open(&self) -> u32 {
            self.trade_count * 2
        }

        fn closed_trades(&self) -> &[ClosedTrade] {
            &[]
        }
    }
}
