use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::outcome::BacktestOutcome;

/// Extracts the performance statistic a permutation run is compared on, and
/// declares the minimum trade count a backtest must clear for that statistic
/// to be meaningful. Backtests below the threshold are treated as
/// uninformative by the caller, not as zero.
pub trait PermutationStatistic: Send + Sync {
    fn extract(&self, outcome: &BacktestOutcome) -> Decimal;
    fn min_trades(&self) -> u32;

    /// Value reported externally (diagnostics/observers) for a draw that
    /// fell short of `min_trades`. Never used for ordering or exceedance
    /// counting — callers must keep using the uninformative sentinel
    /// (`Decimal::MIN`) there so a failed draw can never win a running max.
    fn min_trade_failure_value(&self) -> Decimal;
}

/// A cap applied to the log profit factor so a zero-loss backtest (a
/// technically infinite profit factor) still yields a finite, orderable
/// `Decimal` rather than propagating `f64::INFINITY` into a type that cannot
/// represent it.
const LOG_PROFIT_FACTOR_CAP: f64 = 50.0;

/// log(gross profit / gross loss) over a backtest's closed trades, gated by
/// a minimum trade count. Mirrors the teacher's profit-factor style
/// aggregation over trade returns (`backtest-engine::monte_carlo`), in log
/// space so the statistic is symmetric around zero and additive across
/// independent runs.
pub struct LogProfitFactorStatistic {
    min_trades: u32,
}

impl LogProfitFactorStatistic {
    pub fn new(min_trades: u32) -> Self {
        Self { min_trades }
    }
}

impl PermutationStatistic for LogProfitFactorStatistic {
    fn extract(&self, outcome: &BacktestOutcome) -> Decimal {
        let (gross_profit, gross_loss) = outcome.closed_trades.iter().fold(
            (0.0f64, 0.0f64),
            |(gp, gl), trade| {
                let pnl = trade.pnl.to_f64().unwrap_or(0.0);
                if pnl > 0.0 {
                    (gp + pnl, gl)
                } else {
                    (gp, gl - pnl)
                }
            },
        );

        let log_pf = if gross_loss <= 0.0 {
            if gross_profit <= 0.0 {
                0.0
            } else {
                LOG_PROFIT_FACTOR_CAP
            }
        } else {
            (gross_profit / gross_loss).ln().clamp(-LOG_PROFIT_FACTOR_CAP, LOG_PROFIT_FACTOR_CAP)
        };

        Decimal::from_f64(log_pf).unwrap_or(Decimal::ZERO)
    }

    fn min_trades(&self) -> u32 {
        self.min_trades
    }

    fn min_trade_failure_value(&self) -> Decimal {
        Decimal::ZERO
    }
}

/// A fixed-value statistic used only by tests, to isolate the permutation
/// scheduler and stepwise algorithms from any particular backtest metric.
pub struct ConstantStatistic {
    value: Decimal,
    min_trades: u32,
}

impl ConstantStatistic {
    pub fn new(value: Decimal) -> Self {
        Self { value, min_trades: 0 }
    }

    pub fn with_min_trades(value: Decimal, min_trades: u32) -> Self {
        Self { value, min_trades }
    }
}

impl PermutationStatistic for ConstantStatistic {
    fn extract(&self, _outcome: &BacktestOutcome) -> Decimal {
        self.value
    }

    fn min_trades(&self) -> u32 {
        self.min_trades
    }

    fn min_trade_failure_value(&self) -> Decimal {
        Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, PatternTree, Strategy};
    use crate::outcome::ClosedTrade;
    use std::sync::Arc;

    fn outcome_with(trades: Vec<ClosedTrade>, num_trades: u32) -> BacktestOutcome {
        let pattern = Arc::new(PatternTree::new(
            Decimal::new(2, 0),
            Decimal::new(1, 0),
            Direction::Long,
            5,
            None,
            None,
        ));
        BacktestOutcome {
            strategy: Strategy::new(pattern, "alpha", Direction::Long),
            num_trades_including_open: num_trades,
            num_bars_in_trades_including_open: num_trades * 3,
            closed_trades: trades,
        }
    }

    #[test]
    fn log_profit_factor_of_balanced_trades_is_zero() {
        let outcome = outcome_with(
            vec![
                ClosedTrade { pnl: Decimal::new(100, 0) },
                ClosedTrade { pnl: Decimal::new(-100, 0) },
            ],
            2,
        );
        let stat = LogProfitFactorStatistic::new(0);
        let value = stat.extract(&outcome);
        assert!(value.abs() < Decimal::new(1, 6));
    }

    #[test]
    fn log_profit_factor_is_positive_when_profitable() {
        let outcome = outcome_with(
            vec![
                ClosedTrade { pnl: Decimal::new(300, 0) },
                ClosedTrade { pnl: Decimal::new(-100, 0) },
            ],
            2,
        );
        let stat = LogProfitFactorStatistic::new(0);
        assert!(stat.extract(&outcome) > Decimal::ZERO);
    }

    #[test]
    fn zero_gross_loss_and_zero_profit_yields_zero() {
        let outcome = outcome_with(Vec::new(), 0);
        let stat = LogProfitFactorStatistic::new(0);
        assert_eq!(stat.extract(&outcome), Decimal::ZERO);
    }

    #[test]
    fn zero_gross_loss_with_profit_is_capped_not_infinite() {
        let outcome = outcome_with(vec![ClosedTrade { pnl: Decimal::new(500, 0) }], 1);
        let stat = LogProfitFactorStatistic::new(0);
        let value = stat.extract(&outcome);
        assert!(value > Decimal::ZERO);
        assert!(value <= Decimal::new(LOG_PROFIT_FACTOR_CAP as i64, 0));
    }

    #[test]
    fn min_trade_failure_value_is_zero_for_both_policies() {
        assert_eq!(LogProfitFactorStatistic::new(3).min_trade_failure_value(), Decimal::ZERO);
        assert_eq!(ConstantStatistic::new(Decimal::new(5, 1)).min_trade_failure_value(), Decimal::ZERO);
    }

    #[test]
    fn constant_statistic_ignores_outcome() {
        let stat = ConstantStatistic::new(Decimal::new(5, 1));
        let outcome = outcome_with(Vec::new(), 0);
        assert_eq!(stat.extract(&outcome), Decimal::new(5, 1));
        assert_eq!(stat.min_trades(), 0);
    }
}
