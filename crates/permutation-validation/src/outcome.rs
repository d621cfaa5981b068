use rust_decimal::Decimal;

use crate::model::Strategy;

/// A single closed trade's realized profit or loss.
#[derive(Debug, Clone, Copy)]
pub struct ClosedTrade {
    pub pnl: Decimal,
}

/// The result of running a `Backtester` with a single strategy attached,
/// carrying enough of the strategy's identity for observers and statistic
/// policies to use without re-querying the backtester.
#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub strategy: Strategy,
    pub num_trades_including_open: u32,
    pub num_bars_in_trades_including_open: u32,
    pub closed_trades: Vec<ClosedTrade>,
}
