use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::model::{HistoricalBar, Security};

/// Generates a synthetic series under a null model for one permutation draw.
/// Implementations must be deterministic in `(base_seed, permutation_index)`
/// and independent of which thread calls them, so single-threaded and
/// parallel executors produce bit-identical statistics.
pub trait SyntheticSeriesBuilder: Send + Sync {
    fn build(
        &self,
        original: &Security,
        base_seed: u64,
        permutation_index: u64,
    ) -> Result<Security, ValidationError>;
}

/// Combines a base seed and a permutation index into a single seed, then
/// reseeds (not merely advances) a fresh `StdRng` from it for every draw.
fn seed_for(base_seed: u64, permutation_index: u64) -> u64 {
    const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
    base_seed ^ permutation_index.wrapping_mul(GOLDEN)
}

/// "Maximum destruction" null model: permutes per-bar close-to-close log
/// returns, preserves the first bar's absolute price level, and reconstructs
/// each bar's OHLC from the original bar's own relative geometry (its
/// open/high/low expressed as ratios to its own close) applied to the new
/// close. This keeps each synthetic bar internally consistent
/// (low <= open,close <= high) while destroying the original serial
/// dependence between bars.
pub struct N1MaxDestruction;

impl SyntheticSeriesBuilder for N1MaxDestruction {
    fn build(
        &self,
        original: &Security,
        base_seed: u64,
        permutation_index: u64,
    ) -> Result<Security, ValidationError> {
        let bars = original.bars();
        if bars.len() < 2 {
            return Err(ValidationError::Data(
                "synthetic series requires at least two bars".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed_for(base_seed, permutation_index));

        let closes: Vec<f64> = bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(0.0))
            .collect();
        let mut log_returns: Vec<f64> = closes
            .windows(2)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        log_returns.shuffle(&mut rng);

        let rel_open: Vec<f64> = bars
            .iter()
            .map(|b| b.open.to_f64().unwrap_or(0.0) / b.close.to_f64().unwrap_or(1.0))
            .collect();
        let rel_high: Vec<f64> = bars
            .iter()
            .map(|b| b.high.to_f64().unwrap_or(0.0) / b.close.to_f64().unwrap_or(1.0))
            .collect();
        let rel_low: Vec<f64> = bars
            .iter()
            .map(|b| b.low.to_f64().unwrap_or(0.0) / b.close.to_f64().unwrap_or(1.0))
            .collect();

        let mut new_closes = Vec::with_capacity(bars.len());
        new_closes.push(closes[0]);
        for r in &log_returns {
            let prev = *new_closes.last().unwrap();
            new_closes.push(prev * r.exp());
        }

        let mut new_bars = Vec::with_capacity(bars.len());
        for (i, bar) in bars.iter().enumerate() {
            let close = new_closes[i];
            let open = close * rel_open[i];
            let mut high = close * rel_high[i];
            let mut low = close * rel_low[i];
            high = high.max(open).max(close);
            low = low.min(open).min(close);

            new_bars.push(HistoricalBar {
                date: bar.date,
                open: Decimal::from_f64(open).unwrap_or(bar.open),
                high: Decimal::from_f64(high).unwrap_or(bar.high),
                low: Decimal::from_f64(low).unwrap_or(bar.low),
                close: Decimal::from_f64(close).unwrap_or(bar.close),
            });
        }

        Ok(original.with_bars(new_bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_security() -> Security {
        let mut bars = Vec::new();
        let mut price = Decimal::new(100, 0);
        for day in 1..=10u32 {
            let open = price;
            let close = price + Decimal::new(1, 0);
            bars.push(HistoricalBar {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                open,
                high: close + Decimal::new(1, 0),
                low: open - Decimal::new(1, 0),
                close,
            });
            price = close;
        }
        Security::new("SPY", bars).unwrap()
    }

    #[test]
    fn preserves_first_bar_absolute_level() {
        let sec = sample_security();
        let synthetic = N1MaxDestruction.build(&sec, 42, 0).unwrap();
        assert_eq!(synthetic.bars()[0].close, sec.bars()[0].close);
    }

    #[test]
    fn every_bar_stays_internally_consistent() {
        let sec = sample_security();
        let synthetic = N1MaxDestruction.build(&sec, 42, 7).unwrap();
        for bar in synthetic.bars() {
            assert!(bar.low <= bar.open);
            assert!(bar.low <= bar.close);
            assert!(bar.high >= bar.open);
            assert!(bar.high >= bar.close);
        }
    }

    #[test]
    fn same_seed_and_index_reproduce_identical_series() {
        let sec = sample_security();
        let a = N1MaxDestruction.build(&sec, 99, 3).unwrap();
        let b = N1MaxDestruction.build(&sec, 99, 3).unwrap();
        for (x, y) in a.bars().iter().zip(b.bars()) {
            assert_eq!(x.close, y.close);
        }
    }

    #[test]
    fn different_permutation_index_usually_differs() {
        let sec = sample_security();
        let a = N1MaxDestruction.build(&sec, 99, 3).unwrap();
        let b = N1MaxDestruction.build(&sec, 99, 4).unwrap();
        let differs = a
            .bars()
            .iter()
            .zip(b.bars())
            .any(|(x, y)| x.close != y.close);
        assert!(differs);
    }

    #[test]
    fn rejects_single_bar_security() {
        let bars = vec![HistoricalBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
        }];
        // Security::new itself rejects this; build a 2-bar security then
        // manually truncate to exercise the builder's own guard.
        let sec = sample_security().with_bars(bars);
        assert!(N1MaxDestruction.build(&sec, 1, 0).is_err());
    }
}
