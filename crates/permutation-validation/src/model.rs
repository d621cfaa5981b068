use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Long or short orientation of a pattern-derived strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

/// A trading-rule pattern, as produced by pattern parsing/codegen (external,
/// not modeled here). The pattern's hash is computed once from its shape and
/// thresholds and cached, mirroring how parsed rule-tree nodes in a pattern
/// AST cache their own hash at construction rather than recomputing it on
/// every comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternTree {
    profit_target_pct: Decimal,
    stop_loss_pct: Decimal,
    direction: Direction,
    max_bars_back: u32,
    volatility_attribute: Option<String>,
    portfolio_attribute: Option<String>,
    #[serde(skip)]
    pattern_hash: u64,
}

impl PatternTree {
    pub fn new(
        profit_target_pct: Decimal,
        stop_loss_pct: Decimal,
        direction: Direction,
        max_bars_back: u32,
        volatility_attribute: Option<String>,
        portfolio_attribute: Option<String>,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        profit_target_pct.to_string().hash(&mut hasher);
        stop_loss_pct.to_string().hash(&mut hasher);
        direction.hash(&mut hasher);
        max_bars_back.hash(&mut hasher);
        volatility_attribute.hash(&mut hasher);
        portfolio_attribute.hash(&mut hasher);
        let pattern_hash = hasher.finish();

        Self {
            profit_target_pct,
            stop_loss_pct,
            direction,
            max_bars_back,
            volatility_attribute,
            portfolio_attribute,
            pattern_hash,
        }
    }

    pub fn pattern_hash(&self) -> u64 {
        self.pattern_hash
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn profit_target_pct(&self) -> Decimal {
        self.profit_target_pct
    }

    pub fn stop_loss_pct(&self) -> Decimal {
        self.stop_loss_pct
    }

    pub fn max_bars_back(&self) -> u32 {
        self.max_bars_back
    }
}

/// One named instance of a pattern. `combined_hash` (see `identity`) is a
/// function of the pattern and the name alone, so clones always share it;
/// `instance_id` is fresh on every clone and exists for diagnostics only.
#[derive(Debug, Clone)]
pub struct Strategy {
    pattern: Arc<PatternTree>,
    name: Arc<str>,
    direction: Direction,
    instance_id: Uuid,
    bound_security: Option<Arc<Security>>,
}

impl Strategy {
    pub fn new(pattern: Arc<PatternTree>, name: impl Into<Arc<str>>, direction: Direction) -> Self {
        Self {
            pattern,
            name: name.into(),
            direction,
            instance_id: Uuid::new_v4(),
            bound_security: None,
        }
    }

    /// Clones this strategy onto a portfolio, snapshotting its current
    /// security and minting a fresh instance id. `combined_hash` is
    /// unaffected (I1).
    pub fn clone_onto(&self, portfolio: &Portfolio) -> Strategy {
        Strategy {
            pattern: Arc::clone(&self.pattern),
            name: Arc::clone(&self.name),
            direction: self.direction,
            instance_id: Uuid::new_v4(),
            bound_security: portfolio.security_arc(),
        }
    }

    pub fn pattern(&self) -> &Arc<PatternTree> {
        &self.pattern
    }

    pub fn pattern_hash(&self) -> u64 {
        self.pattern.pattern_hash()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn bound_security(&self) -> Option<&Arc<Security>> {
        self.bound_security.as_ref()
    }
}

/// A single OHLC bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// A price series for one symbol. Requires at least two bars: the synthetic
/// series builder needs at least one bar-to-bar return to permute.
#[derive(Debug, Clone)]
pub struct Security {
    symbol: String,
    bars: Vec<HistoricalBar>,
}

impl Security {
    pub fn new(symbol: impl Into<String>, bars: Vec<HistoricalBar>) -> Result<Self, ValidationError> {
        if bars.len() < 2 {
            return Err(ValidationError::Data(
                "security must have at least two bars".to_string(),
            ));
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[HistoricalBar] {
        &self.bars
    }

    pub fn with_bars(&self, bars: Vec<HistoricalBar>) -> Self {
        Self {
            symbol: self.symbol.clone(),
            bars,
        }
    }
}

/// A strategy paired with its baseline (unpermuted, real-data) statistic.
/// The stepwise algorithms require a slice of these sorted descending by
/// `baseline_stat` before they run.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub strategy: Strategy,
    pub baseline_stat: Decimal,
}

/// Holds exactly one active `Security`, replaceable between permutation
/// draws. Algorithms treat a portfolio with no security set as empty.
#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    security: Option<Arc<Security>>,
}

impl Portfolio {
    pub fn empty() -> Self {
        Self { security: None }
    }

    pub fn with_security(security: Security) -> Self {
        Self {
            security: Some(Arc::new(security)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.security.is_none()
    }

    pub fn security(&self) -> Option<&Security> {
        self.security.as_deref()
    }

    pub fn security_arc(&self) -> Option<Arc<Security>> {
        self.security.clone()
    }

    pub fn replace_security(&mut self, security: Security) {
        self.security = Some(Arc::new(security));
    }
}
