use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

use crate::model::Strategy;

/// Computes the identity keys used throughout the crate. `combined_hash`
/// folds a strategy's pattern hash with a hash of its name so that two
/// clones of the same named strategy always collide, while two differently
/// named strategies sharing a pattern never do (I1, I4).
pub struct StrategyIdentity;

impl StrategyIdentity {
    pub fn combined_hash(strategy: &Strategy) -> u64 {
        let mut hasher = DefaultHasher::new();
        strategy.name().hash(&mut hasher);
        let name_hash = hasher.finish();
        strategy.pattern_hash() ^ (name_hash << 1)
    }

    pub fn pattern_hash_of(strategy: &Strategy) -> u64 {
        strategy.pattern_hash()
    }

    pub fn instance_uuid(strategy: &Strategy) -> Uuid {
        strategy.instance_id()
    }
}
