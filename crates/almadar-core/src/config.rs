//! Runtime tuning knobs

use serde::{Deserialize, Serialize};

/// Configuration for the evaluator and event processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of compiled expressions kept in the cache
    pub cache_capacity: usize,
    /// Forward emitted events to listening orbitals (one hop)
    pub forward_listeners: bool,
    /// Seed for `math/random`; seeded from the clock when absent
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            forward_listeners: true,
            rng_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: RuntimeConfig = ron::from_str("(cache_capacity: 16)").unwrap();
        assert_eq!(config.cache_capacity, 16);
        assert!(config.forward_listeners);
        assert_eq!(config.rng_seed, None);
    }
}
