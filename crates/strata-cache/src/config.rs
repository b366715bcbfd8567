use serde::{Deserialize, Serialize};

/// Which cache tiers to stack above the backing store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep a per-request memory cache at the top of the chain.
    pub request_cache: bool,
    /// Record every access that reaches the backing store.
    pub access_log: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            request_cache: true,
            access_log: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: CacheConfig = toml::from_str("access_log = true").unwrap();
        assert!(config.request_cache);
        assert!(config.access_log);
    }
}
