use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::rule::Rule;

/// The rule configuration document ingested by `RuleEngine::update` (§6).
/// Unknown top-level fields are ignored by virtue of plain `Deserialize`
/// without `deny_unknown_fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Per-session tunables, defaulted by `Session::start` when left at zero
/// (§4.8).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub concurrency: usize,
    pub body_size_threshold: u64,
    pub process_timeout: Duration,
    pub pending_capacity: usize,
}

impl SessionConfig {
    const DEFAULT_CONCURRENCY: usize = 32;
    const DEFAULT_BODY_SIZE_THRESHOLD: u64 = 2 * 1024 * 1024;
    const DEFAULT_PROCESS_TIMEOUT_MS: u64 = 5000;
    const DEFAULT_PENDING_CAPACITY: usize = 256;

    /// Fill any zero-valued field with its default, mirroring
    /// `chromiumoxide::BrowserConfig`'s own all-or-nothing `Default` impl
    /// but applied field-by-field per §4.8's "Defaults applied... if zero".
    pub fn with_defaults(mut self) -> Self {
        if self.concurrency == 0 {
            self.concurrency = Self::DEFAULT_CONCURRENCY;
        }
        if self.body_size_threshold == 0 {
            self.body_size_threshold = Self::DEFAULT_BODY_SIZE_THRESHOLD;
        }
        if self.process_timeout.is_zero() {
            self.process_timeout = Duration::from_millis(Self::DEFAULT_PROCESS_TIMEOUT_MS);
        }
        if self.pending_capacity == 0 {
            self.pending_capacity = Self::DEFAULT_PENDING_CAPACITY;
        }
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::DEFAULT_CONCURRENCY,
            body_size_threshold: Self::DEFAULT_BODY_SIZE_THRESHOLD,
            process_timeout: Duration::from_millis(Self::DEFAULT_PROCESS_TIMEOUT_MS),
            pending_capacity: Self::DEFAULT_PENDING_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_config_fills_in_defaults() {
        let cfg = SessionConfig {
            concurrency: 0,
            body_size_threshold: 0,
            process_timeout: Duration::ZERO,
            pending_capacity: 0,
        }
        .with_defaults();
        assert_eq!(cfg.concurrency, 32);
        assert_eq!(cfg.body_size_threshold, 2 * 1024 * 1024);
        assert_eq!(cfg.process_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.pending_capacity, 256);
    }

    #[test]
    fn unknown_top_level_fields_are_ignored() {
        let json = r#"{"id":"cfg-1","unexpected":"field","rules":[]}"#;
        let cfg: RuleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.id, "cfg-1");
        assert!(cfg.rules.is_empty());
    }
}
