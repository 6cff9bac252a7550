use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

fn default_shared() -> bool {
    true
}

fn default_heuristic_lifetime_ms() -> u64 {
    60_000
}

fn default_max_capture_bytes() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

/// Engine configuration. Every knob has a default, so `CacheSettings::default()`
/// is a working shared-cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Apply shared-cache constraints: `private`, `s-maxage`, and the
    /// `Authorization` gate.
    #[serde(default = "default_shared")]
    pub shared: bool,
    /// Treat every response as if it carried `must-understand`.
    #[serde(default)]
    pub force_must_understand: bool,
    /// Lifetime assumed when a response is cacheable but carries no
    /// explicit freshness.
    #[serde(default = "default_heuristic_lifetime_ms")]
    pub heuristic_lifetime_ms: u64,
    /// Upper bound on bytes buffered for a single body capture. A capture
    /// that would exceed it is abandoned whole.
    #[serde(default = "default_max_capture_bytes")]
    pub max_capture_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            shared: default_shared(),
            force_must_understand: false,
            heuristic_lifetime_ms: default_heuristic_lifetime_ms(),
            max_capture_bytes: default_max_capture_bytes(),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_capture_bytes > 0,
            "max_capture_bytes must be greater than 0 (got {})",
            self.max_capture_bytes
        );
        Ok(())
    }

    pub fn heuristic_lifetime(&self) -> Duration {
        Duration::from_millis(self.heuristic_lifetime_ms)
    }
}
