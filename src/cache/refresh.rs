//! Background recomputation of stale entries.

use async_trait::async_trait;
use serde_json::Value;

/// Supplies a fresh value for a key whose cached copy has gone stale.
///
/// Called from a spawned task; the read that triggered it never waits.
#[async_trait]
pub trait RefreshHook: Send + Sync {
    async fn refresh(&self, key: &str) -> anyhow::Result<Value>;
}
