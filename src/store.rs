use async_trait::async_trait;
use std::time::Duration;

use crate::{error::Result, realm::Realm};

/// Usage counter state for one realm's current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageSnapshot {
    pub count: u64,
    /// Remaining lifetime of the window, `None` when no window is open
    pub ttl: Option<Duration>,
}

/// Shared store holding realm metadata and usage counters.
///
/// Implementations must be the single source of truth: nothing here may be
/// answered from a process-local cache.
#[async_trait]
pub trait RealmStore: Send + Sync {
    /// Write every realm atomically, unless one of them already exists.
    ///
    /// Returns the name of the first existing realm, in which case nothing
    /// was written.
    async fn insert_realms(&self, realms: &[Realm]) -> Result<Option<String>>;

    /// Replace a realm's limits. Returns `false` if the realm is absent.
    async fn update_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<bool>;

    /// Fetch a realm's metadata
    async fn fetch_realm(&self, name: &str) -> Result<Option<Realm>>;

    /// Names of all registered realms
    async fn realm_names(&self) -> Result<Vec<String>>;

    /// Remove metadata and usage counters for the given realms in one operation.
    /// Absent realms are ignored.
    async fn remove_realms(&self, names: &[String]) -> Result<()>;

    /// Atomically add one to the realm's usage counter.
    ///
    /// The counter expires after `window`, armed only when the increment
    /// creates it. Returns the post-increment state.
    async fn increment_usage(&self, name: &str, window: Duration) -> Result<UsageSnapshot>;

    /// Read the realm's usage counter without changing it
    async fn usage(&self, name: &str) -> Result<UsageSnapshot>;

    /// Health check for the store
    async fn health_check(&self) -> Result<()>;
}
