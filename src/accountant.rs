use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    error::{RespectfulError, Result},
    metrics::Metrics,
    realm::Realm,
    store::RealmStore,
};

/// Outcome of one admission attempt against one realm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitResult {
    pub admitted: bool,
    /// Time until the realm's window expires; zero when unknown
    pub retry_after: Duration,
}

/// Read-only view of a realm's current window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealmUsage {
    pub realm: String,
    pub count: u64,
    pub max_requests: u64,
    pub safety_threshold: u64,
    /// Admissions left before the realm starts denying
    pub remaining: u64,
    pub resets_in_secs: Option<f64>,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Admits or denies single units of usage against one realm.
///
/// Every admission attempt increments the counter, and denied attempts are
/// never rolled back. The enforced cap is `max_requests - safety_threshold`;
/// the threshold absorbs increments from concurrent denied attempts so the
/// union of admitted actions stays within `max_requests`.
pub struct RateAccountant {
    store: Arc<dyn RealmStore>,
    metrics: Arc<Metrics>,
}

impl RateAccountant {
    pub fn new(store: Arc<dyn RealmStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    async fn fetch_realm(&self, name: &str) -> Result<Realm> {
        let _timer = self.metrics.start_store_timer("fetch_realm");
        self.store
            .fetch_realm(name)
            .await?
            .ok_or_else(|| RespectfulError::UnknownRealm(name.to_string()))
    }

    /// Try to admit one unit of usage against `name`, recording it if admitted
    pub async fn try_admit(&self, name: &str) -> Result<AdmitResult> {
        let realm = self.fetch_realm(name).await?;

        let usage = {
            let _timer = self.metrics.start_store_timer("increment_usage");
            self.store.increment_usage(name, realm.window()).await?
        };

        let limit = realm.admission_limit();
        if usage.count <= limit {
            debug!(realm = %name, count = usage.count, limit, "Admitted");
            self.metrics.record_admitted(name);
            return Ok(AdmitResult {
                admitted: true,
                retry_after: Duration::ZERO,
            });
        }

        let retry_after = usage.ttl.unwrap_or(Duration::ZERO);
        debug!(
            realm = %name,
            count = usage.count,
            limit,
            retry_after_ms = retry_after.as_millis() as u64,
            "Denied"
        );
        self.metrics.record_denied(name);
        Ok(AdmitResult {
            admitted: false,
            retry_after,
        })
    }

    /// Report the realm's usage without counting anything
    pub async fn usage(&self, name: &str) -> Result<RealmUsage> {
        let realm = self.fetch_realm(name).await?;
        let usage = {
            let _timer = self.metrics.start_store_timer("usage");
            self.store.usage(name).await?
        };

        Ok(RealmUsage {
            realm: realm.name.clone(),
            count: usage.count,
            max_requests: realm.max_requests,
            safety_threshold: realm.safety_threshold,
            remaining: realm.admission_limit().saturating_sub(usage.count),
            resets_in_secs: usage.ttl.map(|ttl| ttl.as_secs_f64()),
            resets_at: usage
                .ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| Utc::now() + ttl),
        })
    }
}
