use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    accountant::RateAccountant,
    error::{RespectfulError, Result},
    metrics::Metrics,
    store::RealmStore,
};

/// Shortest sleep between retries in waiting mode
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Evaluates one action against a list of realms and returns one verdict.
///
/// Holds no usage state of its own; every decision reads the shared store.
pub struct AdmissionCoordinator {
    store: Arc<dyn RealmStore>,
    accountant: RateAccountant,
    metrics: Arc<Metrics>,
}

impl AdmissionCoordinator {
    pub fn new(store: Arc<dyn RealmStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            accountant: RateAccountant::new(store.clone(), metrics.clone()),
            store,
            metrics,
        }
    }

    pub fn accountant(&self) -> &RateAccountant {
        &self.accountant
    }

    /// Admit one action against every realm in `realms`, in order.
    ///
    /// Every name is checked against the registry before anything is
    /// counted. With `wait == false` the first denial stops evaluation and
    /// is returned as [`RespectfulError::RateLimited`]; realms admitted
    /// earlier in the same call stay counted. With `wait == true` a denied
    /// realm is retried after its window's remaining time until admitted.
    /// There is no overall timeout; wrap the call in
    /// `tokio::time::timeout` to bound it.
    pub async fn evaluate<S: AsRef<str>>(&self, realms: &[S], wait: bool) -> Result<()> {
        if realms.is_empty() {
            return Err(RespectfulError::Validation(
                "at least one realm is required".to_string(),
            ));
        }

        let names: Vec<&str> = realms.iter().map(|name| name.as_ref()).collect();

        let registered = {
            let _timer = self.metrics.start_store_timer("realm_names");
            self.store.realm_names().await?
        };
        if let Some(unknown) = names
            .iter()
            .find(|name| !registered.iter().any(|r| r.as_str() == **name))
        {
            return Err(RespectfulError::UnknownRealm(unknown.to_string()));
        }

        for realm in names {
            if wait {
                self.admit_waiting(realm).await?;
            } else {
                let result = self.accountant.try_admit(realm).await?;
                if !result.admitted {
                    warn!(realm, retry_after_ms = result.retry_after.as_millis() as u64, "Rate limited");
                    return Err(RespectfulError::RateLimited {
                        realm: realm.to_string(),
                        retry_after: result.retry_after,
                    });
                }
            }
        }

        Ok(())
    }

    async fn admit_waiting(&self, realm: &str) -> Result<()> {
        let started = Instant::now();

        loop {
            let result = self.accountant.try_admit(realm).await?;
            if result.admitted {
                let waited = started.elapsed();
                if !waited.is_zero() {
                    self.metrics.record_wait(waited.as_secs_f64());
                }
                return Ok(());
            }

            let delay = result.retry_after.max(MIN_RETRY_DELAY);
            debug!(realm, delay_ms = delay.as_millis() as u64, "Waiting for realm window");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryStore,
        realm::Realm,
        store::UsageSnapshot,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store whose usage increments start failing after `healthy` calls
    struct FlakyStore {
        inner: MemoryStore,
        healthy: AtomicUsize,
    }

    impl FlakyStore {
        fn new(healthy: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                healthy: AtomicUsize::new(healthy),
            }
        }
    }

    #[async_trait]
    impl RealmStore for FlakyStore {
        async fn insert_realms(&self, realms: &[Realm]) -> Result<Option<String>> {
            self.inner.insert_realms(realms).await
        }

        async fn update_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<bool> {
            self.inner.update_realm(name, max_requests, timespan).await
        }

        async fn fetch_realm(&self, name: &str) -> Result<Option<Realm>> {
            self.inner.fetch_realm(name).await
        }

        async fn realm_names(&self) -> Result<Vec<String>> {
            self.inner.realm_names().await
        }

        async fn remove_realms(&self, names: &[String]) -> Result<()> {
            self.inner.remove_realms(names).await
        }

        async fn increment_usage(&self, name: &str, window: Duration) -> Result<UsageSnapshot> {
            let healthy = self
                .healthy
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if healthy.is_err() {
                return Err(RespectfulError::StoreUnavailable(::redis::RedisError::from((
                    ::redis::ErrorKind::IoError,
                    "connection refused",
                ))));
            }
            self.inner.increment_usage(name, window).await
        }

        async fn usage(&self, name: &str) -> Result<UsageSnapshot> {
            self.inner.usage(name).await
        }

        async fn health_check(&self) -> Result<()> {
            self.inner.health_check().await
        }
    }

    async fn flaky_coordinator(healthy: usize, realm: Realm) -> AdmissionCoordinator {
        let store = Arc::new(FlakyStore::new(healthy));
        store.insert_realms(&[realm]).await.unwrap();
        AdmissionCoordinator::new(store, Arc::new(Metrics::new().unwrap()))
    }

    async fn coordinator(realms: Vec<Realm>) -> (Arc<MemoryStore>, AdmissionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        store.insert_realms(&realms).await.unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        (store.clone(), AdmissionCoordinator::new(store, metrics))
    }

    #[tokio::test]
    async fn test_empty_realm_list_is_rejected() {
        let (_, coordinator) = coordinator(vec![]).await;
        let realms: [&str; 0] = [];

        assert!(matches!(
            coordinator.evaluate(&realms, false).await,
            Err(RespectfulError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_realm_counts_nothing() {
        let (store, coordinator) = coordinator(vec![Realm::new("A", 10, 60, 0).unwrap()]).await;

        let result = coordinator.evaluate(&["A", "missing"], false).await;
        assert!(matches!(result, Err(RespectfulError::UnknownRealm(name)) if name == "missing"));
        assert_eq!(store.usage("A").await.unwrap().count, 0);

        let result = coordinator.evaluate(&["missing"], true).await;
        assert!(matches!(result, Err(RespectfulError::UnknownRealm(_))));
    }

    #[tokio::test]
    async fn test_multi_realm_denial_names_the_denying_realm() {
        let (store, coordinator) = coordinator(vec![
            Realm::new("A", 10, 60, 0).unwrap(),
            Realm::new("B", 1, 60, 0).unwrap(),
        ])
        .await;
        store.increment_usage("B", Duration::from_secs(60)).await.unwrap();

        let result = coordinator.evaluate(&["A", "B"], false).await;

        match result {
            Err(RespectfulError::RateLimited { realm, retry_after }) => {
                assert_eq!(realm, "B");
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("Expected rate limit on B, got {:?}", other),
        }
        assert_eq!(store.usage("A").await.unwrap().count, 1);
        assert_eq!(store.usage("B").await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_first_denial_stops_evaluation() {
        let (store, coordinator) = coordinator(vec![
            Realm::new("A", 1, 60, 0).unwrap(),
            Realm::new("B", 10, 60, 0).unwrap(),
        ])
        .await;

        coordinator.evaluate(&["A"], false).await.unwrap();
        let result = coordinator.evaluate(&["A", "B"], false).await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(store.usage("B").await.unwrap().count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_mode_blocks_until_window_expires() {
        let (_, coordinator) = coordinator(vec![Realm::new("G", 1, 2, 0).unwrap()]).await;

        let start = Instant::now();
        coordinator.evaluate(&["G"], true).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        coordinator.evaluate(&["G"], true).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2), "returned after {:?}", waited);
        assert!(waited < Duration::from_secs(3), "returned after {:?}", waited);

        assert!(coordinator.evaluate(&["G"], false).await.unwrap_err().is_rate_limited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_mode_over_multiple_realms() {
        let (_, coordinator) = coordinator(vec![
            Realm::new("A", 1, 5, 0).unwrap(),
            Realm::new("B", 1, 2, 0).unwrap(),
        ])
        .await;

        let start = Instant::now();
        for _ in 0..3 {
            coordinator.evaluate(&["A", "B"], true).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_admission() {
        let coordinator = flaky_coordinator(0, Realm::new("A", 10, 60, 0).unwrap()).await;

        assert!(matches!(
            coordinator.evaluate(&["A"], false).await,
            Err(RespectfulError::StoreUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_mode_aborts_on_store_failure() {
        let coordinator = flaky_coordinator(2, Realm::new("A", 1, 60, 0).unwrap()).await;
        coordinator.evaluate(&["A"], false).await.unwrap();

        let start = Instant::now();
        let result = coordinator.evaluate(&["A"], true).await;

        assert!(matches!(result, Err(RespectfulError::StoreUnavailable(_))));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60), "returned after {:?}", waited);
        assert!(waited < Duration::from_secs(61), "returned after {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_mode_fails_immediately_when_store_is_down() {
        let coordinator = flaky_coordinator(0, Realm::new("A", 10, 60, 0).unwrap()).await;

        let start = Instant::now();
        let result = coordinator.evaluate(&["A"], true).await;

        assert!(matches!(result, Err(RespectfulError::StoreUnavailable(_))));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
