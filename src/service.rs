use std::sync::Arc;
use tracing::info;

use crate::{
    accountant::RealmUsage,
    config::Settings,
    coordinator::AdmissionCoordinator,
    error::Result,
    metrics::Metrics,
    realm::{Realm, RealmSpec},
    redis::{RedisConfig, RedisStore},
    registry::RealmRegistry,
    store::RealmStore,
};

/// Entry point tying settings, the shared store, the realm registry and the
/// admission coordinator together.
pub struct RespectfulService {
    settings: Settings,
    store: Arc<dyn RealmStore>,
    registry: RealmRegistry,
    coordinator: AdmissionCoordinator,
    metrics: Arc<Metrics>,
}

impl RespectfulService {
    /// Connect to the Redis store named in `settings`
    pub async fn connect(settings: Settings) -> Result<Self> {
        let store = RedisStore::connect(RedisConfig::from(&settings.store)).await?;
        Self::with_store(settings, Arc::new(store))
    }

    /// Build the service on top of an existing store
    pub fn with_store(settings: Settings, store: Arc<dyn RealmStore>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);

        info!(
            safety_threshold = settings.safety_threshold,
            "Realm service initialized"
        );

        Ok(Self {
            registry: RealmRegistry::new(store.clone(), settings.safety_threshold),
            coordinator: AdmissionCoordinator::new(store.clone(), metrics.clone()),
            settings,
            store,
            metrics,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &RealmRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &AdmissionCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn fetch_registered_realms(&self) -> Result<Vec<String>> {
        self.registry.list_names().await
    }

    pub async fn register_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<Realm> {
        self.registry.register(name, max_requests, timespan).await
    }

    pub async fn register_realms<I, T>(&self, realms: I) -> Result<Vec<Realm>>
    where
        I: IntoIterator<Item = T>,
        T: Into<RealmSpec>,
    {
        self.registry.register_many(realms).await
    }

    pub async fn update_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<Realm> {
        self.registry.update(name, max_requests, timespan).await
    }

    pub async fn realm(&self, name: &str) -> Result<Realm> {
        self.registry.get(name).await
    }

    pub async fn realm_max_requests(&self, name: &str) -> Result<u64> {
        self.registry.max_requests(name).await
    }

    pub async fn realm_timespan(&self, name: &str) -> Result<u64> {
        self.registry.timespan(name).await
    }

    pub async fn unregister_realm(&self, name: &str) -> Result<()> {
        self.registry.unregister(name).await
    }

    pub async fn unregister_realms<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.unregister_many(names).await
    }

    /// Admit one action against `realms`; see [`AdmissionCoordinator::evaluate`]
    pub async fn evaluate<S: AsRef<str>>(&self, realms: &[S], wait: bool) -> Result<()> {
        self.coordinator.evaluate(realms, wait).await
    }

    /// Current window of a realm, without counting anything
    pub async fn realm_usage(&self, name: &str) -> Result<RealmUsage> {
        self.coordinator.accountant().usage(name).await
    }

    /// Health check for the store
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RespectfulError, memory::MemoryStore};

    fn service(safety_threshold: u64) -> RespectfulService {
        let settings = Settings {
            safety_threshold,
            ..Settings::default()
        };
        RespectfulService::with_store(settings, Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_registry_entry_points() {
        let service = service(0);

        service.register_realm("TEST123", 100, 300).await.unwrap();
        let batch: Vec<(&str, u64, u64)> = vec![("TEST234", 200, 600), ("TEST345", 300, 900)];
        service.register_realms(batch).await.unwrap();

        let mut names = service.fetch_registered_realms().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["TEST123", "TEST234", "TEST345"]);

        service.update_realm("TEST123", 1000, 3000).await.unwrap();
        assert_eq!(service.realm_max_requests("TEST123").await.unwrap(), 1000);
        assert_eq!(service.realm_timespan("TEST123").await.unwrap(), 3000);

        service.unregister_realm("TEST123").await.unwrap();
        service.unregister_realms(["TEST234", "TEST345"]).await.unwrap();
        assert!(service.fetch_registered_realms().await.unwrap().is_empty());
        service.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_configured_safety_threshold_has_the_expected_effect() {
        let service = service(10);
        service.register_realm("TEST123", 11, 300).await.unwrap();

        service.evaluate(&["TEST123"], false).await.unwrap();
        let result = service.evaluate(&["TEST123"], false).await;

        assert!(matches!(result, Err(RespectfulError::RateLimited { realm, .. }) if realm == "TEST123"));
    }

    #[tokio::test]
    async fn test_unregistered_realm_rejects_actions() {
        let service = service(0);
        service.register_realm("A", 10, 1).await.unwrap();
        service.evaluate(&["A"], false).await.unwrap();

        service.unregister_realm("A").await.unwrap();

        assert!(matches!(
            service.evaluate(&["A"], false).await,
            Err(RespectfulError::UnknownRealm(_))
        ));
        assert!(matches!(
            service.realm_usage("A").await,
            Err(RespectfulError::UnknownRealm(_))
        ));
    }

    #[tokio::test]
    async fn test_metrics_follow_admissions() {
        let service = service(0);
        service.register_realm("A", 1, 60).await.unwrap();

        service.evaluate(&["A"], false).await.unwrap();
        let _ = service.evaluate(&["A"], false).await;

        let text = service.metrics().encode_text().unwrap();
        assert!(text.contains("respectful_admitted_total{realm=\"A\"} 1"));
        assert!(text.contains("respectful_denied_total{realm=\"A\"} 1"));
    }
}
