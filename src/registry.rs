use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::{RespectfulError, Result},
    realm::{validate_limits, Realm, RealmSpec},
    store::RealmStore,
};

/// CRUD over realm metadata held in the shared store.
///
/// Registration is not an upsert: registering a name that already exists
/// fails with [`RespectfulError::DuplicateRealm`] and leaves the stored realm
/// untouched. Use [`RealmRegistry::update`] to change limits.
pub struct RealmRegistry {
    store: Arc<dyn RealmStore>,
    default_safety_threshold: u64,
}

impl RealmRegistry {
    pub fn new(store: Arc<dyn RealmStore>, default_safety_threshold: u64) -> Self {
        Self {
            store,
            default_safety_threshold,
        }
    }

    /// Threshold given to realms registered without their own
    pub fn default_safety_threshold(&self) -> u64 {
        self.default_safety_threshold
    }

    /// Register a realm with the process-wide default safety threshold
    pub async fn register(&self, name: &str, max_requests: u64, timespan: u64) -> Result<Realm> {
        self.register_spec(RealmSpec::new(name, max_requests, timespan))
            .await
    }

    /// Register a realm with an explicit safety threshold
    pub async fn register_with_threshold(
        &self,
        name: &str,
        max_requests: u64,
        timespan: u64,
        safety_threshold: u64,
    ) -> Result<Realm> {
        self.register_spec(
            RealmSpec::new(name, max_requests, timespan).with_safety_threshold(safety_threshold),
        )
        .await
    }

    async fn register_spec(&self, spec: RealmSpec) -> Result<Realm> {
        let mut realms = self.register_many([spec]).await?;
        Ok(realms.remove(0))
    }

    /// Register a batch of realms.
    ///
    /// Every entry is validated before anything is written, and the write is
    /// a single store operation: either every realm is registered or none is.
    pub async fn register_many<I, T>(&self, specs: I) -> Result<Vec<Realm>>
    where
        I: IntoIterator<Item = T>,
        T: Into<RealmSpec>,
    {
        let mut seen = HashSet::new();
        let mut realms = Vec::new();

        for spec in specs {
            let realm = spec.into().into_realm(self.default_safety_threshold)?;
            if !seen.insert(realm.name.clone()) {
                return Err(RespectfulError::DuplicateRealm(realm.name));
            }
            realms.push(realm);
        }

        if realms.is_empty() {
            return Ok(realms);
        }

        if let Some(existing) = self.store.insert_realms(&realms).await? {
            return Err(RespectfulError::DuplicateRealm(existing));
        }

        for realm in &realms {
            info!(
                realm = %realm.name,
                max_requests = realm.max_requests,
                timespan = realm.timespan,
                safety_threshold = realm.safety_threshold,
                "Registered realm"
            );
        }
        Ok(realms)
    }

    /// Replace a realm's limits. The live usage counter is left as is, so
    /// the new cap applies to the current window immediately.
    pub async fn update(&self, name: &str, max_requests: u64, timespan: u64) -> Result<Realm> {
        let current = self.get(name).await?;
        validate_limits(name, max_requests, timespan, current.safety_threshold)?;

        if !self.store.update_realm(name, max_requests, timespan).await? {
            return Err(RespectfulError::UnknownRealm(name.to_string()));
        }

        info!(realm = %name, max_requests, timespan, "Updated realm");
        Ok(Realm {
            max_requests,
            timespan,
            ..current
        })
    }

    /// Remove a realm and its usage counter. Absent realms are ignored.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        self.unregister_many([name]).await
    }

    pub async fn unregister_many<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        self.store.remove_realms(&names).await?;

        info!(realms = ?names, "Unregistered realms");
        Ok(())
    }

    /// Names of every registered realm, in no particular order
    pub async fn list_names(&self) -> Result<Vec<String>> {
        self.store.realm_names().await
    }

    pub async fn get(&self, name: &str) -> Result<Realm> {
        self.store
            .fetch_realm(name)
            .await?
            .ok_or_else(|| RespectfulError::UnknownRealm(name.to_string()))
    }

    pub async fn max_requests(&self, name: &str) -> Result<u64> {
        Ok(self.get(name).await?.max_requests)
    }

    pub async fn timespan(&self, name: &str) -> Result<u64> {
        Ok(self.get(name).await?.timespan)
    }
}
