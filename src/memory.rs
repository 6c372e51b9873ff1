use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    error::{RespectfulError, Result},
    realm::Realm,
    store::{RealmStore, UsageSnapshot},
};

/// In-process store for single-process use and tests.
///
/// Expiry follows the tokio clock, so paused-time tests can advance windows.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    realms: HashMap<String, Realm>,
    counters: HashMap<String, Counter>,
}

struct Counter {
    count: u64,
    expires_at: Instant,
}

impl MemoryState {
    fn purge_expired(&mut self, name: &str, now: Instant) {
        if self
            .counters
            .get(name)
            .is_some_and(|counter| counter.expires_at <= now)
        {
            self.counters.remove(name);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RealmStore for MemoryStore {
    async fn insert_realms(&self, realms: &[Realm]) -> Result<Option<String>> {
        let mut state = self.state.lock().await;

        if let Some(existing) = realms.iter().find(|r| state.realms.contains_key(&r.name)) {
            return Ok(Some(existing.name.clone()));
        }

        for realm in realms {
            state.realms.insert(realm.name.clone(), realm.clone());
        }
        Ok(None)
    }

    async fn update_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.realms.get_mut(name) {
            Some(realm) => {
                realm.max_requests = max_requests;
                realm.timespan = timespan;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch_realm(&self, name: &str) -> Result<Option<Realm>> {
        Ok(self.state.lock().await.realms.get(name).cloned())
    }

    async fn realm_names(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.realms.keys().cloned().collect())
    }

    async fn remove_realms(&self, names: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        for name in names {
            state.realms.remove(name);
            state.counters.remove(name);
        }
        Ok(())
    }

    async fn increment_usage(&self, name: &str, window: Duration) -> Result<UsageSnapshot> {
        let now = Instant::now();
        let expires_at = now.checked_add(window).ok_or_else(|| {
            RespectfulError::Validation(format!(
                "realm '{}': window of {}s cannot be scheduled",
                name,
                window.as_secs()
            ))
        })?;
        let mut state = self.state.lock().await;

        state.purge_expired(name, now);
        let counter = state
            .counters
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                count: 0,
                expires_at,
            });
        counter.count += 1;

        Ok(UsageSnapshot {
            count: counter.count,
            ttl: Some(counter.expires_at.saturating_duration_since(now)),
        })
    }

    async fn usage(&self, name: &str) -> Result<UsageSnapshot> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        state.purge_expired(name, now);
        Ok(match state.counters.get(name) {
            Some(counter) => UsageSnapshot {
                count: counter.count,
                ttl: Some(counter.expires_at.saturating_duration_since(now)),
            },
            None => UsageSnapshot::default(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
