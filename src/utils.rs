use std::time::Duration;

/// Store key layout for realm metadata and usage counters
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Set holding every registered realm name
    pub fn realms_key(&self) -> String {
        format!("{}:REALMS", self.prefix)
    }

    /// Hash holding one realm's limits
    pub fn realm_key(&self, realm: &str) -> String {
        format!("{}:REALMS:{}", self.prefix, realm)
    }

    /// Usage counter for the realm's current window
    pub fn usage_key(&self, realm: &str) -> String {
        format!("{}:REQUESTS:{}", self.prefix, realm)
    }
}

/// Convert a Redis `PTTL` reply into a remaining lifetime.
///
/// Negative replies mean the key is missing (-2) or has no expiry (-1).
pub fn ttl_from_millis(pttl: i64) -> Option<Duration> {
    if pttl < 0 {
        None
    } else {
        Some(Duration::from_millis(pttl as u64))
    }
}
