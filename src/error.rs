use std::time::Duration;
use thiserror::Error;

/// Result type for realm and admission operations
pub type Result<T> = std::result::Result<T, RespectfulError>;

/// Boxed error returned by a wrapped driver
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while registering realms or admitting actions
#[derive(Error, Debug)]
pub enum RespectfulError {
    #[error("Currently rate-limited on realm '{realm}' (retry after {:.2}s)", .retry_after.as_secs_f64())]
    RateLimited { realm: String, retry_after: Duration },

    #[error("Realm '{0}' hasn't been registered")]
    UnknownRealm(String),

    #[error("Realm '{0}' is already registered")]
    DuplicateRealm(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    #[error("Realm '{realm}' has malformed metadata: {reason}")]
    CorruptRealm { realm: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Driver error: {0}")]
    Driver(#[source] DriverError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RespectfulError {
    /// True for a denial that can be retried once the realm's window moves on
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RespectfulError::RateLimited { .. })
    }

    /// Retry hint carried by a denial
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RespectfulError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
