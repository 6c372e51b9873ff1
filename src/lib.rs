//! Respectful
//!
//! Distributed rate limiting for automation drivers. Named realms cap how
//! many actions may run per time window; every process sharing the same
//! Redis store observes the same realms and counters, so the aggregate rate
//! across all of them stays under each realm's cap.

pub mod accountant;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod realm;
pub mod redis;
pub mod registry;
pub mod service;
pub mod store;
pub mod utils;

// Re-export main types
pub use accountant::{AdmitResult, RateAccountant, RealmUsage};
pub use crate::config::Settings;
pub use coordinator::AdmissionCoordinator;
pub use driver::{Driver, GetOptions, RespectfulDriver};
pub use error::{RespectfulError, Result};
pub use memory::MemoryStore;
pub use realm::{Realm, RealmSpec};
pub use crate::redis::RedisStore;
pub use registry::RealmRegistry;
pub use service::RespectfulService;
pub use store::{RealmStore, UsageSnapshot};
