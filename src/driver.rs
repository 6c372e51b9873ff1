//! Rate-limited wrapper around an automation driver.
//!
//! Only [`Driver::get`] is charged against realms. Every other method of the
//! driver is forwarded unchanged, without touching the store.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    error::{DriverError, RespectfulError, Result},
    service::RespectfulService,
};

/// Capability set of a wrapped automation driver
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate to `url`. This is the outbound action that gets rate limited.
    async fn get(&self, url: &str) -> std::result::Result<(), DriverError>;

    async fn current_url(&self) -> std::result::Result<String, DriverError>;

    async fn title(&self) -> std::result::Result<String, DriverError>;

    async fn page_source(&self) -> std::result::Result<String, DriverError>;

    async fn back(&self) -> std::result::Result<(), DriverError>;

    async fn forward(&self) -> std::result::Result<(), DriverError>;

    async fn refresh(&self) -> std::result::Result<(), DriverError>;

    async fn quit(&self) -> std::result::Result<(), DriverError>;
}

/// Realms an action is charged against, and whether to wait when denied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub realms: Vec<String>,
    pub wait: bool,
}

impl GetOptions {
    pub fn new<I, S>(realms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            realms: realms.into_iter().map(Into::into).collect(),
            wait: false,
        }
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Driver whose navigation is admitted against shared realms first
pub struct RespectfulDriver<D> {
    driver: D,
    service: Arc<RespectfulService>,
}

impl<D: Driver> RespectfulDriver<D> {
    pub fn new(driver: D, service: Arc<RespectfulService>) -> Self {
        Self { driver, service }
    }

    /// Realm registry and admission entry points
    pub fn service(&self) -> &RespectfulService {
        &self.service
    }

    pub fn inner(&self) -> &D {
        &self.driver
    }

    pub fn into_inner(self) -> D {
        self.driver
    }

    /// Navigate to `url` once every realm in `options` admits the request.
    ///
    /// On denial the wrapped driver is not called and
    /// [`RespectfulError::RateLimited`] is returned.
    pub async fn get(&self, url: &str, options: &GetOptions) -> Result<()> {
        if options.realms.is_empty() {
            return Err(RespectfulError::Validation(
                "'realms' must name at least one realm".to_string(),
            ));
        }

        self.service.evaluate(&options.realms, options.wait).await?;
        self.driver.get(url).await.map_err(RespectfulError::Driver)
    }

    pub async fn current_url(&self) -> Result<String> {
        self.driver.current_url().await.map_err(RespectfulError::Driver)
    }

    pub async fn title(&self) -> Result<String> {
        self.driver.title().await.map_err(RespectfulError::Driver)
    }

    pub async fn page_source(&self) -> Result<String> {
        self.driver.page_source().await.map_err(RespectfulError::Driver)
    }

    pub async fn back(&self) -> Result<()> {
        self.driver.back().await.map_err(RespectfulError::Driver)
    }

    pub async fn forward(&self) -> Result<()> {
        self.driver.forward().await.map_err(RespectfulError::Driver)
    }

    pub async fn refresh(&self) -> Result<()> {
        self.driver.refresh().await.map_err(RespectfulError::Driver)
    }

    pub async fn quit(&self) -> Result<()> {
        self.driver.quit().await.map_err(RespectfulError::Driver)
    }
}
