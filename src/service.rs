//! Process-level wiring: cache, invalidation rules and maintenance task.
//!
//! Build one [`CacheService`] at startup and hand out its [`Cache`] handle to
//! consumers; call [`CacheService::shutdown`] to stop the background task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cache::facade::{Cache, CacheBuilder};
use crate::config::Config;
use crate::error::CacheError;
use crate::invalidation::engine::InvalidationEngine;
use crate::invalidation::rule::InvalidationRule;
use crate::maintenance::{MaintenanceHandle, MaintenanceScheduler};

pub struct CacheService {
    cache: Cache,
    invalidation: Arc<InvalidationEngine>,
    scheduler: Arc<MaintenanceScheduler>,
    maintenance_interval: Duration,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl CacheService {
    /// Validate `config` and build every component with default strategies.
    pub fn init(config: Config) -> Result<Self, CacheError> {
        Self::init_with(CacheBuilder::new(config))
    }

    /// Like [`CacheService::init`], with a customized builder (clock, refresh
    /// hook, serializers, compressors).
    pub fn init_with(builder: CacheBuilder) -> Result<Self, CacheError> {
        let config = builder.config().clone();
        let cache = builder.build()?;

        let rules = config
            .invalidation_rules
            .iter()
            .map(InvalidationRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let invalidation = Arc::new(InvalidationEngine::with_rules(cache.clone(), rules)?);

        let scheduler = Arc::new(MaintenanceScheduler::new(
            cache.clone(),
            invalidation.clone(),
            config.maintenance.adaptive.clone(),
        ));

        let service = Self {
            cache,
            invalidation,
            scheduler,
            maintenance_interval: Duration::from_secs(config.maintenance.interval_secs),
            maintenance: Mutex::new(None),
        };
        info!(
            tiers = ?service.cache.tier_names(),
            rules = config.invalidation_rules.len(),
            "Cache service initialized"
        );

        if config.maintenance.auto_start {
            service.start_maintenance(service.maintenance_interval);
        }
        Ok(service)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn invalidation(&self) -> &Arc<InvalidationEngine> {
        &self.invalidation
    }

    pub fn scheduler(&self) -> &Arc<MaintenanceScheduler> {
        &self.scheduler
    }

    /// Interval configured for maintenance.
    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }

    /// Start periodic maintenance. Returns false if it is already running or
    /// no tokio runtime is available.
    pub fn start_maintenance(&self, interval: Duration) -> bool {
        let mut slot = self.maintenance.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime available, maintenance not started");
            return false;
        }
        *slot = Some(self.scheduler.clone().start(interval));
        true
    }

    /// Stop periodic maintenance. Returns false if it was not running.
    pub async fn stop_maintenance(&self) -> bool {
        let handle = self.maintenance.lock().take();
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn shutdown(self) {
        self.stop_maintenance().await;
        info!("Cache service shut down");
    }
}
