//! High-level client that wires the services to one storage backend.
//! The HTTP server and the benches go through this.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::collision::CollisionDetector;
use crate::collision_service::CollisionService;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::infrastructure::{AuditSink, ClinicalHistory, CollisionStore, LeaseStore, QueueStore};
use crate::infrastructure_in_memory::InMemoryStore;
use crate::lock_manager::LockManager;
use crate::monitor::{LockMonitor, LockReport};
use crate::notify::SubscriberRegistry;
use crate::queue_coordinator::QueueCoordinator;

/// A backend implementing every storage trait.
pub trait Storage:
    LeaseStore + AuditSink + CollisionStore + ClinicalHistory + QueueStore + 'static
{
}

impl<T> Storage for T where
    T: LeaseStore + AuditSink + CollisionStore + ClinicalHistory + QueueStore + 'static
{
}

/// The main entry point. Owns the lock manager, the collision service and
/// the queue coordinator, all sharing one store and one clock.
pub struct WardClient {
    locks: LockManager,
    collisions: CollisionService,
    queue: QueueCoordinator,
    notifier: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl WardClient {
    /// Create a client with an empty in-memory store and default configuration.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// In-memory store with the given configuration.
    pub fn with_config(config: CoreConfig) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), config, Arc::new(SystemClock))
    }

    /// Create a client backed by SQLite at the given path.
    /// Leases, queues and audit persist across server restarts.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str, config: CoreConfig) -> Result<Self, crate::error::StoreError> {
        let store = crate::infrastructure_sqlite::SqliteStore::open(path)?;
        Ok(Self::with_store(Arc::new(store), config, Arc::new(SystemClock)))
    }

    pub fn with_store<S: Storage>(store: Arc<S>, config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let notifier = Arc::new(SubscriberRegistry::new(config.notify.channel_capacity));
        let locks = LockManager::new(store.clone(), store.clone(), clock.clone());
        let collisions = CollisionService::new(
            CollisionDetector::new(config.collision.clone()),
            store.clone(),
            store.clone(),
            clock.clone(),
        );
        let queue = QueueCoordinator::new(
            store.clone(),
            store,
            notifier.clone(),
            clock.clone(),
            config.queue.clone(),
        );

        Self {
            locks,
            collisions,
            queue,
            notifier,
            clock,
            config,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn collisions(&self) -> &CollisionService {
        &self.collisions
    }

    pub fn queue(&self) -> &QueueCoordinator {
        &self.queue
    }

    pub fn notifier(&self) -> &Arc<SubscriberRegistry> {
        &self.notifier
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Lease and collision statistics for the tenant, checked against the
    /// `[monitor]` thresholds.
    pub fn lock_report(&self, tenant_id: &str) -> Result<LockReport, CoreError> {
        let leases = self.locks.statistics(tenant_id)?;
        let collisions = self.collisions.statistics(tenant_id)?;
        let report = LockMonitor::report(
            tenant_id,
            self.clock.now_ms(),
            leases,
            collisions,
            &self.config.monitor,
        );
        for alert in &report.alerts {
            tracing::warn!(tenant_id, kind = alert.kind.as_str(), message = %alert.message, "Lock usage alert");
        }
        Ok(report)
    }

    /// Periodic housekeeping: expire overdue leases across all tenants and
    /// drop idle subscribers. Returns (expired leases, dropped subscribers).
    pub fn sweep(&self) -> Result<(usize, usize), CoreError> {
        let expired = self.locks.sweep_expired(None)?;
        let dropped = self.notifier.sweep(
            self.clock.now_ms(),
            self.config.notify.max_idle_seconds * 1000,
        );
        Ok((expired, dropped))
    }
}

impl Default for WardClient {
    fn default() -> Self {
        Self::new()
    }
}
