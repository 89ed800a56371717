//! Lease-based resource locking.
//!
//! At most one `Active` lease exists per (tenant, resource type, resource id).
//! The store enforces that with a uniqueness constraint; a losing insert is
//! turned into a [`AcquireOutcome::Conflict`] here. Expiry is lazy: an overdue
//! lease is moved to `Expired` by whichever call touches it first, or by
//! [`LockManager::sweep_expired`].

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult, StoreError};
use crate::infrastructure::{AuditSink, LeaseStore};
use crate::policy::LeasePolicy;
use crate::types::*;

/// Attempts before giving up on a resource that keeps changing underneath us.
const MAX_ACQUIRE_ATTEMPTS: usize = 4;

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub resource: ResourceRef,
    pub lease_type: LeaseType,
    /// Requested TTL; the lease type's default when absent
    pub ttl_minutes: Option<u64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AcquireRequest {
    pub fn new(resource: ResourceRef, lease_type: LeaseType) -> Self {
        Self {
            resource,
            lease_type,
            ttl_minutes: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn ttl_minutes(mut self, minutes: u64) -> Self {
        self.ttl_minutes = Some(minutes);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct LockManager {
    store: Arc<dyn LeaseStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

fn require(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        Err(CoreError::InvalidRequest(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

fn log_failure(operation: &str, tenant_id: &str, err: &CoreError) {
    match err {
        CoreError::Storage(e) => {
            tracing::error!(tenant_id, operation, error = %e, "Lease operation failed in storage")
        }
        CoreError::Forbidden { actor_id, .. } => {
            tracing::warn!(tenant_id, operation, actor_id = %actor_id, "Lease operation forbidden")
        }
        other => tracing::debug!(tenant_id, operation, error = %other, "Lease operation rejected"),
    }
}

impl LockManager {
    pub fn new(store: Arc<dyn LeaseStore>, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            clock,
        }
    }

    /// Audit writes never fail the operation they describe.
    fn record(&self, entry: LeaseAuditEntry) {
        if let Err(e) = self.audit.record_lease(&entry) {
            tracing::warn!(
                tenant_id = %entry.tenant_id,
                operation = entry.operation.as_str(),
                error = %e,
                "Failed to write lease audit entry"
            );
        }
    }

    /// Expire a lease we read as overdue, then return the stored row.
    ///
    /// The store only expires it if the stored expiry is still past `now`, so
    /// a heartbeat that landed after our read survives and is returned as
    /// `Active`. Losing the race to another expirer is fine.
    fn expire(&self, lease: &ResourceLease, now: u64) -> CoreResult<ResourceLease> {
        if self.store.expire_if_overdue(&lease.tenant_id, &lease.id, now)? {
            tracing::info!(
                tenant_id = %lease.tenant_id,
                lease_id = %lease.id,
                holder_id = %lease.holder_id,
                "Lease expired"
            );
        }
        self.store
            .get(&lease.tenant_id, &lease.id)?
            .ok_or_else(|| CoreError::not_found("lease", &lease.id))
    }

    // ─── Acquire ────────────────────────────────────────────────────────────

    /// Acquire `request.resource` for `actor`.
    ///
    /// Re-acquiring a resource the actor already holds extends the existing
    /// lease. A resource held by someone else yields a conflict carrying the
    /// holder and expiry; the caller decides whether to retry.
    pub fn acquire(&self, actor: &Actor, request: AcquireRequest) -> CoreResult<AcquireOutcome> {
        let now = self.clock.now_ms();
        let result = self.try_acquire(actor, &request, now);

        let operation = match &result {
            Ok(AcquireOutcome::Extended { .. }) => LeaseOperation::Extend,
            _ => LeaseOperation::Acquire,
        };
        let entry = LeaseAuditEntry::new(&request.resource.tenant_id, operation, actor, now)
            .resource(&request.resource)
            .context(json!({ "lease_type": request.lease_type.as_str() }));

        match &result {
            Ok(AcquireOutcome::Granted { lease }) | Ok(AcquireOutcome::Extended { lease }) => {
                tracing::info!(
                    tenant_id = %lease.tenant_id,
                    lease_id = %lease.id,
                    resource = %request.resource.key(),
                    holder_id = %lease.holder_id,
                    expires_at = lease.expires_at,
                    operation = operation.as_str(),
                    "Lease granted"
                );
                self.record(entry.lease(&lease.id));
            }
            Ok(AcquireOutcome::Conflict { conflict }) => {
                tracing::warn!(
                    tenant_id = %request.resource.tenant_id,
                    resource = %request.resource.key(),
                    holder_id = %conflict.holder_id,
                    requested_by = %actor.id,
                    "Lease conflict"
                );
                self.record(
                    entry
                        .lease(&conflict.lease_id)
                        .failed(format!("CONFLICT: held by {}", conflict.holder_id))
                        .context(json!({
                            "lease_type": request.lease_type.as_str(),
                            "holder_id": conflict.holder_id,
                            "expires_at": conflict.expires_at,
                        })),
                );
            }
            Err(e) => {
                log_failure("acquire", &request.resource.tenant_id, e);
                self.record(entry.failed(e.to_string()));
            }
        }
        result
    }

    fn try_acquire(
        &self,
        actor: &Actor,
        request: &AcquireRequest,
        now: u64,
    ) -> CoreResult<AcquireOutcome> {
        require("tenant_id", &request.resource.tenant_id)?;
        require("resource_id", &request.resource.resource_id)?;
        require("holder_id", &actor.id)?;
        LeasePolicy::check_permitted(request.resource.resource_type, request.lease_type)?;
        let ttl_ms = LeasePolicy::effective_ttl_ms(request.lease_type, request.ttl_minutes)?;
        let expires_at = LeasePolicy::expiry(now, ttl_ms);

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            if let Some(current) = self.store.find_active(&request.resource)? {
                if current.is_overdue(now) {
                    // Re-read on the next pass: either it is gone or it was renewed
                    self.expire(&current, now)?;
                    continue;
                }
                if current.holder_id != actor.id {
                    return Ok(AcquireOutcome::Conflict {
                        conflict: LeaseConflict::from(&current),
                    });
                }

                let mut extended = current;
                extended.lease_type = request.lease_type;
                extended.expires_at = expires_at;
                extended.heartbeat_at = now;
                extended
                    .metadata
                    .extend(request.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                if self.store.update_if_active(&extended)? {
                    return Ok(AcquireOutcome::Extended { lease: extended });
                }
                continue;
            }

            let mut lease = ResourceLease::new(
                new_id("lease"),
                &request.resource,
                request.lease_type,
                actor.id.clone(),
                now,
                expires_at,
            );
            lease.metadata = request.metadata.clone();

            match self.store.insert_active(&lease) {
                Ok(()) => return Ok(AcquireOutcome::Granted { lease }),
                // Someone else inserted first; the next pass reads their lease
                Err(StoreError::UniqueViolation(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::Storage(StoreError::Backend(format!(
            "gave up acquiring {} after {} attempts",
            request.resource.key(),
            MAX_ACQUIRE_ATTEMPTS
        ))))
    }

    // ─── Heartbeat / Release ────────────────────────────────────────────────

    /// Load a lease the actor holds and that is still `Active`.
    /// Overdue leases are expired on the way and reported as `Expired`.
    fn held_lease(&self, actor: &Actor, tenant_id: &str, lease_id: &str, now: u64) -> CoreResult<ResourceLease> {
        require("tenant_id", tenant_id)?;
        require("lease_id", lease_id)?;
        let mut lease = self
            .store
            .get(tenant_id, lease_id)?
            .filter(|l| l.holder_id == actor.id)
            .ok_or_else(|| CoreError::not_found("lease", lease_id))?;
        if lease.state == LeaseState::Active && lease.is_overdue(now) {
            lease = self.expire(&lease, now)?;
        }

        match lease.state {
            LeaseState::Active if lease.is_overdue(now) => Err(CoreError::Expired {
                lease_id: lease.id,
                expired_at: lease.expires_at,
            }),
            LeaseState::Active => Ok(lease),
            LeaseState::Expired => Err(CoreError::Expired {
                lease_id: lease.id,
                expired_at: lease.expires_at,
            }),
            LeaseState::Released | LeaseState::ForceReleased => {
                Err(CoreError::not_found("lease", lease_id))
            }
        }
    }

    /// Push the expiry of a held lease forward by `extend_by_minutes`
    /// (the lease type's default when absent).
    pub fn heartbeat(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        extend_by_minutes: Option<u64>,
    ) -> CoreResult<ResourceLease> {
        let now = self.clock.now_ms();
        let result = self.try_heartbeat(actor, tenant_id, lease_id, extend_by_minutes, now);

        let entry = LeaseAuditEntry::new(tenant_id, LeaseOperation::Heartbeat, actor, now).lease(lease_id);
        match &result {
            Ok(lease) => {
                tracing::debug!(tenant_id, lease_id, expires_at = lease.expires_at, "Lease heartbeat");
                self.record(entry.resource(&lease.resource()));
            }
            Err(e) => {
                log_failure("heartbeat", tenant_id, e);
                self.record(entry.failed(e.to_string()));
            }
        }
        result
    }

    fn try_heartbeat(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        extend_by_minutes: Option<u64>,
        now: u64,
    ) -> CoreResult<ResourceLease> {
        let mut lease = self.held_lease(actor, tenant_id, lease_id, now)?;
        let ttl_ms = LeasePolicy::effective_ttl_ms(lease.lease_type, extend_by_minutes)?;
        lease.expires_at = LeasePolicy::expiry(now, ttl_ms);
        lease.heartbeat_at = now;

        if self.store.update_if_active(&lease)? {
            Ok(lease)
        } else {
            Err(CoreError::not_found("lease", lease_id))
        }
    }

    /// Release a lease. Only the holder may release; anyone else gets `NotFound`.
    pub fn release(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        reason: Option<&str>,
    ) -> CoreResult<ResourceLease> {
        let now = self.clock.now_ms();
        let result = self.try_release(actor, tenant_id, lease_id, reason, now);

        let entry = LeaseAuditEntry::new(tenant_id, LeaseOperation::Release, actor, now)
            .lease(lease_id)
            .context(json!({ "reason": reason }));
        match &result {
            Ok(lease) => {
                tracing::info!(tenant_id, lease_id, resource = %lease.resource().key(), "Lease released");
                self.record(entry.resource(&lease.resource()));
            }
            Err(e) => {
                log_failure("release", tenant_id, e);
                self.record(entry.failed(e.to_string()));
            }
        }
        result
    }

    fn try_release(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        reason: Option<&str>,
        now: u64,
    ) -> CoreResult<ResourceLease> {
        let mut lease = match self.held_lease(actor, tenant_id, lease_id, now) {
            Err(CoreError::Expired { .. }) => return Err(CoreError::not_found("lease", lease_id)),
            other => other?,
        };
        lease.state = LeaseState::Released;
        lease.released_at = Some(now);
        if let Some(reason) = reason {
            lease
                .metadata
                .insert("release_reason".to_string(), json!(reason));
        }

        if self.store.update_if_active(&lease)? {
            Ok(lease)
        } else {
            Err(CoreError::not_found("lease", lease_id))
        }
    }

    /// Break a lease regardless of who holds it. Admin and system actors only.
    pub fn force_release(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        reason: &str,
    ) -> CoreResult<ResourceLease> {
        let now = self.clock.now_ms();
        let result = self.try_force_release(actor, tenant_id, lease_id, reason, now);

        let entry = LeaseAuditEntry::new(tenant_id, LeaseOperation::ForceRelease, actor, now).lease(lease_id);
        match &result {
            Ok(lease) => {
                tracing::warn!(
                    tenant_id,
                    lease_id,
                    prior_holder = %lease.holder_id,
                    forced_by = %actor.id,
                    reason,
                    "Lease force-released"
                );
                self.record(entry.resource(&lease.resource()).context(json!({
                    "prior_holder": lease.holder_id,
                    "reason": reason,
                    "at": now,
                })));
            }
            Err(e) => {
                log_failure("force_release", tenant_id, e);
                self.record(entry.failed(e.to_string()).context(json!({ "reason": reason })));
            }
        }
        result
    }

    fn try_force_release(
        &self,
        actor: &Actor,
        tenant_id: &str,
        lease_id: &str,
        reason: &str,
        now: u64,
    ) -> CoreResult<ResourceLease> {
        if !actor.role.is_privileged() {
            return Err(CoreError::Forbidden {
                actor_id: actor.id.clone(),
                operation: "force-release a lease",
            });
        }
        require("tenant_id", tenant_id)?;
        require("reason", reason)?;

        let mut lease = self
            .store
            .get(tenant_id, lease_id)?
            .filter(|l| l.state == LeaseState::Active)
            .ok_or_else(|| CoreError::not_found("lease", lease_id))?;
        if lease.is_overdue(now) {
            lease = self.expire(&lease, now)?;
            if lease.state != LeaseState::Active {
                return Err(CoreError::not_found("lease", lease_id));
            }
        }

        lease.state = LeaseState::ForceReleased;
        lease.released_at = Some(now);
        lease.force_release = Some(ForceRelease {
            actor_id: actor.id.clone(),
            at: now,
            reason: reason.to_string(),
        });

        if self.store.update_if_active(&lease)? {
            Ok(lease)
        } else {
            Err(CoreError::not_found("lease", lease_id))
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    /// Fetch a lease by id. An overdue `Active` lease is expired first.
    pub fn get(&self, tenant_id: &str, lease_id: &str) -> CoreResult<ResourceLease> {
        let now = self.clock.now_ms();
        let lease = self
            .store
            .get(tenant_id, lease_id)?
            .ok_or_else(|| CoreError::not_found("lease", lease_id))?;
        if lease.state == LeaseState::Active && lease.is_overdue(now) {
            return self.expire(&lease, now);
        }
        Ok(lease)
    }

    /// Who, if anyone, holds `resource`, and whether `actor` may edit it.
    pub fn status(&self, actor: &Actor, resource: &ResourceRef) -> CoreResult<LockStatus> {
        require("tenant_id", &resource.tenant_id)?;
        require("resource_id", &resource.resource_id)?;
        let now = self.clock.now_ms();
        let current = match self.store.find_active(resource)? {
            Some(lease) if lease.is_overdue(now) => Some(self.expire(&lease, now)?),
            other => other,
        };

        Ok(match current.filter(|l| l.is_live(now)) {
            Some(lease) => LockStatus {
                is_locked: true,
                can_edit: lease.holder_id == actor.id,
                lease: Some(LeaseConflict::from(&lease)),
            },
            None => LockStatus {
                is_locked: false,
                can_edit: true,
                lease: None,
            },
        })
    }

    pub fn list_active(
        &self,
        tenant_id: &str,
        resource_type: Option<ResourceType>,
    ) -> CoreResult<Vec<ResourceLease>> {
        let now = self.clock.now_ms();
        self.store.expire_overdue(Some(tenant_id), now)?;
        Ok(self
            .store
            .list(tenant_id, Some(LeaseState::Active))?
            .into_iter()
            .filter(|l| resource_type.is_none_or(|t| l.resource_type == t))
            .collect())
    }

    /// Expire every overdue lease, for one tenant or all of them.
    pub fn sweep_expired(&self, tenant_id: Option<&str>) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        let expired = self.store.expire_overdue(tenant_id, now)?;
        if expired > 0 {
            tracing::info!(tenant_id = ?tenant_id, expired, "Swept expired leases");
        }
        Ok(expired)
    }

    pub fn statistics(&self, tenant_id: &str) -> CoreResult<LeaseStatistics> {
        let now = self.clock.now_ms();
        self.store.expire_overdue(Some(tenant_id), now)?;
        let leases = self.store.list(tenant_id, None)?;

        let mut stats = LeaseStatistics::default();
        let mut closed_minutes = Vec::new();
        let mut per_resource: HashMap<String, usize> = HashMap::new();

        for lease in &leases {
            let ended_at = match lease.state {
                LeaseState::Active => {
                    stats.active += 1;
                    None
                }
                LeaseState::Expired => {
                    stats.expired += 1;
                    Some(lease.expires_at)
                }
                LeaseState::Released => {
                    stats.released += 1;
                    lease.released_at
                }
                LeaseState::ForceReleased => {
                    stats.force_released += 1;
                    lease.released_at
                }
            };
            if let Some(end) = ended_at {
                closed_minutes.push(end.saturating_sub(lease.acquired_at) as f64 / MINUTE_MS as f64);
            }
            *per_resource
                .entry(format!("{}:{}", lease.resource_type, lease.resource_id))
                .or_default() += 1;
        }

        if !closed_minutes.is_empty() {
            stats.average_duration_minutes =
                closed_minutes.iter().sum::<f64>() / closed_minutes.len() as f64;
        }

        let mut busiest: Vec<(String, usize)> = per_resource.into_iter().collect();
        busiest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        busiest.truncate(5);
        stats.most_leased_resources = busiest;

        Ok(stats)
    }

    /// Audit rows for the tenant, newest first.
    pub fn audit_trail(
        &self,
        tenant_id: &str,
        lease_id: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<LeaseAuditEntry>> {
        Ok(self.audit.lease_audit(tenant_id, lease_id, limit)?)
    }
}
