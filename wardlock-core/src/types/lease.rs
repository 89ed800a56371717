use serde::{Deserialize, Serialize};

use super::{LeaseType, ResourceRef, ResourceType};

/// Lease states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// Lease is held and valid
    Active,
    /// Lease TTL elapsed without heartbeat
    Expired,
    /// Lease was explicitly released by its holder
    Released,
    /// Lease was broken by a privileged actor
    ForceReleased,
}

impl LeaseState {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseState::Active => "active",
            LeaseState::Expired => "expired",
            LeaseState::Released => "released",
            LeaseState::ForceReleased => "force_released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LeaseState::Active),
            "expired" => Some(LeaseState::Expired),
            "released" => Some(LeaseState::Released),
            "force_released" => Some(LeaseState::ForceReleased),
            _ => None,
        }
    }
}

/// Who broke a lease, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRelease {
    pub actor_id: String,
    pub at: u64,
    pub reason: String,
}

/// A time-bound exclusive claim on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLease {
    pub id: String,
    pub tenant_id: String,
    pub lease_type: LeaseType,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Actor holding the lease
    pub holder_id: String,
    pub acquired_at: u64,
    pub expires_at: u64,
    pub state: LeaseState,
    pub heartbeat_at: u64,
    /// Set when the holder released the lease
    pub released_at: Option<u64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub force_release: Option<ForceRelease>,
}

impl ResourceLease {
    pub fn new(
        id: String,
        resource: &ResourceRef,
        lease_type: LeaseType,
        holder_id: String,
        now: u64,
        expires_at: u64,
    ) -> Self {
        Self {
            id,
            tenant_id: resource.tenant_id.clone(),
            lease_type,
            resource_type: resource.resource_type,
            resource_id: resource.resource_id.clone(),
            holder_id,
            acquired_at: now,
            expires_at,
            state: LeaseState::Active,
            heartbeat_at: now,
            released_at: None,
            metadata: serde_json::Map::new(),
            force_release: None,
        }
    }

    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(&self.tenant_id, self.resource_type, &self.resource_id)
    }

    /// True once the TTL has elapsed, regardless of the stored state.
    pub fn is_overdue(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Active in storage and not yet past its expiry.
    pub fn is_live(&self, now: u64) -> bool {
        self.state == LeaseState::Active && !self.is_overdue(now)
    }
}

/// Whether a resource is held right now, seen from one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub is_locked: bool,
    /// False only while someone else holds a live lease
    pub can_edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseConflict>,
}

/// Details returned to a caller who lost the race for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConflict {
    pub lease_id: String,
    pub holder_id: String,
    pub lease_type: LeaseType,
    pub acquired_at: u64,
    pub expires_at: u64,
}

impl From<&ResourceLease> for LeaseConflict {
    fn from(lease: &ResourceLease) -> Self {
        Self {
            lease_id: lease.id.clone(),
            holder_id: lease.holder_id.clone(),
            lease_type: lease.lease_type,
            acquired_at: lease.acquired_at,
            expires_at: lease.expires_at,
        }
    }
}

/// Result of attempting to acquire a lease
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// A fresh lease was created
    Granted { lease: ResourceLease },
    /// The caller already held the resource; its lease was extended
    Extended { lease: ResourceLease },
    /// Another holder has the resource
    Conflict { conflict: LeaseConflict },
}

impl AcquireOutcome {
    pub fn lease(&self) -> Option<&ResourceLease> {
        match self {
            AcquireOutcome::Granted { lease } | AcquireOutcome::Extended { lease } => Some(lease),
            AcquireOutcome::Conflict { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AcquireOutcome::Conflict { .. })
    }
}

/// Lease usage figures for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeaseStatistics {
    pub active: usize,
    pub expired: usize,
    pub released: usize,
    pub force_released: usize,
    pub average_duration_minutes: f64,
    /// `(resource key, lease count)` over all history, busiest first, at most five
    pub most_leased_resources: Vec<(String, usize)>,
}
