use serde::{Deserialize, Serialize};

use super::{Actor, ActorRole, ResourceRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseOperation {
    Acquire,
    /// Re-entrant acquire by the current holder
    Extend,
    Heartbeat,
    Release,
    ForceRelease,
}

impl LeaseOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseOperation::Acquire => "acquire",
            LeaseOperation::Extend => "extend",
            LeaseOperation::Heartbeat => "heartbeat",
            LeaseOperation::Release => "release",
            LeaseOperation::ForceRelease => "force_release",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "acquire" => Some(LeaseOperation::Acquire),
            "extend" => Some(LeaseOperation::Extend),
            "heartbeat" => Some(LeaseOperation::Heartbeat),
            "release" => Some(LeaseOperation::Release),
            "force_release" => Some(LeaseOperation::ForceRelease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    Enqueued,
    Dequeued,
    Called,
    ServiceStarted,
    Finalized,
    NoShow,
}

impl QueueOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueOperation::Enqueued => "enqueued",
            QueueOperation::Dequeued => "dequeued",
            QueueOperation::Called => "called",
            QueueOperation::ServiceStarted => "service_started",
            QueueOperation::Finalized => "finalized",
            QueueOperation::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enqueued" => Some(QueueOperation::Enqueued),
            "dequeued" => Some(QueueOperation::Dequeued),
            "called" => Some(QueueOperation::Called),
            "service_started" => Some(QueueOperation::ServiceStarted),
            "finalized" => Some(QueueOperation::Finalized),
            "no_show" => Some(QueueOperation::NoShow),
            _ => None,
        }
    }
}

/// One row per attempted lease operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseAuditEntry {
    pub id: String,
    pub tenant_id: String,
    pub lease_id: Option<String>,
    /// `type:id` of the resource, when known
    pub resource: Option<String>,
    pub operation: LeaseOperation,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub success: bool,
    pub error: Option<String>,
    pub context: serde_json::Value,
    pub created_at: u64,
}

impl LeaseAuditEntry {
    pub fn new(tenant_id: &str, operation: LeaseOperation, actor: &Actor, now: u64) -> Self {
        Self {
            id: super::new_id("laud"),
            tenant_id: tenant_id.to_string(),
            lease_id: None,
            resource: None,
            operation,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            success: true,
            error: None,
            context: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn lease(mut self, lease_id: &str) -> Self {
        self.lease_id = Some(lease_id.to_string());
        self
    }

    pub fn resource(mut self, resource: &ResourceRef) -> Self {
        self.resource = Some(format!(
            "{}:{}",
            resource.resource_type, resource.resource_id
        ));
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// One row per queue state change, or per rejected queue attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAuditEntry {
    pub id: String,
    pub tenant_id: String,
    pub clinician_id: Option<String>,
    pub entry_id: Option<String>,
    pub operation: QueueOperation,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub success: bool,
    pub error: Option<String>,
    pub context: serde_json::Value,
    pub created_at: u64,
}

impl QueueAuditEntry {
    pub fn new(tenant_id: &str, operation: QueueOperation, actor: &Actor, now: u64) -> Self {
        Self {
            id: super::new_id("qaud"),
            tenant_id: tenant_id.to_string(),
            clinician_id: None,
            entry_id: None,
            operation,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            success: true,
            error: None,
            context: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn entry(mut self, entry: &super::QueueEntry) -> Self {
        self.entry_id = Some(entry.id.clone());
        self.clinician_id = Some(entry.clinician_id.clone());
        self
    }

    pub fn clinician(mut self, clinician_id: &str) -> Self {
        self.clinician_id = Some(clinician_id.to_string());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}
