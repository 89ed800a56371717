use serde::{Deserialize, Serialize};

/// Lease expiry used for leases that never time out on their own.
pub const PERMANENT_EXPIRY: u64 = i64::MAX as u64;

pub const MINUTE_MS: u64 = 60_000;
pub const DAY_MS: u64 = 24 * 60 * MINUTE_MS;

/// Kinds of clinical resources that can be leased or referenced by a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MedicalRecord,
    Prescription,
    Appointment,
    /// A SADT/TUSS billing submission
    BillingJob,
    Diagnosis,
    ExamOrder,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::MedicalRecord,
        ResourceType::Prescription,
        ResourceType::Appointment,
        ResourceType::BillingJob,
        ResourceType::Diagnosis,
        ResourceType::ExamOrder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::MedicalRecord => "medical_record",
            ResourceType::Prescription => "prescription",
            ResourceType::Appointment => "appointment",
            ResourceType::BillingJob => "billing_job",
            ResourceType::Diagnosis => "diagnosis",
            ResourceType::ExamOrder => "exam_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the holder intends to do with a leased resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseType {
    MedicalRecordEdit,
    PrescriptionEdit,
    AppointmentEdit,
    SadtSubmission,
    TussSubmission,
    DiagnosisEntry,
    ExamOrderEdit,
    /// Leases taken by the offline-sync layer while it replays edits
    SyncEdit,
    /// Signed/finalized documents; held until released
    RecordFinalization,
}

impl LeaseType {
    pub const ALL: [LeaseType; 9] = [
        LeaseType::MedicalRecordEdit,
        LeaseType::PrescriptionEdit,
        LeaseType::AppointmentEdit,
        LeaseType::SadtSubmission,
        LeaseType::TussSubmission,
        LeaseType::DiagnosisEntry,
        LeaseType::ExamOrderEdit,
        LeaseType::SyncEdit,
        LeaseType::RecordFinalization,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeaseType::MedicalRecordEdit => "medical_record_edit",
            LeaseType::PrescriptionEdit => "prescription_edit",
            LeaseType::AppointmentEdit => "appointment_edit",
            LeaseType::SadtSubmission => "sadt_submission",
            LeaseType::TussSubmission => "tuss_submission",
            LeaseType::DiagnosisEntry => "diagnosis_entry",
            LeaseType::ExamOrderEdit => "exam_order_edit",
            LeaseType::SyncEdit => "sync_edit",
            LeaseType::RecordFinalization => "record_finalization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for LeaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant-scoped reference to a resource. Used as the uniqueness key for
/// active leases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub tenant_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(
        tenant_id: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Canonical string key (`tenant/type:id`) for hash-based lookups
    pub fn key(&self) -> String {
        format!(
            "{}/{}:{}",
            self.tenant_id, self.resource_type, self.resource_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Physician,
    Reception,
    /// Background jobs and the sync layer
    System,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Physician => "physician",
            ActorRole::Reception => "reception",
            ActorRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(ActorRole::Admin),
            "physician" | "doctor" => Some(ActorRole::Physician),
            "reception" | "receptionist" => Some(ActorRole::Reception),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }

    /// Roles allowed to break someone else's lease
    pub fn is_privileged(self) -> bool {
        matches!(self, ActorRole::Admin | ActorRole::System)
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Generate a new random identifier with a readable prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, nanoid::nanoid!())
}
