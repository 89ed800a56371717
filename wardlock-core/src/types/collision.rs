use serde::{Deserialize, Serialize};

use super::ResourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionType {
    DuplicateSubmission,
    DiagnosisConflict,
    ExamConflict,
    MedicationConflict,
}

impl CollisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CollisionType::DuplicateSubmission => "duplicate_submission",
            CollisionType::DiagnosisConflict => "diagnosis_conflict",
            CollisionType::ExamConflict => "exam_conflict",
            CollisionType::MedicationConflict => "medication_conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "duplicate_submission" => Some(CollisionType::DuplicateSubmission),
            "diagnosis_conflict" => Some(CollisionType::DiagnosisConflict),
            "exam_conflict" => Some(CollisionType::ExamConflict),
            "medication_conflict" => Some(CollisionType::MedicationConflict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// What the detector found. Pure value; nothing is persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub collision_type: CollisionType,
    /// Id of the history item the candidate collides with
    pub conflicting_id: String,
    pub conflicting_resource_type: ResourceType,
    /// The code / name on the history side
    pub conflicting_value: String,
    pub severity: Severity,
    pub review_required: bool,
    /// Hard conflicts must stop the caller; soft ones are warnings
    pub blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionStatus {
    Detected,
    Resolved,
}

/// A persisted collision, kept for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionRecord {
    pub id: String,
    pub tenant_id: String,
    pub collision_type: CollisionType,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub conflicting_resource_id: Option<String>,
    pub conflicting_resource_type: Option<ResourceType>,
    pub severity: Severity,
    pub review_required: bool,
    pub blocking: bool,
    pub status: CollisionStatus,
    pub detected_by: String,
    pub detected_at: u64,
    pub detection_meta: serde_json::Value,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<u64>,
    pub resolution_notes: Option<String>,
}

// ─── History Window ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: String,
    pub patient_id: String,
    /// ICD-10 code, e.g. "F32"
    pub code: String,
    pub recorded_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingJob {
    pub id: String,
    pub invoice_id: String,
    pub procedure_code: String,
    /// Free-form submission status; only "rejected" frees the pair
    pub status: String,
    pub created_at: u64,
}

impl BillingJob {
    pub fn is_rejected(&self) -> bool {
        self.status.eq_ignore_ascii_case("rejected")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamOrder {
    pub id: String,
    pub patient_id: String,
    pub exam_code: String,
    pub ordered_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMedication {
    pub id: String,
    pub patient_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollisionStatistics {
    pub total: usize,
    pub resolved: usize,
    pub pending_review: usize,
    /// Percentage of resolved collisions, 0 when there are none
    pub resolution_rate: f64,
    pub by_type: Vec<(CollisionType, usize)>,
    pub by_severity: Vec<(Severity, usize)>,
}
