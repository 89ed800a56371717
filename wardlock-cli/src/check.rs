//! Offline collision check: evaluate one candidate against a history
//! supplied on stdin, without touching any store.

use serde::Deserialize;

use wardlock_core::collision::CollisionDetector;
use wardlock_core::types::{ActiveMedication, BillingJob, Conflict, DiagnosisRecord, ExamOrder};

#[derive(Debug, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckInput {
    DuplicateSubmission {
        invoice_id: String,
        procedure_code: String,
        #[serde(default)]
        jobs: Vec<BillingJob>,
    },
    Diagnosis {
        patient_id: String,
        code: String,
        #[serde(default)]
        history: Vec<DiagnosisRecord>,
        now: Option<u64>,
    },
    Exam {
        patient_id: String,
        exam_code: String,
        #[serde(default)]
        history: Vec<ExamOrder>,
        now: Option<u64>,
    },
    Medication {
        patient_id: String,
        medication: String,
        #[serde(default)]
        active: Vec<ActiveMedication>,
    },
}

impl CheckInput {
    /// `now` is used when the input carries no evaluation time of its own.
    pub fn evaluate(&self, detector: &CollisionDetector, now: u64) -> Option<Conflict> {
        match self {
            CheckInput::DuplicateSubmission {
                invoice_id,
                procedure_code,
                jobs,
            } => detector.check_duplicate_submission(invoice_id, procedure_code, jobs),
            CheckInput::Diagnosis {
                patient_id,
                code,
                history,
                now: at,
            } => detector.check_diagnosis(patient_id, code, history, at.unwrap_or(now)),
            CheckInput::Exam {
                patient_id,
                exam_code,
                history,
                now: at,
            } => detector.check_exam(patient_id, exam_code, history, at.unwrap_or(now)),
            CheckInput::Medication {
                patient_id,
                medication,
                active,
            } => detector.check_medication(patient_id, medication, active),
        }
    }
}
