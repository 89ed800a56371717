use crate::config::CollisionRules;
use crate::types::{
    ActiveMedication, BillingJob, CollisionType, Conflict, DiagnosisRecord, ExamOrder,
    ResourceType, Severity, DAY_MS,
};

/// A pure rule evaluator over a caller-supplied history window.
///
/// The detector never touches storage. Callers load the relevant history,
/// hand it in, and decide what to do with the returned [`Conflict`].
#[derive(Debug, Clone, Default)]
pub struct CollisionDetector {
    rules: CollisionRules,
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn within(now: u64, at: u64, days: u32) -> bool {
    now.saturating_sub(at) <= days as u64 * DAY_MS
}

impl CollisionDetector {
    pub fn new(rules: CollisionRules) -> Self {
        Self { rules }
    }

    /// Earliest moment a diagnosis may have been recorded and still count.
    pub fn diagnosis_window_start(&self, now: u64) -> u64 {
        now.saturating_sub(self.rules.diagnosis_lookback_days as u64 * DAY_MS)
    }

    pub fn exam_window_start(&self, now: u64) -> u64 {
        now.saturating_sub(self.rules.exam_lookback_days as u64 * DAY_MS)
    }

    fn antagonists(table: &std::collections::BTreeMap<String, Vec<String>>, key: &str) -> Vec<String> {
        table
            .get(key)
            .map(|vs| vs.iter().map(|v| normalize(v)).collect())
            .unwrap_or_default()
    }

    /// Candidate diagnosis code against the patient's recent diagnoses.
    /// Reports the most recent antagonistic record.
    pub fn check_diagnosis(
        &self,
        patient_id: &str,
        new_code: &str,
        history: &[DiagnosisRecord],
        now: u64,
    ) -> Option<Conflict> {
        let code = normalize(new_code);
        let antagonists = Self::antagonists(&self.rules.antagonistic_diagnoses, &code);
        if antagonists.is_empty() {
            return None;
        }

        history
            .iter()
            .filter(|d| d.patient_id == patient_id)
            .filter(|d| within(now, d.recorded_at, self.rules.diagnosis_lookback_days))
            .filter(|d| antagonists.contains(&normalize(&d.code)))
            .max_by_key(|d| d.recorded_at)
            .map(|d| Conflict {
                collision_type: CollisionType::DiagnosisConflict,
                conflicting_id: d.id.clone(),
                conflicting_resource_type: ResourceType::Diagnosis,
                conflicting_value: normalize(&d.code),
                severity: Severity::High,
                review_required: true,
                blocking: false,
            })
    }

    /// Any billing job for the same (invoice, procedure) that was not
    /// rejected blocks a resubmission. The earliest such job is reported.
    pub fn check_duplicate_submission(
        &self,
        invoice_id: &str,
        procedure_code: &str,
        jobs: &[BillingJob],
    ) -> Option<Conflict> {
        let procedure = normalize(procedure_code);
        jobs.iter()
            .filter(|j| j.invoice_id == invoice_id && normalize(&j.procedure_code) == procedure)
            .filter(|j| !j.is_rejected())
            .min_by_key(|j| j.created_at)
            .map(|j| Conflict {
                collision_type: CollisionType::DuplicateSubmission,
                conflicting_id: j.id.clone(),
                conflicting_resource_type: ResourceType::BillingJob,
                conflicting_value: j.status.clone(),
                severity: Severity::Critical,
                review_required: false,
                blocking: true,
            })
    }

    pub fn check_exam(
        &self,
        patient_id: &str,
        exam_code: &str,
        history: &[ExamOrder],
        now: u64,
    ) -> Option<Conflict> {
        let code = normalize(exam_code);
        let overlapping = Self::antagonists(&self.rules.overlapping_exams, &code);
        if overlapping.is_empty() {
            return None;
        }

        history
            .iter()
            .filter(|e| e.patient_id == patient_id)
            .filter(|e| within(now, e.ordered_at, self.rules.exam_lookback_days))
            .filter(|e| overlapping.contains(&normalize(&e.exam_code)))
            .max_by_key(|e| e.ordered_at)
            .map(|e| Conflict {
                collision_type: CollisionType::ExamConflict,
                conflicting_id: e.id.clone(),
                conflicting_resource_type: ResourceType::ExamOrder,
                conflicting_value: normalize(&e.exam_code),
                severity: Severity::Medium,
                review_required: true,
                blocking: false,
            })
    }

    /// Interactions are checked in both directions: a table row for either
    /// the candidate or the active medication is enough.
    pub fn check_medication(
        &self,
        patient_id: &str,
        medication: &str,
        active: &[ActiveMedication],
    ) -> Option<Conflict> {
        let candidate = normalize(medication);
        let interacts_with = Self::antagonists(&self.rules.medication_interactions, &candidate);

        active
            .iter()
            .filter(|m| m.patient_id == patient_id)
            .find(|m| {
                let current = normalize(&m.name);
                interacts_with.contains(&current)
                    || Self::antagonists(&self.rules.medication_interactions, &current)
                        .contains(&candidate)
            })
            .map(|m| Conflict {
                collision_type: CollisionType::MedicationConflict,
                conflicting_id: m.id.clone(),
                conflicting_resource_type: ResourceType::Prescription,
                conflicting_value: normalize(&m.name),
                severity: Severity::High,
                review_required: true,
                blocking: false,
            })
    }
}
