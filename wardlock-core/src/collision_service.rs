use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::collision::CollisionDetector;
use crate::error::{CoreError, CoreResult};
use crate::infrastructure::{ClinicalHistory, CollisionStore};
use crate::types::*;

/// Loads history windows, runs the detector, and keeps a record of every
/// collision found.
pub struct CollisionService {
    detector: CollisionDetector,
    history: Arc<dyn ClinicalHistory>,
    store: Arc<dyn CollisionStore>,
    clock: Arc<dyn Clock>,
}

/// What the candidate is and who it belongs to, for the persisted record.
struct Subject<'a> {
    tenant_id: &'a str,
    resource_type: ResourceType,
    resource_id: &'a str,
    meta: serde_json::Value,
}

impl CollisionService {
    pub fn new(
        detector: CollisionDetector,
        history: Arc<dyn ClinicalHistory>,
        store: Arc<dyn CollisionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            detector,
            history,
            store,
            clock,
        }
    }

    pub fn detector(&self) -> &CollisionDetector {
        &self.detector
    }

    pub fn history(&self) -> &dyn ClinicalHistory {
        self.history.as_ref()
    }

    fn persist(
        &self,
        actor: &Actor,
        subject: Subject<'_>,
        conflict: Option<Conflict>,
        now: u64,
    ) -> CoreResult<Option<CollisionRecord>> {
        let Some(conflict) = conflict else {
            return Ok(None);
        };

        let mut meta = subject.meta;
        if let serde_json::Value::Object(map) = &mut meta {
            map.insert("conflicting_value".to_string(), json!(conflict.conflicting_value));
        }

        let record = CollisionRecord {
            id: new_id("col"),
            tenant_id: subject.tenant_id.to_string(),
            collision_type: conflict.collision_type,
            resource_id: subject.resource_id.to_string(),
            resource_type: subject.resource_type,
            conflicting_resource_id: Some(conflict.conflicting_id),
            conflicting_resource_type: Some(conflict.conflicting_resource_type),
            severity: conflict.severity,
            review_required: conflict.review_required,
            blocking: conflict.blocking,
            status: CollisionStatus::Detected,
            detected_by: actor.id.clone(),
            detected_at: now,
            detection_meta: meta,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
        };
        self.store.insert(&record)?;

        tracing::warn!(
            tenant_id = %record.tenant_id,
            collision_id = %record.id,
            collision_type = record.collision_type.as_str(),
            severity = record.severity.as_str(),
            blocking = record.blocking,
            "Collision detected"
        );
        Ok(Some(record))
    }

    /// A second submission of the same (invoice, procedure) while an earlier
    /// one is still live. Blocking.
    pub fn check_duplicate_submission(
        &self,
        tenant_id: &str,
        actor: &Actor,
        invoice_id: &str,
        procedure_code: &str,
    ) -> CoreResult<Option<CollisionRecord>> {
        if invoice_id.trim().is_empty() || procedure_code.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "invoice_id and procedure_code are required".to_string(),
            ));
        }
        let now = self.clock.now_ms();
        let jobs = self.history.billing_jobs(tenant_id, invoice_id)?;
        let conflict = self
            .detector
            .check_duplicate_submission(invoice_id, procedure_code, &jobs);

        self.persist(
            actor,
            Subject {
                tenant_id,
                resource_type: ResourceType::BillingJob,
                resource_id: invoice_id,
                meta: json!({ "invoice_id": invoice_id, "procedure_code": procedure_code }),
            },
            conflict,
            now,
        )
    }

    pub fn check_diagnosis(
        &self,
        tenant_id: &str,
        actor: &Actor,
        patient_id: &str,
        code: &str,
    ) -> CoreResult<Option<CollisionRecord>> {
        if patient_id.trim().is_empty() || code.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "patient_id and code are required".to_string(),
            ));
        }
        let now = self.clock.now_ms();
        let since = self.detector.diagnosis_window_start(now);
        let history = self.history.diagnoses_since(tenant_id, patient_id, since)?;
        let conflict = self.detector.check_diagnosis(patient_id, code, &history, now);

        self.persist(
            actor,
            Subject {
                tenant_id,
                resource_type: ResourceType::MedicalRecord,
                resource_id: patient_id,
                meta: json!({ "patient_id": patient_id, "new_code": code }),
            },
            conflict,
            now,
        )
    }

    pub fn check_exam(
        &self,
        tenant_id: &str,
        actor: &Actor,
        patient_id: &str,
        exam_code: &str,
    ) -> CoreResult<Option<CollisionRecord>> {
        if patient_id.trim().is_empty() || exam_code.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "patient_id and exam_code are required".to_string(),
            ));
        }
        let now = self.clock.now_ms();
        let since = self.detector.exam_window_start(now);
        let history = self.history.exams_since(tenant_id, patient_id, since)?;
        let conflict = self.detector.check_exam(patient_id, exam_code, &history, now);

        self.persist(
            actor,
            Subject {
                tenant_id,
                resource_type: ResourceType::MedicalRecord,
                resource_id: patient_id,
                meta: json!({ "patient_id": patient_id, "exam_code": exam_code }),
            },
            conflict,
            now,
        )
    }

    pub fn check_medication(
        &self,
        tenant_id: &str,
        actor: &Actor,
        patient_id: &str,
        medication: &str,
    ) -> CoreResult<Option<CollisionRecord>> {
        if patient_id.trim().is_empty() || medication.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "patient_id and medication are required".to_string(),
            ));
        }
        let now = self.clock.now_ms();
        let active = self.history.active_medications(tenant_id, patient_id)?;
        let conflict = self.detector.check_medication(patient_id, medication, &active);

        self.persist(
            actor,
            Subject {
                tenant_id,
                resource_type: ResourceType::Prescription,
                resource_id: patient_id,
                meta: json!({ "patient_id": patient_id, "medication": medication }),
            },
            conflict,
            now,
        )
    }

    /// Close a detected collision after review.
    pub fn resolve(
        &self,
        tenant_id: &str,
        collision_id: &str,
        actor: &Actor,
        notes: &str,
    ) -> CoreResult<CollisionRecord> {
        let now = self.clock.now_ms();
        let existing = self
            .store
            .get(tenant_id, collision_id)?
            .ok_or_else(|| CoreError::not_found("collision", collision_id))?;

        if !self.store.resolve(tenant_id, collision_id, &actor.id, notes, now)? {
            return Err(CoreError::InvalidState {
                kind: "collision",
                id: collision_id.to_string(),
                state: match existing.status {
                    CollisionStatus::Detected => "detected".to_string(),
                    CollisionStatus::Resolved => "resolved".to_string(),
                },
                operation: "resolve",
            });
        }

        tracing::info!(tenant_id, collision_id, resolved_by = %actor.id, "Collision resolved");
        self.store
            .get(tenant_id, collision_id)?
            .ok_or_else(|| CoreError::not_found("collision", collision_id))
    }

    pub fn list(&self, tenant_id: &str, pending_only: bool) -> CoreResult<Vec<CollisionRecord>> {
        Ok(self.store.list(tenant_id, pending_only)?)
    }

    pub fn statistics(&self, tenant_id: &str) -> CoreResult<CollisionStatistics> {
        let records = self.store.list(tenant_id, false)?;

        let mut by_type: BTreeMap<CollisionType, usize> = BTreeMap::new();
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        let mut stats = CollisionStatistics {
            total: records.len(),
            ..Default::default()
        };

        for record in &records {
            *by_type.entry(record.collision_type).or_default() += 1;
            *by_severity.entry(record.severity).or_default() += 1;
            match record.status {
                CollisionStatus::Resolved => stats.resolved += 1,
                CollisionStatus::Detected if record.review_required => stats.pending_review += 1,
                CollisionStatus::Detected => {}
            }
        }

        if stats.total > 0 {
            stats.resolution_rate = stats.resolved as f64 / stats.total as f64 * 100.0;
        }
        stats.by_type = by_type.into_iter().collect();
        stats.by_severity = by_severity.into_iter().collect();
        Ok(stats)
    }
}
