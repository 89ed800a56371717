#[cfg(test)]
mod tests {
    use crate::collision::CollisionDetector;
    use crate::types::{
        ActiveMedication, BillingJob, CollisionType, DiagnosisRecord, ExamOrder, ResourceType,
        Severity, DAY_MS,
    };

    const NOW: u64 = 1_700_000_000_000;

    fn diagnosis(id: &str, code: &str, days_ago: u64) -> DiagnosisRecord {
        DiagnosisRecord {
            id: id.to_string(),
            patient_id: "pat1".to_string(),
            code: code.to_string(),
            recorded_at: NOW - days_ago * DAY_MS,
        }
    }

    fn job(id: &str, status: &str, created_at: u64) -> BillingJob {
        BillingJob {
            id: id.to_string(),
            invoice_id: "inv1".to_string(),
            procedure_code: "10101012".to_string(),
            status: status.to_string(),
            created_at,
        }
    }

    // =========================================================================
    // Diagnosis
    // =========================================================================

    #[test]
    fn antagonistic_diagnosis_within_lookback_conflicts() {
        let detector = CollisionDetector::default();
        let history = vec![diagnosis("d1", "F32", 5)];

        let conflict = detector
            .check_diagnosis("pat1", "F31", &history, NOW)
            .expect("F31 after F32 should conflict");
        assert_eq!(conflict.collision_type, CollisionType::DiagnosisConflict);
        assert_eq!(conflict.severity, Severity::High);
        assert!(conflict.review_required);
        assert!(!conflict.blocking);
        assert_eq!(conflict.conflicting_id, "d1");
        assert_eq!(conflict.conflicting_resource_type, ResourceType::Diagnosis);
    }

    #[test]
    fn same_diagnosis_again_is_not_a_conflict() {
        let detector = CollisionDetector::default();
        let history = vec![diagnosis("d1", "F32", 5)];
        assert!(detector.check_diagnosis("pat1", "F32", &history, NOW).is_none());
    }

    #[test]
    fn diagnosis_outside_lookback_is_ignored() {
        let detector = CollisionDetector::default();
        let history = vec![diagnosis("d1", "F32", 31)];
        assert!(detector.check_diagnosis("pat1", "F31", &history, NOW).is_none());
    }

    #[test]
    fn diagnosis_codes_are_normalized() {
        let detector = CollisionDetector::default();
        let history = vec![diagnosis("d1", " f32 ", 1)];
        assert!(detector.check_diagnosis("pat1", "f31", &history, NOW).is_some());
    }

    #[test]
    fn most_recent_antagonist_is_reported() {
        let detector = CollisionDetector::default();
        let history = vec![diagnosis("old", "F32", 20), diagnosis("recent", "F33", 2)];
        let conflict = detector.check_diagnosis("pat1", "F31", &history, NOW).unwrap();
        assert_eq!(conflict.conflicting_id, "recent");
    }

    #[test]
    fn other_patients_history_is_ignored() {
        let detector = CollisionDetector::default();
        let mut other = diagnosis("d1", "F32", 1);
        other.patient_id = "pat2".to_string();
        assert!(detector.check_diagnosis("pat1", "F31", &[other], NOW).is_none());
    }

    // =========================================================================
    // Duplicate submission
    // =========================================================================

    #[test]
    fn live_submission_blocks_resubmission() {
        let detector = CollisionDetector::default();
        let jobs = vec![job("job1", "submitted", 10)];

        let conflict = detector
            .check_duplicate_submission("inv1", "10101012", &jobs)
            .expect("second submission should conflict");
        assert_eq!(conflict.collision_type, CollisionType::DuplicateSubmission);
        assert_eq!(conflict.conflicting_id, "job1");
        assert_eq!(conflict.severity, Severity::Critical);
        assert!(conflict.blocking);
        assert!(!conflict.review_required);
    }

    #[test]
    fn rejected_submission_frees_the_pair() {
        let detector = CollisionDetector::default();
        let jobs = vec![job("job1", "rejected", 10)];
        assert!(detector.check_duplicate_submission("inv1", "10101012", &jobs).is_none());
    }

    #[test]
    fn earliest_live_job_is_reported() {
        let detector = CollisionDetector::default();
        let jobs = vec![
            job("job3", "submitted", 30),
            job("job1", "rejected", 10),
            job("job2", "accepted", 20),
        ];
        let conflict = detector.check_duplicate_submission("inv1", "10101012", &jobs).unwrap();
        assert_eq!(conflict.conflicting_id, "job2");
    }

    #[test]
    fn different_procedure_does_not_conflict() {
        let detector = CollisionDetector::default();
        let jobs = vec![job("job1", "submitted", 10)];
        assert!(detector.check_duplicate_submission("inv1", "99999999", &jobs).is_none());
    }

    // =========================================================================
    // Exams and medications
    // =========================================================================

    #[test]
    fn overlapping_exam_within_week_conflicts() {
        let detector = CollisionDetector::default();
        let history = vec![ExamOrder {
            id: "ex1".to_string(),
            patient_id: "pat1".to_string(),
            exam_code: "ECG".to_string(),
            ordered_at: NOW - 3 * DAY_MS,
        }];

        let conflict = detector.check_exam("pat1", "HOLTER", &history, NOW).unwrap();
        assert_eq!(conflict.severity, Severity::Medium);
        assert!(conflict.review_required);

        assert!(detector
            .check_exam("pat1", "HOLTER", &history, NOW + 5 * DAY_MS)
            .is_none());
    }

    #[test]
    fn medication_interaction_is_case_insensitive_both_ways() {
        let detector = CollisionDetector::default();
        let active = vec![ActiveMedication {
            id: "m1".to_string(),
            patient_id: "pat1".to_string(),
            name: "Aspirina".to_string(),
        }];

        let conflict = detector.check_medication("pat1", "warfarina", &active).unwrap();
        assert_eq!(conflict.collision_type, CollisionType::MedicationConflict);
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.conflicting_value, "ASPIRINA");

        let reversed = vec![ActiveMedication {
            id: "m2".to_string(),
            patient_id: "pat1".to_string(),
            name: "WARFARINA".to_string(),
        }];
        assert!(detector.check_medication("pat1", "aspirina", &reversed).is_some());
        assert!(detector.check_medication("pat1", "paracetamol", &reversed).is_none());
    }

    // =========================================================================
    // Service: history lookup and persisted records
    // =========================================================================

    mod service {
        use super::*;
        use crate::clock::ManualClock;
        use crate::collision_service::CollisionService;
        use crate::error::CoreError;
        use crate::infrastructure::ClinicalHistory;
        use crate::infrastructure_in_memory::InMemoryStore;
        use crate::types::{Actor, ActorRole, CollisionStatus};
        use std::sync::Arc;

        fn setup() -> (CollisionService, Arc<InMemoryStore>) {
            let store = Arc::new(InMemoryStore::new());
            let service = CollisionService::new(
                CollisionDetector::default(),
                store.clone(),
                store.clone(),
                Arc::new(ManualClock::new(NOW)),
            );
            (service, store)
        }

        fn doctor() -> Actor {
            Actor::new("dr_a", ActorRole::Physician)
        }

        #[test]
        fn diagnosis_conflict_is_persisted_for_review() {
            let (service, store) = setup();
            store.record_diagnosis("t1", &diagnosis("d1", "F32", 5)).unwrap();

            let record = service
                .check_diagnosis("t1", &doctor(), "pat1", "F31")
                .unwrap()
                .expect("conflict expected");
            assert!(record.id.starts_with("col_"));
            assert_eq!(record.resource_type, ResourceType::MedicalRecord);
            assert_eq!(record.resource_id, "pat1");
            assert_eq!(record.conflicting_resource_id.as_deref(), Some("d1"));
            assert_eq!(record.status, CollisionStatus::Detected);
            assert_eq!(record.detection_meta["conflicting_value"], "F32");

            assert!(service.check_diagnosis("t1", &doctor(), "pat1", "F32").unwrap().is_none());
            assert_eq!(service.list("t1", true).unwrap().len(), 1);
        }

        #[test]
        fn duplicate_submission_tracks_rejection() {
            let (service, store) = setup();
            store.record_billing_job("t1", &job("job1", "submitted", 10)).unwrap();

            let record = service
                .check_duplicate_submission("t1", &doctor(), "inv1", "10101012")
                .unwrap()
                .unwrap();
            assert!(record.blocking);
            assert_eq!(record.conflicting_resource_id.as_deref(), Some("job1"));

            let (service, store) = setup();
            store.record_billing_job("t1", &job("job1", "rejected", 10)).unwrap();
            assert!(service
                .check_duplicate_submission("t1", &doctor(), "inv1", "10101012")
                .unwrap()
                .is_none());
        }

        #[test]
        fn empty_input_is_rejected() {
            let (service, _) = setup();
            let err = service.check_medication("t1", &doctor(), "pat1", " ").unwrap_err();
            assert!(matches!(err, CoreError::InvalidRequest(_)));
        }

        #[test]
        fn resolve_once_then_invalid_state() {
            let (service, store) = setup();
            store
                .record_medication(
                    "t1",
                    &ActiveMedication {
                        id: "m1".to_string(),
                        patient_id: "pat1".to_string(),
                        name: "ASPIRINA".to_string(),
                    },
                )
                .unwrap();
            let record = service
                .check_medication("t1", &doctor(), "pat1", "Warfarina")
                .unwrap()
                .unwrap();
            assert_eq!(record.resource_type, ResourceType::Prescription);

            let admin = Actor::new("admin1", ActorRole::Admin);
            let resolved = service.resolve("t1", &record.id, &admin, "checked dosage").unwrap();
            assert_eq!(resolved.status, CollisionStatus::Resolved);
            assert_eq!(resolved.resolved_by.as_deref(), Some("admin1"));

            let err = service.resolve("t1", &record.id, &admin, "again").unwrap_err();
            assert!(matches!(err, CoreError::InvalidState { .. }));
            let err = service.resolve("t1", "col_missing", &admin, "x").unwrap_err();
            assert!(matches!(err, CoreError::NotFound { .. }));
        }

        #[test]
        fn statistics_summarize_by_type_and_severity() {
            let (service, store) = setup();
            store.record_diagnosis("t1", &diagnosis("d1", "F32", 1)).unwrap();
            store.record_billing_job("t1", &job("job1", "submitted", 10)).unwrap();

            let diag = service.check_diagnosis("t1", &doctor(), "pat1", "F31").unwrap().unwrap();
            service
                .check_duplicate_submission("t1", &doctor(), "inv1", "10101012")
                .unwrap();
            service
                .resolve("t1", &diag.id, &Actor::new("admin1", ActorRole::Admin), "ok")
                .unwrap();

            let stats = service.statistics("t1").unwrap();
            assert_eq!(stats.total, 2);
            assert_eq!(stats.resolved, 1);
            // The duplicate submission blocks but needs no review
            assert_eq!(stats.pending_review, 0);
            assert_eq!(stats.resolution_rate, 50.0);
            assert_eq!(
                stats.by_severity,
                vec![(Severity::High, 1), (Severity::Critical, 1)]
            );
        }
    }
}
