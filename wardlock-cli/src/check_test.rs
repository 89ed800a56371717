#[cfg(test)]
mod tests {
    use crate::check::CheckInput;
    use wardlock_core::collision::CollisionDetector;
    use wardlock_core::config::CollisionRules;
    use wardlock_core::types::{CollisionType, DAY_MS};

    fn detector() -> CollisionDetector {
        CollisionDetector::new(CollisionRules::default())
    }

    #[test]
    fn diagnosis_input_uses_its_own_clock() {
        let input: CheckInput = serde_json::from_str(
            r#"{
                "check": "diagnosis",
                "patient_id": "pat1",
                "code": "F31",
                "now": 864000000,
                "history": [
                    {"id": "dx1", "patient_id": "pat1", "code": "F32", "recorded_at": 777600000}
                ]
            }"#,
        )
        .unwrap();

        let conflict = input.evaluate(&detector(), 365 * DAY_MS).unwrap();
        assert_eq!(conflict.collision_type, CollisionType::DiagnosisConflict);
        assert_eq!(conflict.conflicting_id, "dx1");
    }

    #[test]
    fn duplicate_submission_input_blocks() {
        let input: CheckInput = serde_json::from_str(
            r#"{
                "check": "duplicate_submission",
                "invoice_id": "inv1",
                "procedure_code": "10101012",
                "jobs": [
                    {"id": "job1", "invoice_id": "inv1", "procedure_code": "10101012",
                     "status": "submitted", "created_at": 1}
                ]
            }"#,
        )
        .unwrap();

        let conflict = input.evaluate(&detector(), 0).unwrap();
        assert!(conflict.blocking);
    }

    #[test]
    fn empty_history_has_no_conflict() {
        let input: CheckInput = serde_json::from_str(
            r#"{"check": "medication", "patient_id": "pat1", "medication": "warfarin"}"#,
        )
        .unwrap();
        assert!(input.evaluate(&detector(), 0).is_none());
    }

    #[test]
    fn unknown_check_is_rejected() {
        let parsed = serde_json::from_str::<CheckInput>(r#"{"check": "allergy"}"#);
        assert!(parsed.is_err());
    }
}
