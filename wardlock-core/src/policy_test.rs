#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::policy::{LeasePolicy, TtlPolicy, MAX_BOUNDED_TTL_MINUTES};
    use crate::types::{LeaseType, ResourceType, MINUTE_MS, PERMANENT_EXPIRY};

    #[test]
    fn every_resource_type_accepts_some_lease_type() {
        for resource_type in ResourceType::ALL {
            assert!(!LeasePolicy::permitted(resource_type).is_empty());
        }
    }

    #[test]
    fn disallowed_pair_is_invalid_request() {
        let err = LeasePolicy::check_permitted(ResourceType::BillingJob, LeaseType::MedicalRecordEdit)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
        assert!(LeasePolicy::check_permitted(ResourceType::BillingJob, LeaseType::TussSubmission).is_ok());
    }

    #[test]
    fn default_ttl_comes_from_lease_type() {
        assert_eq!(
            LeasePolicy::effective_ttl_ms(LeaseType::MedicalRecordEdit, None).unwrap(),
            Some(15 * MINUTE_MS)
        );
        assert_eq!(
            LeasePolicy::effective_ttl_ms(LeaseType::AppointmentEdit, None).unwrap(),
            Some(5 * MINUTE_MS)
        );
    }

    #[test]
    fn requested_ttl_is_clamped_to_cap() {
        assert_eq!(
            LeasePolicy::effective_ttl_ms(LeaseType::PrescriptionEdit, Some(500)).unwrap(),
            Some(MAX_BOUNDED_TTL_MINUTES * MINUTE_MS)
        );
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(matches!(
            LeasePolicy::effective_ttl_ms(LeaseType::SyncEdit, Some(0)),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn finalization_leases_never_expire() {
        assert_eq!(LeasePolicy::ttl(LeaseType::RecordFinalization), TtlPolicy::Permanent);
        let ttl = LeasePolicy::effective_ttl_ms(LeaseType::RecordFinalization, Some(10)).unwrap();
        assert_eq!(ttl, None);
        assert_eq!(LeasePolicy::expiry(1_000, ttl), PERMANENT_EXPIRY);
    }
}
