//! Lease policy: how long each lease type lives and which lease types a
//! resource type accepts.

use crate::error::CoreError;
use crate::types::{LeaseType, ResourceType, MINUTE_MS, PERMANENT_EXPIRY};

/// Hard cap for every bounded lease type.
pub const MAX_BOUNDED_TTL_MINUTES: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Default and maximum TTL in minutes
    Bounded { default_minutes: u64, max_minutes: u64 },
    /// Held until released or force-released
    Permanent,
}

pub struct LeasePolicy;

impl LeasePolicy {
    pub fn ttl(lease_type: LeaseType) -> TtlPolicy {
        let bounded = |default_minutes| TtlPolicy::Bounded {
            default_minutes,
            max_minutes: MAX_BOUNDED_TTL_MINUTES,
        };
        match lease_type {
            LeaseType::MedicalRecordEdit => bounded(15),
            LeaseType::PrescriptionEdit => bounded(10),
            LeaseType::AppointmentEdit => bounded(5),
            LeaseType::SadtSubmission => bounded(5),
            LeaseType::TussSubmission => bounded(5),
            LeaseType::DiagnosisEntry => bounded(10),
            LeaseType::ExamOrderEdit => bounded(10),
            LeaseType::SyncEdit => bounded(15),
            LeaseType::RecordFinalization => TtlPolicy::Permanent,
        }
    }

    pub fn permitted(resource_type: ResourceType) -> &'static [LeaseType] {
        match resource_type {
            ResourceType::MedicalRecord => &[
                LeaseType::MedicalRecordEdit,
                LeaseType::SyncEdit,
                LeaseType::RecordFinalization,
            ],
            ResourceType::Prescription => &[
                LeaseType::PrescriptionEdit,
                LeaseType::SyncEdit,
                LeaseType::RecordFinalization,
            ],
            ResourceType::Appointment => &[LeaseType::AppointmentEdit, LeaseType::SyncEdit],
            ResourceType::BillingJob => &[LeaseType::SadtSubmission, LeaseType::TussSubmission],
            ResourceType::Diagnosis => &[LeaseType::DiagnosisEntry],
            ResourceType::ExamOrder => &[LeaseType::ExamOrderEdit],
        }
    }

    pub fn check_permitted(
        resource_type: ResourceType,
        lease_type: LeaseType,
    ) -> Result<(), CoreError> {
        if Self::permitted(resource_type).contains(&lease_type) {
            Ok(())
        } else {
            Err(CoreError::InvalidRequest(format!(
                "lease type '{}' is not allowed on resource type '{}'",
                lease_type, resource_type
            )))
        }
    }

    /// Resolve the effective TTL in milliseconds. `None` means the lease
    /// never expires. A requested TTL above the cap is clamped; zero is rejected.
    pub fn effective_ttl_ms(
        lease_type: LeaseType,
        requested_minutes: Option<u64>,
    ) -> Result<Option<u64>, CoreError> {
        if requested_minutes == Some(0) {
            return Err(CoreError::InvalidRequest(
                "ttl must be greater than 0".to_string(),
            ));
        }
        match Self::ttl(lease_type) {
            TtlPolicy::Permanent => Ok(None),
            TtlPolicy::Bounded {
                default_minutes,
                max_minutes,
            } => {
                let minutes = requested_minutes.unwrap_or(default_minutes).min(max_minutes);
                Ok(Some(minutes * MINUTE_MS))
            }
        }
    }

    /// Expiry timestamp for a lease starting at `now`.
    pub fn expiry(now: u64, ttl_ms: Option<u64>) -> u64 {
        match ttl_ms {
            Some(ttl) => now.saturating_add(ttl).min(PERMANENT_EXPIRY),
            None => PERMANENT_EXPIRY,
        }
    }
}
