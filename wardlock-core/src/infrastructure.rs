//! Storage contracts. Every backend must uphold the invariants stated on each
//! trait; the services rely on them instead of coordinating in memory.

use crate::error::{CoreError, StoreError};
use crate::types::*;

/// Defines the contract for lease storage backends.
///
/// Backends must reject a second `Active` lease for the same
/// (tenant, resource type, resource id) with [`StoreError::UniqueViolation`].
pub trait LeaseStore: Send + Sync {
    /// Insert a new `Active` lease.
    fn insert_active(&self, lease: &ResourceLease) -> Result<(), StoreError>;

    fn get(&self, tenant_id: &str, lease_id: &str) -> Result<Option<ResourceLease>, StoreError>;

    /// The lease currently stored as `Active` for `resource`, overdue or not.
    fn find_active(&self, resource: &ResourceRef) -> Result<Option<ResourceLease>, StoreError>;

    /// Overwrite `lease` only while the stored row is still `Active`.
    /// Returns false when someone else moved it first.
    fn update_if_active(&self, lease: &ResourceLease) -> Result<bool, StoreError>;

    /// Mark one lease `Expired` only if the stored row is `Active` and its
    /// stored expiry is at or before `now`. A heartbeat that landed after the
    /// caller read the lease makes this a no-op returning false.
    fn expire_if_overdue(&self, tenant_id: &str, lease_id: &str, now: u64)
    -> Result<bool, StoreError>;

    fn list(
        &self,
        tenant_id: &str,
        state: Option<LeaseState>,
    ) -> Result<Vec<ResourceLease>, StoreError>;

    /// Mark every overdue `Active` lease `Expired`. `None` sweeps all tenants.
    fn expire_overdue(&self, tenant_id: Option<&str>, now: u64) -> Result<usize, StoreError>;
}

/// Append-only audit trail. Rows are never updated once written.
pub trait AuditSink: Send + Sync {
    fn record_lease(&self, entry: &LeaseAuditEntry) -> Result<(), StoreError>;

    fn record_queue(&self, entry: &QueueAuditEntry) -> Result<(), StoreError>;

    /// Newest first.
    fn lease_audit(
        &self,
        tenant_id: &str,
        lease_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LeaseAuditEntry>, StoreError>;

    /// Newest first.
    fn queue_audit(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueAuditEntry>, StoreError>;
}

pub trait CollisionStore: Send + Sync {
    fn insert(&self, record: &CollisionRecord) -> Result<(), StoreError>;

    fn get(&self, tenant_id: &str, id: &str) -> Result<Option<CollisionRecord>, StoreError>;

    /// Mark a detected collision resolved. False if absent or already resolved.
    fn resolve(
        &self,
        tenant_id: &str,
        id: &str,
        actor_id: &str,
        notes: &str,
        now: u64,
    ) -> Result<bool, StoreError>;

    fn list(&self, tenant_id: &str, pending_only: bool)
    -> Result<Vec<CollisionRecord>, StoreError>;
}

/// Boundary to the clinical and billing records owned by other services.
/// The collision service reads its history windows through this trait.
pub trait ClinicalHistory: Send + Sync {
    fn diagnoses_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<DiagnosisRecord>, StoreError>;

    /// Every billing job ever submitted for the invoice.
    fn billing_jobs(&self, tenant_id: &str, invoice_id: &str)
    -> Result<Vec<BillingJob>, StoreError>;

    fn exams_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<ExamOrder>, StoreError>;

    fn active_medications(
        &self,
        tenant_id: &str,
        patient_id: &str,
    ) -> Result<Vec<ActiveMedication>, StoreError>;

    fn record_diagnosis(&self, tenant_id: &str, record: &DiagnosisRecord)
    -> Result<(), StoreError>;

    fn record_billing_job(&self, tenant_id: &str, job: &BillingJob) -> Result<(), StoreError>;

    fn record_exam(&self, tenant_id: &str, exam: &ExamOrder) -> Result<(), StoreError>;

    fn record_medication(
        &self,
        tenant_id: &str,
        medication: &ActiveMedication,
    ) -> Result<(), StoreError>;
}

/// Reads and writes available inside a queue transaction. Reads observe the
/// transaction's own writes.
pub trait QueueTxn {
    /// Active entries of the transaction's clinician, in no particular order.
    fn active_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError>;

    /// An active entry anywhere in the tenant for this patient or appointment.
    fn find_active_for(
        &mut self,
        patient_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError>;

    fn get(&mut self, entry_id: &str) -> Result<Option<QueueEntry>, StoreError>;

    /// Most recently enqueued entry for the appointment, any status.
    fn latest_for_appointment(
        &mut self,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Monotonic insertion sequence for FIFO tie-breaks.
    fn next_seq(&mut self) -> Result<u64, StoreError>;

    fn insert(&mut self, entry: &QueueEntry) -> Result<(), StoreError>;

    fn update(&mut self, entry: &QueueEntry) -> Result<(), StoreError>;

    /// Mark the appointment's encounter completed.
    fn complete_encounter(
        &mut self,
        appointment_id: &str,
        notes: Option<&str>,
        now: u64,
    ) -> Result<(), StoreError>;
}

/// Queue storage.
///
/// Backends must keep at most one active entry per (tenant, patient) and per
/// (tenant, appointment), failing the commit with
/// [`StoreError::UniqueViolation`] otherwise.
pub trait QueueStore: Send + Sync {
    /// Run `work` atomically. Transactions for the same (tenant, clinician)
    /// are serialized against each other. If `work` fails nothing it wrote
    /// is kept.
    fn transact(
        &self,
        tenant_id: &str,
        clinician_id: &str,
        work: &mut dyn FnMut(&mut dyn QueueTxn) -> Result<(), CoreError>,
    ) -> Result<(), CoreError>;

    fn get(&self, tenant_id: &str, entry_id: &str) -> Result<Option<QueueEntry>, StoreError>;

    fn latest_for_appointment(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Ordered by clinician, then position.
    fn list_active(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError>;

    /// Every entry, any status.
    fn list_all(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError>;

    fn encounter_status(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<String>, StoreError>;
}
