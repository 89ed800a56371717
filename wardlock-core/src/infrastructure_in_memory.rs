use crate::error::{CoreError, StoreError};
use crate::infrastructure::{
    AuditSink, ClinicalHistory, CollisionStore, LeaseStore, QueueStore, QueueTxn,
};
use crate::keyed::KeyedMutex;
use crate::types::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    // Map of Lease ID -> Lease
    leases: HashMap<String, ResourceLease>,
    lease_audit: Vec<LeaseAuditEntry>,
    queue_audit: Vec<QueueAuditEntry>,
    collisions: HashMap<String, CollisionRecord>,
    // Histories keyed by tenant
    diagnoses: HashMap<String, Vec<DiagnosisRecord>>,
    billing_jobs: HashMap<String, Vec<BillingJob>>,
    exams: HashMap<String, Vec<ExamOrder>>,
    medications: HashMap<String, Vec<ActiveMedication>>,
    // Map of Entry ID -> Entry
    queue: HashMap<String, QueueEntry>,
    // (tenant, appointment) -> encounter status
    encounters: HashMap<(String, String), String>,
    seq: u64,
}

/// Process-local store implementing every storage trait.
///
/// Queue transactions stage their writes and validate the active-entry
/// uniqueness rules against committed state at commit time.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    clinicians: KeyedMutex<(String, String)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

fn newest_first<T: Clone>(rows: &[T], keep: impl Fn(&T) -> bool, limit: usize) -> Vec<T> {
    rows.iter().rev().filter(|r| keep(r)).take(limit).cloned().collect()
}

impl LeaseStore for InMemoryStore {
    fn insert_active(&self, lease: &ResourceLease) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let taken = state.leases.values().any(|l| {
            l.state == LeaseState::Active
                && l.tenant_id == lease.tenant_id
                && l.resource_type == lease.resource_type
                && l.resource_id == lease.resource_id
        });
        if taken {
            return Err(StoreError::UniqueViolation(format!(
                "active lease exists for {}",
                lease.resource().key()
            )));
        }
        state.leases.insert(lease.id.clone(), lease.clone());
        Ok(())
    }

    fn get(&self, tenant_id: &str, lease_id: &str) -> Result<Option<ResourceLease>, StoreError> {
        Ok(self
            .lock()?
            .leases
            .get(lease_id)
            .filter(|l| l.tenant_id == tenant_id)
            .cloned())
    }

    fn find_active(&self, resource: &ResourceRef) -> Result<Option<ResourceLease>, StoreError> {
        Ok(self
            .lock()?
            .leases
            .values()
            .find(|l| l.state == LeaseState::Active && l.resource() == *resource)
            .cloned())
    }

    fn update_if_active(&self, lease: &ResourceLease) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.leases.get_mut(&lease.id) {
            Some(stored) if stored.state == LeaseState::Active => {
                *stored = lease.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn expire_if_overdue(&self, tenant_id: &str, lease_id: &str, now: u64) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.leases.get_mut(lease_id) {
            Some(stored)
                if stored.tenant_id == tenant_id
                    && stored.state == LeaseState::Active
                    && stored.is_overdue(now) =>
            {
                stored.state = LeaseState::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(
        &self,
        tenant_id: &str,
        state_filter: Option<LeaseState>,
    ) -> Result<Vec<ResourceLease>, StoreError> {
        let mut leases: Vec<ResourceLease> = self
            .lock()?
            .leases
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .filter(|l| state_filter.is_none_or(|s| l.state == s))
            .cloned()
            .collect();
        leases.sort_by(|a, b| b.acquired_at.cmp(&a.acquired_at).then(a.id.cmp(&b.id)));
        Ok(leases)
    }

    fn expire_overdue(&self, tenant_id: Option<&str>, now: u64) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let mut expired = 0;
        for lease in state.leases.values_mut() {
            if lease.state == LeaseState::Active
                && lease.is_overdue(now)
                && tenant_id.is_none_or(|t| lease.tenant_id == t)
            {
                lease.state = LeaseState::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

impl AuditSink for InMemoryStore {
    fn record_lease(&self, entry: &LeaseAuditEntry) -> Result<(), StoreError> {
        self.lock()?.lease_audit.push(entry.clone());
        Ok(())
    }

    fn record_queue(&self, entry: &QueueAuditEntry) -> Result<(), StoreError> {
        self.lock()?.queue_audit.push(entry.clone());
        Ok(())
    }

    fn lease_audit(
        &self,
        tenant_id: &str,
        lease_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LeaseAuditEntry>, StoreError> {
        let state = self.lock()?;
        Ok(newest_first(
            &state.lease_audit,
            |e| {
                e.tenant_id == tenant_id
                    && lease_id.is_none_or(|id| e.lease_id.as_deref() == Some(id))
            },
            limit,
        ))
    }

    fn queue_audit(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueAuditEntry>, StoreError> {
        let state = self.lock()?;
        Ok(newest_first(
            &state.queue_audit,
            |e| {
                e.tenant_id == tenant_id
                    && clinician_id.is_none_or(|c| e.clinician_id.as_deref() == Some(c))
            },
            limit,
        ))
    }
}

impl CollisionStore for InMemoryStore {
    fn insert(&self, record: &CollisionRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.collisions.contains_key(&record.id) {
            return Err(StoreError::UniqueViolation(format!(
                "collision '{}' already recorded",
                record.id
            )));
        }
        state.collisions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, tenant_id: &str, id: &str) -> Result<Option<CollisionRecord>, StoreError> {
        Ok(self
            .lock()?
            .collisions
            .get(id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    fn resolve(
        &self,
        tenant_id: &str,
        id: &str,
        actor_id: &str,
        notes: &str,
        now: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.collisions.get_mut(id) {
            Some(c) if c.tenant_id == tenant_id && c.status == CollisionStatus::Detected => {
                c.status = CollisionStatus::Resolved;
                c.resolved_by = Some(actor_id.to_string());
                c.resolved_at = Some(now);
                c.resolution_notes = Some(notes.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(
        &self,
        tenant_id: &str,
        pending_only: bool,
    ) -> Result<Vec<CollisionRecord>, StoreError> {
        let mut records: Vec<CollisionRecord> = self
            .lock()?
            .collisions
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| !pending_only || c.status == CollisionStatus::Detected)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

impl ClinicalHistory for InMemoryStore {
    fn diagnoses_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<DiagnosisRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .diagnoses
            .get(tenant_id)
            .map(|rows| {
                rows.iter()
                    .filter(|d| d.patient_id == patient_id && d.recorded_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn billing_jobs(
        &self,
        tenant_id: &str,
        invoice_id: &str,
    ) -> Result<Vec<BillingJob>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .billing_jobs
            .get(tenant_id)
            .map(|rows| {
                rows.iter()
                    .filter(|j| j.invoice_id == invoice_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn exams_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<ExamOrder>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .exams
            .get(tenant_id)
            .map(|rows| {
                rows.iter()
                    .filter(|e| e.patient_id == patient_id && e.ordered_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn active_medications(
        &self,
        tenant_id: &str,
        patient_id: &str,
    ) -> Result<Vec<ActiveMedication>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .medications
            .get(tenant_id)
            .map(|rows| {
                rows.iter()
                    .filter(|m| m.patient_id == patient_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn record_diagnosis(
        &self,
        tenant_id: &str,
        record: &DiagnosisRecord,
    ) -> Result<(), StoreError> {
        self.lock()?
            .diagnoses
            .entry(tenant_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn record_billing_job(&self, tenant_id: &str, job: &BillingJob) -> Result<(), StoreError> {
        self.lock()?
            .billing_jobs
            .entry(tenant_id.to_string())
            .or_default()
            .push(job.clone());
        Ok(())
    }

    fn record_exam(&self, tenant_id: &str, exam: &ExamOrder) -> Result<(), StoreError> {
        self.lock()?
            .exams
            .entry(tenant_id.to_string())
            .or_default()
            .push(exam.clone());
        Ok(())
    }

    fn record_medication(
        &self,
        tenant_id: &str,
        medication: &ActiveMedication,
    ) -> Result<(), StoreError> {
        self.lock()?
            .medications
            .entry(tenant_id.to_string())
            .or_default()
            .push(medication.clone());
        Ok(())
    }
}

// ─── Queue Transactions ─────────────────────────────────────────────────────

struct InMemoryTxn<'a> {
    store: &'a InMemoryStore,
    tenant_id: &'a str,
    clinician_id: &'a str,
    staged: HashMap<String, QueueEntry>,
    completed_encounters: Vec<String>,
}

impl InMemoryTxn<'_> {
    /// Tenant entries as this transaction sees them.
    fn view(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let state = self.store.lock()?;
        let mut entries: Vec<QueueEntry> = state
            .queue
            .values()
            .filter(|e| e.tenant_id == self.tenant_id && !self.staged.contains_key(&e.id))
            .cloned()
            .collect();
        entries.extend(self.staged.values().cloned());
        Ok(entries)
    }

    fn commit(self) -> Result<(), StoreError> {
        let mut state = self.store.lock()?;

        let mut active_patients: HashMap<&str, &str> = HashMap::new();
        let mut active_appointments: HashMap<&str, &str> = HashMap::new();
        let merged = state
            .queue
            .values()
            .filter(|e| e.tenant_id == self.tenant_id && !self.staged.contains_key(&e.id))
            .chain(self.staged.values())
            .filter(|e| e.status.is_active());
        for entry in merged {
            if let Some(other) = active_patients.insert(&entry.patient_id, &entry.id) {
                return Err(StoreError::UniqueViolation(format!(
                    "patient '{}' already active in entry '{}'",
                    entry.patient_id, other
                )));
            }
            if let Some(other) = active_appointments.insert(&entry.appointment_id, &entry.id) {
                return Err(StoreError::UniqueViolation(format!(
                    "appointment '{}' already active in entry '{}'",
                    entry.appointment_id, other
                )));
            }
        }

        for (id, entry) in self.staged {
            state.queue.insert(id, entry);
        }
        for appointment_id in self.completed_encounters {
            state.encounters.insert(
                (self.tenant_id.to_string(), appointment_id),
                "completed".to_string(),
            );
        }
        Ok(())
    }
}

impl QueueTxn for InMemoryTxn<'_> {
    fn active_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .view()?
            .into_iter()
            .filter(|e| e.clinician_id == self.clinician_id && e.status.is_active())
            .collect())
    }

    fn find_active_for(
        &mut self,
        patient_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self.view()?.into_iter().find(|e| {
            e.status.is_active()
                && (e.patient_id == patient_id || e.appointment_id == appointment_id)
        }))
    }

    fn get(&mut self, entry_id: &str) -> Result<Option<QueueEntry>, StoreError> {
        if let Some(entry) = self.staged.get(entry_id) {
            return Ok(Some(entry.clone()));
        }
        Ok(self
            .store
            .lock()?
            .queue
            .get(entry_id)
            .filter(|e| e.tenant_id == self.tenant_id)
            .cloned())
    }

    fn latest_for_appointment(
        &mut self,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .view()?
            .into_iter()
            .filter(|e| e.appointment_id == appointment_id)
            .max_by_key(|e| (e.enqueued_at, e.seq)))
    }

    fn next_seq(&mut self) -> Result<u64, StoreError> {
        let mut state = self.store.lock()?;
        state.seq += 1;
        Ok(state.seq)
    }

    fn insert(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        if self.staged.contains_key(&entry.id) || self.store.lock()?.queue.contains_key(&entry.id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "queue entry '{}' already exists",
                entry.id
            )));
        }
        self.staged.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn update(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        self.staged.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn complete_encounter(
        &mut self,
        appointment_id: &str,
        _notes: Option<&str>,
        _now: u64,
    ) -> Result<(), StoreError> {
        self.completed_encounters.push(appointment_id.to_string());
        Ok(())
    }
}

impl QueueStore for InMemoryStore {
    fn transact(
        &self,
        tenant_id: &str,
        clinician_id: &str,
        work: &mut dyn FnMut(&mut dyn QueueTxn) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let key = (tenant_id.to_string(), clinician_id.to_string());
        self.clinicians.with(&key, || {
            let mut txn = InMemoryTxn {
                store: self,
                tenant_id,
                clinician_id,
                staged: HashMap::new(),
                completed_encounters: Vec::new(),
            };
            work(&mut txn)?;
            txn.commit()?;
            Ok(())
        })
    }

    fn get(&self, tenant_id: &str, entry_id: &str) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .lock()?
            .queue
            .get(entry_id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned())
    }

    fn latest_for_appointment(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self
            .lock()?
            .queue
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.appointment_id == appointment_id)
            .max_by_key(|e| (e.enqueued_at, e.seq))
            .cloned())
    }

    fn list_active(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let mut entries: Vec<QueueEntry> = self
            .list_all(tenant_id, clinician_id)?
            .into_iter()
            .filter(|e| e.status.is_active())
            .collect();
        entries.sort_by(|a, b| {
            a.clinician_id
                .cmp(&b.clinician_id)
                .then(a.position.cmp(&b.position))
        });
        Ok(entries)
    }

    fn list_all(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let mut entries: Vec<QueueEntry> = self
            .lock()?
            .queue
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| clinician_id.is_none_or(|c| e.clinician_id == c))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.enqueued_at, e.seq));
        Ok(entries)
    }

    fn encounter_status(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .encounters
            .get(&(tenant_id.to_string(), appointment_id.to_string()))
            .cloned())
    }
}
