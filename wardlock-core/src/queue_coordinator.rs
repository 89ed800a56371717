//! Per-clinician waiting queues.
//!
//! Every mutation runs inside one store transaction, behind a mutex keyed by
//! (tenant, clinician). Inside it the clinician's active entries are loaded,
//! changed, renumbered 1..N and written back, so positions never show a gap
//! or a duplicate. Audit rows and push events are emitted after commit.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult, StoreError};
use crate::infrastructure::{AuditSink, QueueStore, QueueTxn};
use crate::keyed::KeyedMutex;
use crate::notify::{QueueEvent, SubscriberRegistry};
use crate::scheduler::QueueScheduler;
use crate::types::*;

/// Whole-transaction retries when another clinician's queue claimed the
/// same patient or appointment between our check and our commit.
const MAX_ENQUEUE_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub tenant_id: String,
    pub appointment_id: String,
    pub patient_id: String,
    pub clinician_id: String,
    pub priority: Priority,
    pub notes: Option<String>,
}

/// Side effects of a committed transaction.
#[derive(Debug, Default)]
struct Effects {
    audit: Vec<QueueAuditEntry>,
    events: Vec<QueueEvent>,
}

impl Effects {
    fn snapshot(&mut self, tenant_id: &str, clinician_id: &str, active: &[QueueEntry]) {
        self.events.push(QueueEvent::QueueSnapshotChanged {
            tenant_id: tenant_id.to_string(),
            clinician_id: clinician_id.to_string(),
            active: active.to_vec(),
        });
    }

    fn removed(&mut self, entry: &QueueEntry, reason: &str) {
        self.events.push(QueueEvent::PatientRemoved {
            tenant_id: entry.tenant_id.clone(),
            clinician_id: entry.clinician_id.clone(),
            entry_id: entry.id.clone(),
            patient_id: entry.patient_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn called(&mut self, entry: &QueueEntry) {
        self.events.push(QueueEvent::PatientCalled {
            tenant_id: entry.tenant_id.clone(),
            clinician_id: entry.clinician_id.clone(),
            entry: entry.clone(),
        });
    }
}

/// Renumber and re-estimate `working`, then persist whatever differs from
/// `stored`. Entries that left the active set must be written by the caller.
fn write_back(
    txn: &mut dyn QueueTxn,
    stored: &[QueueEntry],
    working: &mut Vec<QueueEntry>,
    config: &QueueConfig,
    now: u64,
) -> Result<(), StoreError> {
    working.retain(|e| e.status.is_active());
    QueueScheduler::renumber(working);
    QueueScheduler::refresh_estimates(working, config, now);

    for entry in working.iter() {
        match stored.iter().find(|s| s.id == entry.id) {
            None => txn.insert(entry)?,
            Some(before) if before != entry => txn.update(entry)?,
            Some(_) => {}
        }
    }
    Ok(())
}

/// Take `entry_id` out of the working set and close it with `status`.
fn close(
    working: &mut Vec<QueueEntry>,
    entry_id: &str,
    status: QueueStatus,
    now: u64,
) -> Option<QueueEntry> {
    let idx = working.iter().position(|e| e.id == entry_id)?;
    let mut entry = working.remove(idx);
    entry.status = status;
    entry.service_ended_at = Some(now);
    entry.estimated_wait_minutes = None;
    entry.estimated_call_at = None;
    Some(entry)
}

fn invalid_state(entry: &QueueEntry, operation: &'static str) -> CoreError {
    CoreError::InvalidState {
        kind: "queue entry",
        id: entry.id.clone(),
        state: entry.status.as_str().to_string(),
        operation,
    }
}

pub struct QueueCoordinator {
    store: Arc<dyn QueueStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    clinicians: KeyedMutex<(String, String)>,
}

impl QueueCoordinator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<SubscriberRegistry>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            clock,
            config,
            clinicians: KeyedMutex::new(),
        }
    }

    pub fn notifier(&self) -> &Arc<SubscriberRegistry> {
        &self.notifier
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Run `body` as one transaction on the clinician's queue, then emit its
    /// audit rows and events.
    fn run<T>(
        &self,
        tenant_id: &str,
        clinician_id: &str,
        mut body: impl FnMut(&mut dyn QueueTxn, &mut Effects) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let key = (tenant_id.to_string(), clinician_id.to_string());
        let (value, effects) = self.clinicians.with(&key, || {
            let mut out = None;
            self.store
                .transact(tenant_id, clinician_id, &mut |txn: &mut dyn QueueTxn| {
                    let mut effects = Effects::default();
                    let value = body(txn, &mut effects)?;
                    out = Some((value, effects));
                    Ok::<(), CoreError>(())
                })?;
            out.ok_or_else(|| {
                CoreError::Storage(StoreError::Backend(
                    "queue transaction committed without a result".to_string(),
                ))
            })
        })?;

        for entry in &effects.audit {
            self.record(entry);
        }
        for event in &effects.events {
            let delivered = self.notifier.publish(event);
            tracing::debug!(tenant_id, clinician_id, event = event.kind(), delivered, "Queue event published");
        }
        Ok(value)
    }

    fn record(&self, entry: &QueueAuditEntry) {
        if let Err(e) = self.audit.record_queue(entry) {
            tracing::warn!(
                tenant_id = %entry.tenant_id,
                operation = entry.operation.as_str(),
                error = %e,
                "Failed to write queue audit entry"
            );
        }
    }

    fn record_failure(
        &self,
        tenant_id: &str,
        operation: QueueOperation,
        actor: &Actor,
        clinician_id: Option<&str>,
        err: &CoreError,
        context: serde_json::Value,
    ) {
        match err {
            CoreError::Storage(e) => {
                tracing::error!(tenant_id, operation = operation.as_str(), error = %e, "Queue operation failed in storage")
            }
            other => {
                tracing::debug!(tenant_id, operation = operation.as_str(), error = %other, "Queue operation rejected")
            }
        }
        let mut entry = QueueAuditEntry::new(tenant_id, operation, actor, self.clock.now_ms())
            .failed(err.to_string())
            .context(context);
        if let Some(clinician_id) = clinician_id {
            entry = entry.clinician(clinician_id);
        }
        self.record(&entry);
    }

    /// Entry by id, for routing a mutation to its clinician's queue.
    fn locate(&self, tenant_id: &str, entry_id: &str) -> CoreResult<QueueEntry> {
        self.store
            .get(tenant_id, entry_id)?
            .ok_or_else(|| CoreError::not_found("queue entry", entry_id))
    }

    // ─── Enqueue / Dequeue ──────────────────────────────────────────────────

    /// Add a patient to a clinician's queue.
    ///
    /// A patient or appointment already active anywhere in the tenant is a
    /// conflict, except a repeat of the exact same request, which returns the
    /// existing entry.
    pub fn enqueue(&self, actor: &Actor, request: EnqueueRequest) -> CoreResult<EnqueueOutcome> {
        let result = self.try_enqueue(actor, &request);
        match &result {
            Ok(EnqueueOutcome::Conflict { conflict }) => {
                tracing::warn!(
                    tenant_id = %request.tenant_id,
                    patient_id = %request.patient_id,
                    existing_entry_id = %conflict.existing_entry_id,
                    "Enqueue conflict"
                );
            }
            Ok(_) => {}
            Err(e) => self.record_failure(
                &request.tenant_id,
                QueueOperation::Enqueued,
                actor,
                Some(&request.clinician_id),
                e,
                json!({ "appointment_id": request.appointment_id, "patient_id": request.patient_id }),
            ),
        }
        result
    }

    fn try_enqueue(&self, actor: &Actor, request: &EnqueueRequest) -> CoreResult<EnqueueOutcome> {
        for (field, value) in [
            ("tenant_id", &request.tenant_id),
            ("appointment_id", &request.appointment_id),
            ("patient_id", &request.patient_id),
            ("clinician_id", &request.clinician_id),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidRequest(format!("{} must not be empty", field)));
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.enqueue_once(actor, request) {
                Err(CoreError::Storage(StoreError::UniqueViolation(msg)))
                    if attempt < MAX_ENQUEUE_ATTEMPTS =>
                {
                    tracing::debug!(tenant_id = %request.tenant_id, error = %msg, "Enqueue raced another queue, retrying");
                }
                other => return other,
            }
        }
    }

    fn enqueue_once(&self, actor: &Actor, request: &EnqueueRequest) -> CoreResult<EnqueueOutcome> {
        let tenant_id = request.tenant_id.as_str();
        let clinician_id = request.clinician_id.as_str();

        self.run(tenant_id, clinician_id, |txn, effects| {
            let now = self.clock.now_ms();
            let audit = QueueAuditEntry::new(tenant_id, QueueOperation::Enqueued, actor, now)
                .clinician(clinician_id);

            if let Some(existing) = txn.find_active_for(&request.patient_id, &request.appointment_id)? {
                let same_request = existing.appointment_id == request.appointment_id
                    && existing.patient_id == request.patient_id
                    && existing.clinician_id == request.clinician_id;
                if same_request {
                    effects
                        .audit
                        .push(audit.entry(&existing).context(json!({ "existing": true })));
                    return Ok(EnqueueOutcome::Existing { entry: existing });
                }

                let reason = if existing.patient_id == request.patient_id {
                    "patient already has an active queue entry"
                } else {
                    "appointment already has an active queue entry"
                };
                effects.audit.push(
                    audit
                        .failed(format!("CONFLICT: {}", reason))
                        .context(json!({
                            "existing_entry_id": existing.id,
                            "appointment_id": request.appointment_id,
                            "patient_id": request.patient_id,
                        })),
                );
                return Ok(EnqueueOutcome::Conflict {
                    conflict: QueueConflict {
                        existing_entry_id: existing.id,
                        clinician_id: existing.clinician_id,
                        position: existing.position,
                        status: existing.status,
                        reason: reason.to_string(),
                    },
                });
            }

            let stored = txn.active_entries()?;
            let entry = QueueEntry {
                id: new_id("qe"),
                tenant_id: tenant_id.to_string(),
                appointment_id: request.appointment_id.clone(),
                patient_id: request.patient_id.clone(),
                clinician_id: clinician_id.to_string(),
                position: QueueScheduler::insertion_position(&stored, request.priority),
                status: QueueStatus::Waiting,
                priority: request.priority,
                enqueued_at: now,
                seq: txn.next_seq()?,
                called_at: None,
                service_started_at: None,
                service_ended_at: None,
                estimated_wait_minutes: None,
                estimated_call_at: None,
                notes: request.notes.clone(),
            };
            let entry_id = entry.id.clone();

            let mut working = stored.clone();
            working.push(entry);
            write_back(txn, &stored, &mut working, &self.config, now)?;

            let entry = working
                .iter()
                .find(|e| e.id == entry_id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("queue entry", &entry_id))?;

            tracing::info!(
                tenant_id,
                clinician_id,
                entry_id = %entry.id,
                position = entry.position,
                priority = entry.priority.as_str(),
                "Patient enqueued"
            );
            let waiting = working.iter().filter(|e| e.status == QueueStatus::Waiting).count();
            if waiting >= self.config.max_queue_size as usize {
                tracing::warn!(
                    tenant_id,
                    clinician_id,
                    waiting,
                    max_queue_size = self.config.max_queue_size,
                    "Queue overflow"
                );
            }
            effects.audit.push(audit.entry(&entry).context(json!({
                "priority": entry.priority.as_str(),
                "position": entry.position,
                "estimated_wait_minutes": entry.estimated_wait_minutes,
            })));
            effects.snapshot(tenant_id, clinician_id, &working);
            Ok(EnqueueOutcome::Enqueued { entry })
        })
    }

    /// Cancel a `Waiting` or `Called` entry and close the gap it leaves.
    pub fn dequeue(
        &self,
        actor: &Actor,
        tenant_id: &str,
        entry_id: &str,
        reason: Option<&str>,
    ) -> CoreResult<QueueEntry> {
        let result = self.locate(tenant_id, entry_id).and_then(|located| {
            self.close_entry(
                actor,
                &located,
                QueueOperation::Dequeued,
                &[QueueStatus::Waiting, QueueStatus::Called],
                QueueStatus::Cancelled,
                reason.unwrap_or("cancelled"),
            )
        });
        if let Err(e) = &result {
            self.record_failure(
                tenant_id,
                QueueOperation::Dequeued,
                actor,
                None,
                e,
                json!({ "entry_id": entry_id, "reason": reason }),
            );
        }
        result
    }

    /// `Called` patient who never showed up.
    pub fn mark_no_show(&self, actor: &Actor, tenant_id: &str, entry_id: &str) -> CoreResult<QueueEntry> {
        let result = self.locate(tenant_id, entry_id).and_then(|located| {
            self.close_entry(
                actor,
                &located,
                QueueOperation::NoShow,
                &[QueueStatus::Called],
                QueueStatus::NoShow,
                "no_show",
            )
        });
        if let Err(e) = &result {
            self.record_failure(
                tenant_id,
                QueueOperation::NoShow,
                actor,
                None,
                e,
                json!({ "entry_id": entry_id }),
            );
        }
        result
    }

    fn close_entry(
        &self,
        actor: &Actor,
        located: &QueueEntry,
        operation: QueueOperation,
        allowed: &[QueueStatus],
        target: QueueStatus,
        reason: &str,
    ) -> CoreResult<QueueEntry> {
        let tenant_id = located.tenant_id.as_str();
        let clinician_id = located.clinician_id.as_str();
        let op_name = match target {
            QueueStatus::NoShow => "mark no-show",
            _ => "dequeue",
        };

        self.run(tenant_id, clinician_id, |txn, effects| {
            let now = self.clock.now_ms();
            let current = txn
                .get(&located.id)?
                .ok_or_else(|| CoreError::not_found("queue entry", &located.id))?;
            if !allowed.contains(&current.status) {
                return Err(invalid_state(&current, op_name));
            }

            let stored = txn.active_entries()?;
            let mut working = stored.clone();
            let closed = close(&mut working, &current.id, target, now)
                .ok_or_else(|| CoreError::not_found("queue entry", &current.id))?;
            txn.update(&closed)?;
            write_back(txn, &stored, &mut working, &self.config, now)?;

            tracing::info!(
                tenant_id,
                clinician_id,
                entry_id = %closed.id,
                status = closed.status.as_str(),
                reason,
                "Queue entry closed"
            );
            effects.audit.push(
                QueueAuditEntry::new(tenant_id, operation, actor, now)
                    .entry(&closed)
                    .context(json!({ "reason": reason, "previous_position": current.position })),
            );
            effects.removed(&closed, reason);
            effects.snapshot(tenant_id, clinician_id, &working);
            Ok(closed)
        })
    }

    // ─── Service Flow ───────────────────────────────────────────────────────

    /// Call the lowest-position waiting patient.
    pub fn call_next(
        &self,
        actor: &Actor,
        tenant_id: &str,
        clinician_id: &str,
    ) -> CoreResult<Option<QueueEntry>> {
        let result = self.run(tenant_id, clinician_id, |txn, effects| {
            let now = self.clock.now_ms();
            let stored = txn.active_entries()?;
            let mut working = stored.clone();
            let called = Self::advance(&mut working, now);
            write_back(txn, &stored, &mut working, &self.config, now)?;

            let audit = QueueAuditEntry::new(tenant_id, QueueOperation::Called, actor, now)
                .clinician(clinician_id);
            match &called {
                Some(called) => {
                    tracing::info!(tenant_id, clinician_id, entry_id = %called.id, "Patient called");
                    effects.audit.push(audit.entry(called));
                    effects.called(called);
                    effects.snapshot(tenant_id, clinician_id, &working);
                }
                None => {
                    tracing::debug!(tenant_id, clinician_id, "No waiting patient to call");
                    effects.audit.push(audit.context(json!({ "next": null })));
                }
            }
            Ok(called)
        });
        if let Err(e) = &result {
            self.record_failure(tenant_id, QueueOperation::Called, actor, Some(clinician_id), e, json!({}));
        }
        result
    }

    /// Move the first waiting entry of `working` to `Called`.
    fn advance(working: &mut [QueueEntry], now: u64) -> Option<QueueEntry> {
        QueueScheduler::renumber(working);
        let next_id = QueueScheduler::next_to_call(working)?.id.clone();
        let next = working.iter_mut().find(|e| e.id == next_id)?;
        next.status = QueueStatus::Called;
        next.called_at = Some(now);
        next.estimated_wait_minutes = None;
        next.estimated_call_at = None;
        Some(next.clone())
    }

    pub fn start_service(&self, actor: &Actor, tenant_id: &str, entry_id: &str) -> CoreResult<QueueEntry> {
        let result = self.locate(tenant_id, entry_id).and_then(|located| {
            let clinician_id = located.clinician_id.as_str();
            self.run(tenant_id, clinician_id, |txn, effects| {
                let now = self.clock.now_ms();
                let stored = txn.active_entries()?;
                let mut working = stored.clone();
                let entry = working
                    .iter_mut()
                    .find(|e| e.id == located.id)
                    .ok_or_else(|| CoreError::not_found("queue entry", &located.id))?;
                if entry.status != QueueStatus::Called {
                    return Err(invalid_state(entry, "start service"));
                }
                entry.status = QueueStatus::InService;
                entry.service_started_at = Some(now);
                let started = entry.clone();
                write_back(txn, &stored, &mut working, &self.config, now)?;

                tracing::info!(tenant_id, clinician_id, entry_id = %started.id, "Service started");
                effects.audit.push(
                    QueueAuditEntry::new(tenant_id, QueueOperation::ServiceStarted, actor, now)
                        .entry(&started),
                );
                effects.snapshot(tenant_id, clinician_id, &working);
                Ok(started)
            })
        });
        // A closed entry is no longer in the active set
        let result = match result {
            Err(CoreError::NotFound { .. }) => Err(match self.store.get(tenant_id, entry_id) {
                Ok(Some(entry)) => invalid_state(&entry, "start service"),
                _ => CoreError::not_found("queue entry", entry_id),
            }),
            other => other,
        };
        if let Err(e) = &result {
            self.record_failure(
                tenant_id,
                QueueOperation::ServiceStarted,
                actor,
                None,
                e,
                json!({ "entry_id": entry_id }),
            );
        }
        result
    }

    /// Finish the appointment's `InService` entry and call the next waiting
    /// patient of the same clinician, as one transaction.
    ///
    /// Calling it again for an appointment already `Done` changes nothing and
    /// reports `already_finalized`.
    pub fn finalize_and_advance(
        &self,
        actor: &Actor,
        tenant_id: &str,
        appointment_id: &str,
        notes: Option<&str>,
    ) -> CoreResult<FinalizeOutcome> {
        let result = self.try_finalize(actor, tenant_id, appointment_id, notes);
        if let Err(e) = &result {
            self.record_failure(
                tenant_id,
                QueueOperation::Finalized,
                actor,
                None,
                e,
                json!({ "appointment_id": appointment_id }),
            );
        }
        result
    }

    fn try_finalize(
        &self,
        actor: &Actor,
        tenant_id: &str,
        appointment_id: &str,
        notes: Option<&str>,
    ) -> CoreResult<FinalizeOutcome> {
        let located = self
            .store
            .latest_for_appointment(tenant_id, appointment_id)?
            .ok_or_else(|| CoreError::not_found("appointment", appointment_id))?;
        let clinician_id = located.clinician_id.as_str();

        self.run(tenant_id, clinician_id, |txn, effects| {
            let now = self.clock.now_ms();
            let current = txn
                .latest_for_appointment(appointment_id)?
                .ok_or_else(|| CoreError::not_found("appointment", appointment_id))?;

            match current.status {
                QueueStatus::Done => {
                    tracing::debug!(tenant_id, appointment_id, "Appointment already finalized");
                    effects.audit.push(
                        QueueAuditEntry::new(tenant_id, QueueOperation::Finalized, actor, now)
                            .entry(&current)
                            .context(json!({ "appointment_id": appointment_id, "already_finalized": true })),
                    );
                    return Ok(FinalizeOutcome {
                        finalized: current,
                        next_patient: None,
                        already_finalized: true,
                    });
                }
                QueueStatus::InService => {}
                _ => return Err(invalid_state(&current, "finalize")),
            }

            let stored = txn.active_entries()?;
            let mut working = stored.clone();
            let mut finalized = close(&mut working, &current.id, QueueStatus::Done, now)
                .ok_or_else(|| CoreError::not_found("queue entry", &current.id))?;
            if let Some(notes) = notes {
                finalized.notes = Some(notes.to_string());
            }
            txn.update(&finalized)?;
            txn.complete_encounter(appointment_id, notes, now)?;

            let next_patient = Self::advance(&mut working, now);
            write_back(txn, &stored, &mut working, &self.config, now)?;

            tracing::info!(
                tenant_id,
                clinician_id,
                appointment_id,
                finalized = %finalized.id,
                next = ?next_patient.as_ref().map(|e| e.id.as_str()),
                "Appointment finalized"
            );
            effects.audit.push(
                QueueAuditEntry::new(tenant_id, QueueOperation::Finalized, actor, now)
                    .entry(&finalized)
                    .context(json!({ "appointment_id": appointment_id, "notes": notes })),
            );
            if let Some(next) = &next_patient {
                effects.audit.push(
                    QueueAuditEntry::new(tenant_id, QueueOperation::Called, actor, now)
                        .entry(next)
                        .context(json!({ "after": finalized.id })),
                );
                effects.called(next);
            }
            effects.snapshot(tenant_id, clinician_id, &working);

            Ok(FinalizeOutcome {
                finalized,
                next_patient,
                already_finalized: false,
            })
        })
    }

    /// Close every `Called` entry of the clinician that has waited past the
    /// no-show timeout.
    pub fn expire_no_shows(
        &self,
        actor: &Actor,
        tenant_id: &str,
        clinician_id: &str,
    ) -> CoreResult<Vec<QueueEntry>> {
        let timeout = self.config.no_show_timeout_minutes as u64 * MINUTE_MS;

        let result = self.run(tenant_id, clinician_id, |txn, effects| {
            let now = self.clock.now_ms();
            let stored = txn.active_entries()?;
            let overdue: Vec<String> = stored
                .iter()
                .filter(|e| e.status == QueueStatus::Called)
                .filter(|e| e.called_at.is_some_and(|at| now.saturating_sub(at) >= timeout))
                .map(|e| e.id.clone())
                .collect();
            if overdue.is_empty() {
                effects.audit.push(
                    QueueAuditEntry::new(tenant_id, QueueOperation::NoShow, actor, now)
                        .clinician(clinician_id)
                        .context(json!({ "reason": "timeout", "expired": 0 })),
                );
                return Ok(Vec::new());
            }

            let mut working = stored.clone();
            let mut closed = Vec::new();
            for id in &overdue {
                if let Some(entry) = close(&mut working, id, QueueStatus::NoShow, now) {
                    txn.update(&entry)?;
                    closed.push(entry);
                }
            }
            write_back(txn, &stored, &mut working, &self.config, now)?;

            for entry in &closed {
                effects.audit.push(
                    QueueAuditEntry::new(tenant_id, QueueOperation::NoShow, actor, now)
                        .entry(entry)
                        .context(json!({ "reason": "timeout" })),
                );
                effects.removed(entry, "no_show");
            }
            effects.snapshot(tenant_id, clinician_id, &working);
            tracing::info!(tenant_id, clinician_id, count = closed.len(), "No-shows expired");
            Ok(closed)
        });
        if let Err(e) = &result {
            self.record_failure(
                tenant_id,
                QueueOperation::NoShow,
                actor,
                Some(clinician_id),
                e,
                json!({ "reason": "timeout" }),
            );
        }
        result
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub fn get(&self, tenant_id: &str, entry_id: &str) -> CoreResult<QueueEntry> {
        self.locate(tenant_id, entry_id)
    }

    pub fn list_active(&self, tenant_id: &str, clinician_id: Option<&str>) -> CoreResult<Vec<QueueEntry>> {
        Ok(self.store.list_active(tenant_id, clinician_id)?)
    }

    pub fn list_audit(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<QueueAuditEntry>> {
        Ok(self.audit.queue_audit(tenant_id, clinician_id, limit)?)
    }

    pub fn encounter_status(&self, tenant_id: &str, appointment_id: &str) -> CoreResult<Option<String>> {
        Ok(self.store.encounter_status(tenant_id, appointment_id)?)
    }

    pub fn statistics(&self, tenant_id: &str, clinician_id: Option<&str>) -> CoreResult<QueueStatistics> {
        let entries = self.store.list_all(tenant_id, clinician_id)?;
        let mut stats = QueueStatistics::default();
        let mut waits = Vec::new();
        let mut waiting_by_clinician: BTreeMap<&str, usize> = BTreeMap::new();

        for entry in &entries {
            match entry.status {
                QueueStatus::Waiting => {
                    stats.waiting += 1;
                    *waiting_by_clinician.entry(entry.clinician_id.as_str()).or_default() += 1;
                }
                QueueStatus::Called => stats.called += 1,
                QueueStatus::InService => stats.in_service += 1,
                QueueStatus::Done => stats.done += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
                QueueStatus::NoShow => stats.no_show += 1,
            }
            if let Some(started) = entry.service_started_at {
                waits.push(started.saturating_sub(entry.enqueued_at) as f64 / MINUTE_MS as f64);
            }
        }

        if !waits.is_empty() {
            stats.average_wait_minutes = waits.iter().sum::<f64>() / waits.len() as f64;
        }
        stats.estimated_next_call_at = entries
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .filter_map(|e| e.estimated_call_at)
            .min();
        stats.overflowing = waiting_by_clinician
            .into_iter()
            .filter(|(_, waiting)| *waiting >= self.config.max_queue_size as usize)
            .map(|(clinician, _)| clinician.to_string())
            .collect();
        Ok(stats)
    }
}
