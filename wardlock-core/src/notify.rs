//! Push notifications for queue changes.
//!
//! Subscribers register for a tenant, optionally narrowed to one clinician.
//! Every event is delivered to the clinician's subscribers and to the
//! tenant-wide ones. Delivery is best effort: a subscriber whose buffer is
//! full misses the event, a closed one is dropped.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::types::{new_id, QueueEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    PatientCalled {
        tenant_id: String,
        clinician_id: String,
        entry: QueueEntry,
    },
    PatientRemoved {
        tenant_id: String,
        clinician_id: String,
        entry_id: String,
        patient_id: String,
        reason: String,
    },
    QueueSnapshotChanged {
        tenant_id: String,
        clinician_id: String,
        active: Vec<QueueEntry>,
    },
}

impl QueueEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            QueueEvent::PatientCalled { tenant_id, .. }
            | QueueEvent::PatientRemoved { tenant_id, .. }
            | QueueEvent::QueueSnapshotChanged { tenant_id, .. } => tenant_id,
        }
    }

    pub fn clinician_id(&self) -> &str {
        match self {
            QueueEvent::PatientCalled { clinician_id, .. }
            | QueueEvent::PatientRemoved { clinician_id, .. }
            | QueueEvent::QueueSnapshotChanged { clinician_id, .. } => clinician_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::PatientCalled { .. } => "patient_called",
            QueueEvent::PatientRemoved { .. } => "patient_removed",
            QueueEvent::QueueSnapshotChanged { .. } => "queue_snapshot_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Scope {
    tenant_id: String,
    clinician_id: Option<String>,
}

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::Sender<QueueEvent>,
    last_seen: u64,
}

#[derive(Debug, Default)]
struct Registry {
    scopes: HashMap<Scope, HashMap<String, Subscriber>>,
    by_id: HashMap<String, Scope>,
}

impl Registry {
    fn remove(&mut self, id: &str) -> bool {
        let Some(scope) = self.by_id.remove(id) else {
            return false;
        };
        if let Some(subs) = self.scopes.get_mut(&scope) {
            subs.remove(id);
            if subs.is_empty() {
                self.scopes.remove(&scope);
            }
        }
        true
    }
}

/// A live registration. Dropping the receiver closes the subscription; the
/// next publish or sweep removes it.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub clinician_id: Option<String>,
    pub events: mpsc::Receiver<QueueEvent>,
}

#[derive(Debug)]
pub struct SubscriberRegistry {
    capacity: usize,
    inner: Mutex<Registry>,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Registry::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, tenant_id: &str, clinician_id: Option<&str>, now: u64) -> Subscription {
        let (sender, events) = mpsc::channel(self.capacity);
        let id = new_id("sub");
        let scope = Scope {
            tenant_id: tenant_id.to_string(),
            clinician_id: clinician_id.map(str::to_string),
        };

        let mut reg = self.lock();
        reg.scopes.entry(scope.clone()).or_default().insert(
            id.clone(),
            Subscriber {
                sender,
                last_seen: now,
            },
        );
        reg.by_id.insert(id.clone(), scope);
        tracing::debug!(subscriber = %id, tenant_id, clinician_id = ?clinician_id, "Subscriber connected");

        Subscription {
            id,
            tenant_id: tenant_id.to_string(),
            clinician_id: clinician_id.map(str::to_string),
            events,
        }
    }

    pub fn disconnect(&self, subscriber_id: &str) -> bool {
        let removed = self.lock().remove(subscriber_id);
        if removed {
            tracing::debug!(subscriber = %subscriber_id, "Subscriber disconnected");
        }
        removed
    }

    /// Record that the subscriber is still there.
    pub fn touch(&self, subscriber_id: &str, now: u64) -> bool {
        let mut reg = self.lock();
        let Some(scope) = reg.by_id.get(subscriber_id).cloned() else {
            return false;
        };
        match reg
            .scopes
            .get_mut(&scope)
            .and_then(|subs| subs.get_mut(subscriber_id))
        {
            Some(sub) => {
                sub.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Drop subscribers that are closed or silent for longer than `max_idle_ms`.
    pub fn sweep(&self, now: u64, max_idle_ms: u64) -> usize {
        let mut reg = self.lock();
        let stale: Vec<String> = reg
            .scopes
            .values()
            .flat_map(|subs| subs.iter())
            .filter(|(_, sub)| {
                sub.sender.is_closed() || now.saturating_sub(sub.last_seen) > max_idle_ms
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            reg.remove(id);
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "Swept stale subscribers");
        }
        stale.len()
    }

    /// Deliver `event` to its clinician scope and the tenant-wide scope.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, event: &QueueEvent) -> usize {
        let targets = [
            Scope {
                tenant_id: event.tenant_id().to_string(),
                clinician_id: Some(event.clinician_id().to_string()),
            },
            Scope {
                tenant_id: event.tenant_id().to_string(),
                clinician_id: None,
            },
        ];

        let mut reg = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for scope in &targets {
            let Some(subs) = reg.scopes.get(scope) else {
                continue;
            };
            for (id, sub) in subs {
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(subscriber = %id, event = event.kind(), "Subscriber buffer full, event dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        for id in &closed {
            reg.remove(id);
        }
        delivered
    }

    pub fn subscriber_count(&self, tenant_id: Option<&str>) -> usize {
        self.lock()
            .scopes
            .iter()
            .filter(|(scope, _)| tenant_id.is_none_or(|t| scope.tenant_id == t))
            .map(|(_, subs)| subs.len())
            .sum()
    }
}
