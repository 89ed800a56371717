use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    InService,
    Done,
    Cancelled,
    NoShow,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Called => "called",
            QueueStatus::InService => "in_service",
            QueueStatus::Done => "done",
            QueueStatus::Cancelled => "cancelled",
            QueueStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueStatus::Waiting),
            "called" => Some(QueueStatus::Called),
            "in_service" => Some(QueueStatus::InService),
            "done" => Some(QueueStatus::Done),
            "cancelled" => Some(QueueStatus::Cancelled),
            "no_show" => Some(QueueStatus::NoShow),
            _ => None,
        }
    }

    /// Entries in these states hold a position in the clinician's queue
    pub fn is_active(self) -> bool {
        matches!(
            self,
            QueueStatus::Waiting | QueueStatus::Called | QueueStatus::InService
        )
    }
}

/// Queue priority. Declaration order is tier order: earlier variants are
/// served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Emergency,
    Urgent,
    Vip,
    Normal,
}

impl Priority {
    /// Tier rank, 0 is served first
    pub fn tier(self) -> u8 {
        match self {
            Priority::Emergency => 0,
            Priority::Urgent => 1,
            Priority::Vip => 2,
            Priority::Normal => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Emergency => "emergency",
            Priority::Urgent => "urgent",
            Priority::Vip => "vip",
            Priority::Normal => "normal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emergency" => Some(Priority::Emergency),
            "urgent" => Some(Priority::Urgent),
            "vip" => Some(Priority::Vip),
            "normal" => Some(Priority::Normal),
            _ => None,
        }
    }
}

/// A patient's place in a clinician's waiting list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub tenant_id: String,
    pub appointment_id: String,
    pub patient_id: String,
    pub clinician_id: String,
    /// 1-based; meaningful only while the entry is active
    pub position: u32,
    pub status: QueueStatus,
    pub priority: Priority,
    pub enqueued_at: u64,
    /// Insertion sequence, breaks ties between equal `enqueued_at` values
    pub seq: u64,
    pub called_at: Option<u64>,
    pub service_started_at: Option<u64>,
    pub service_ended_at: Option<u64>,
    pub estimated_wait_minutes: Option<u32>,
    pub estimated_call_at: Option<u64>,
    pub notes: Option<String>,
}

/// Returned when an enqueue collides with an active entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConflict {
    pub existing_entry_id: String,
    pub clinician_id: String,
    pub position: u32,
    pub status: QueueStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Enqueued { entry: QueueEntry },
    /// Same appointment, patient and clinician were already queued
    Existing { entry: QueueEntry },
    Conflict { conflict: QueueConflict },
}

impl EnqueueOutcome {
    pub fn entry(&self) -> Option<&QueueEntry> {
        match self {
            EnqueueOutcome::Enqueued { entry } | EnqueueOutcome::Existing { entry } => Some(entry),
            EnqueueOutcome::Conflict { .. } => None,
        }
    }
}

/// Result of the finish-current / call-next transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeOutcome {
    pub finalized: QueueEntry,
    /// Patient that was moved to `Called`, if anyone was waiting
    pub next_patient: Option<QueueEntry>,
    /// The entry was already `Done`; nothing changed on this call
    pub already_finalized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatistics {
    pub waiting: usize,
    pub called: usize,
    pub in_service: usize,
    pub done: usize,
    pub cancelled: usize,
    pub no_show: usize,
    /// Mean minutes between enqueue and service start for served entries
    pub average_wait_minutes: f64,
    pub estimated_next_call_at: Option<u64>,
    /// Clinicians whose waiting count reached the configured maximum
    pub overflowing: Vec<String>,
}
