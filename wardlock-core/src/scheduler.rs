use crate::config::QueueConfig;
use crate::types::{QueueEntry, QueueStatus, MINUTE_MS};

/// Pure ordering rules for one clinician's active queue.
///
/// Active entries are ordered by priority tier, then by arrival
/// (`enqueued_at`, then insertion `seq`), and numbered 1..N in that order.
pub struct QueueScheduler;

impl QueueScheduler {
    fn order_key(entry: &QueueEntry) -> (u8, u64, u64) {
        (entry.priority.tier(), entry.enqueued_at, entry.seq)
    }

    /// Position a new entry of `priority` would take: one past every active
    /// entry at an equal or higher tier.
    pub fn insertion_position(active: &[QueueEntry], priority: crate::types::Priority) -> u32 {
        let ahead = active
            .iter()
            .filter(|e| e.status.is_active() && e.priority.tier() <= priority.tier())
            .count();
        ahead as u32 + 1
    }

    /// Sort `active` into queue order and assign gapless positions.
    /// Returns the ids of entries whose position changed.
    pub fn renumber(active: &mut [QueueEntry]) -> Vec<String> {
        active.sort_by_key(Self::order_key);
        let mut changed = Vec::new();
        for (i, entry) in active.iter_mut().enumerate() {
            let position = i as u32 + 1;
            if entry.position != position {
                entry.position = position;
                changed.push(entry.id.clone());
            }
        }
        changed
    }

    /// Refresh the advisory wait estimate of every waiting entry.
    /// Entries already called or in service carry no estimate.
    pub fn refresh_estimates(active: &mut [QueueEntry], config: &QueueConfig, now: u64) {
        for entry in active.iter_mut() {
            if entry.status == QueueStatus::Waiting {
                let minutes = Self::estimated_wait_minutes(entry.position, config);
                entry.estimated_wait_minutes = Some(minutes);
                entry.estimated_call_at = Some(now + minutes as u64 * MINUTE_MS);
            } else {
                entry.estimated_wait_minutes = None;
                entry.estimated_call_at = None;
            }
        }
    }

    pub fn estimated_wait_minutes(position: u32, config: &QueueConfig) -> u32 {
        position
            .saturating_mul(config.average_service_minutes)
            .min(config.max_estimated_wait_minutes)
    }

    /// Lowest-position waiting entry.
    pub fn next_to_call(active: &[QueueEntry]) -> Option<&QueueEntry> {
        active
            .iter()
            .filter(|e| e.status == QueueStatus::Waiting)
            .min_by_key(|e| e.position)
    }

    /// True when the active entries hold exactly the positions 1..=N.
    pub fn is_gapless(active: &[QueueEntry]) -> bool {
        let mut positions: Vec<u32> = active
            .iter()
            .filter(|e| e.status.is_active())
            .map(|e| e.position)
            .collect();
        positions.sort_unstable();
        positions
            .iter()
            .enumerate()
            .all(|(i, p)| *p == i as u32 + 1)
    }
}
