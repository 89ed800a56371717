#[cfg(test)]
mod tests {
    use crate::config::QueueConfig;
    use crate::scheduler::QueueScheduler;
    use crate::types::{Priority, QueueEntry, QueueStatus, MINUTE_MS};

    fn entry(id: &str, priority: Priority, enqueued_at: u64, seq: u64) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            appointment_id: format!("appt_{}", id),
            patient_id: format!("pat_{}", id),
            clinician_id: "doc".to_string(),
            position: 0,
            status: QueueStatus::Waiting,
            priority,
            enqueued_at,
            seq,
            called_at: None,
            service_started_at: None,
            service_ended_at: None,
            estimated_wait_minutes: None,
            estimated_call_at: None,
            notes: None,
        }
    }

    fn ids(entries: &[QueueEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    #[test]
    fn renumber_orders_by_tier_then_arrival() {
        let mut active = vec![
            entry("n1", Priority::Normal, 100, 1),
            entry("v1", Priority::Vip, 200, 2),
            entry("n2", Priority::Normal, 300, 3),
            entry("e1", Priority::Emergency, 400, 4),
            entry("u1", Priority::Urgent, 500, 5),
        ];
        QueueScheduler::renumber(&mut active);

        assert_eq!(ids(&active), vec!["e1", "u1", "v1", "n1", "n2"]);
        let positions: Vec<u32> = active.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn seq_breaks_equal_timestamps() {
        let mut active = vec![
            entry("b", Priority::Normal, 100, 8),
            entry("a", Priority::Normal, 100, 7),
        ];
        QueueScheduler::renumber(&mut active);
        assert_eq!(ids(&active), vec!["a", "b"]);
    }

    #[test]
    fn renumber_reports_only_moved_entries() {
        let mut active = vec![entry("a", Priority::Normal, 100, 1), entry("b", Priority::Normal, 200, 2)];
        QueueScheduler::renumber(&mut active);

        active.push(entry("c", Priority::Urgent, 300, 3));
        let changed = QueueScheduler::renumber(&mut active);
        assert_eq!(changed, vec!["c".to_string(), "a".to_string(), "b".to_string()]);

        let changed = QueueScheduler::renumber(&mut active);
        assert!(changed.is_empty());
    }

    #[test]
    fn insertion_position_counts_equal_or_higher_tiers() {
        let mut active = vec![
            entry("e1", Priority::Emergency, 100, 1),
            entry("n1", Priority::Normal, 200, 2),
            entry("n2", Priority::Normal, 300, 3),
        ];
        QueueScheduler::renumber(&mut active);

        assert_eq!(QueueScheduler::insertion_position(&active, Priority::Normal), 4);
        assert_eq!(QueueScheduler::insertion_position(&active, Priority::Urgent), 2);
        assert_eq!(QueueScheduler::insertion_position(&active, Priority::Emergency), 2);
        assert_eq!(QueueScheduler::insertion_position(&[], Priority::Vip), 1);
    }

    #[test]
    fn gapless_detection() {
        let mut active = vec![entry("a", Priority::Normal, 1, 1), entry("b", Priority::Normal, 2, 2)];
        QueueScheduler::renumber(&mut active);
        assert!(QueueScheduler::is_gapless(&active));

        active[1].position = 3;
        assert!(!QueueScheduler::is_gapless(&active));
    }

    // =========================================================================
    // Estimates
    // =========================================================================

    #[test]
    fn estimates_scale_with_position_and_cap() {
        let config = QueueConfig {
            average_service_minutes: 20,
            max_estimated_wait_minutes: 50,
            ..Default::default()
        };
        assert_eq!(QueueScheduler::estimated_wait_minutes(1, &config), 20);
        assert_eq!(QueueScheduler::estimated_wait_minutes(2, &config), 40);
        assert_eq!(QueueScheduler::estimated_wait_minutes(3, &config), 50);
    }

    #[test]
    fn only_waiting_entries_carry_estimates() {
        let config = QueueConfig::default();
        let mut active = vec![entry("a", Priority::Normal, 1, 1), entry("b", Priority::Normal, 2, 2)];
        QueueScheduler::renumber(&mut active);
        active[0].status = QueueStatus::Called;

        QueueScheduler::refresh_estimates(&mut active, &config, 1_000);

        assert_eq!(active[0].estimated_wait_minutes, None);
        assert_eq!(active[1].estimated_wait_minutes, Some(40));
        assert_eq!(active[1].estimated_call_at, Some(1_000 + 40 * MINUTE_MS));
    }

    #[test]
    fn next_to_call_skips_called_entries() {
        let mut active = vec![
            entry("a", Priority::Normal, 1, 1),
            entry("b", Priority::Normal, 2, 2),
            entry("c", Priority::Normal, 3, 3),
        ];
        QueueScheduler::renumber(&mut active);
        active[0].status = QueueStatus::Called;

        let next = QueueScheduler::next_to_call(&active).map(|e| e.id.as_str());
        assert_eq!(next, Some("b"));

        active.iter_mut().for_each(|e| e.status = QueueStatus::InService);
        assert!(QueueScheduler::next_to_call(&active).is_none());
    }
}
