#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::CoreConfig;
    use crate::error::CoreError;
    use crate::infrastructure_in_memory::InMemoryStore;
    use crate::notify::QueueEvent;
    use crate::queue_coordinator::EnqueueRequest;
    use crate::scheduler::QueueScheduler;
    use crate::types::*;
    use crate::WardClient;
    use crate::clock::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    const START: u64 = 1_700_000_000_000;

    // =========================================================================
    // Helpers
    // =========================================================================

    fn setup() -> (WardClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let client = WardClient::with_store(
            Arc::new(InMemoryStore::new()),
            CoreConfig::default(),
            clock.clone(),
        );
        (client, clock)
    }

    fn reception() -> Actor {
        Actor::new("front_desk", ActorRole::Reception)
    }

    fn doctor() -> Actor {
        Actor::new("doc1", ActorRole::Physician)
    }

    fn request(patient: &str, clinician: &str, priority: Priority) -> EnqueueRequest {
        EnqueueRequest {
            tenant_id: "t1".to_string(),
            appointment_id: format!("appt_{}", patient),
            patient_id: patient.to_string(),
            clinician_id: clinician.to_string(),
            priority,
            notes: None,
        }
    }

    fn enqueue(client: &WardClient, patient: &str, priority: Priority) -> QueueEntry {
        match client.queue().enqueue(&reception(), request(patient, "doc1", priority)).unwrap() {
            EnqueueOutcome::Enqueued { entry } => entry,
            other => panic!("expected a new entry, got {:?}", other),
        }
    }

    fn positions(client: &WardClient) -> Vec<(String, u32)> {
        client
            .queue()
            .list_active("t1", Some("doc1"))
            .unwrap()
            .into_iter()
            .map(|e| (e.patient_id, e.position))
            .collect()
    }

    fn audit_rows(client: &WardClient, operation: QueueOperation) -> Vec<QueueAuditEntry> {
        client
            .queue()
            .list_audit("t1", None, 100)
            .unwrap()
            .into_iter()
            .filter(|row| row.operation == operation)
            .collect()
    }

    /// Moves forward one millisecond on every read.
    #[derive(Debug)]
    struct TickingClock(AtomicU64);

    impl Clock for TickingClock {
        fn now_ms(&self) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    /// p1 in service, p2 waiting.
    fn serving_two(client: &WardClient) -> (QueueEntry, QueueEntry) {
        let first = enqueue(client, "p1", Priority::Normal);
        let second = enqueue(client, "p2", Priority::Normal);
        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();
        client.queue().start_service(&doctor(), "t1", &first.id).unwrap();
        (first, second)
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    #[test]
    fn enqueue_assigns_positions_by_priority() {
        let (client, _) = setup();
        enqueue(&client, "p1", Priority::Normal);
        enqueue(&client, "p2", Priority::Normal);
        let urgent = enqueue(&client, "p3", Priority::Urgent);

        assert_eq!(urgent.position, 1);
        assert_eq!(urgent.estimated_wait_minutes, Some(20));
        assert_eq!(
            positions(&client),
            vec![("p3".to_string(), 1), ("p1".to_string(), 2), ("p2".to_string(), 3)]
        );
    }

    #[test]
    fn repeated_enqueue_returns_existing_entry() {
        let (client, _) = setup();
        let first = enqueue(&client, "p1", Priority::Normal);

        let again = client
            .queue()
            .enqueue(&reception(), request("p1", "doc1", Priority::Normal))
            .unwrap();
        match again {
            EnqueueOutcome::Existing { entry } => assert_eq!(entry.id, first.id),
            other => panic!("expected existing entry, got {:?}", other),
        }
        assert_eq!(client.queue().list_active("t1", None).unwrap().len(), 1);
    }

    #[test]
    fn patient_active_elsewhere_is_a_conflict() {
        let (client, _) = setup();
        let first = enqueue(&client, "p1", Priority::Normal);

        let mut other = request("p1", "doc2", Priority::Normal);
        other.appointment_id = "appt_other".to_string();
        match client.queue().enqueue(&reception(), other).unwrap() {
            EnqueueOutcome::Conflict { conflict } => {
                assert_eq!(conflict.existing_entry_id, first.id);
                assert_eq!(conflict.clinician_id, "doc1");
                assert_eq!(conflict.reason, "patient already has an active queue entry");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn appointment_active_for_another_patient_is_a_conflict() {
        let (client, _) = setup();
        enqueue(&client, "p1", Priority::Normal);

        let mut other = request("p2", "doc1", Priority::Normal);
        other.appointment_id = "appt_p1".to_string();
        let outcome = client.queue().enqueue(&reception(), other).unwrap();
        match outcome {
            EnqueueOutcome::Conflict { conflict } => {
                assert_eq!(conflict.reason, "appointment already has an active queue entry")
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let audit = client.queue().list_audit("t1", None, 10).unwrap();
        assert!(!audit[0].success);
    }

    #[test]
    fn empty_fields_are_rejected() {
        let (client, _) = setup();
        let err = client
            .queue()
            .enqueue(&reception(), request("", "doc1", Priority::Normal))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn concurrent_enqueues_keep_positions_gapless() {
        let (client, _) = setup();
        thread::scope(|s| {
            for i in 0..12 {
                let client = &client;
                s.spawn(move || {
                    let priority = if i % 4 == 0 { Priority::Urgent } else { Priority::Normal };
                    client
                        .queue()
                        .enqueue(&reception(), request(&format!("p{}", i), "doc1", priority))
                        .unwrap();
                });
            }
        });

        let active = client.queue().list_active("t1", Some("doc1")).unwrap();
        assert_eq!(active.len(), 12);
        assert!(QueueScheduler::is_gapless(&active));
        let urgent_positions: Vec<u32> = active
            .iter()
            .filter(|e| e.priority == Priority::Urgent)
            .map(|e| e.position)
            .collect();
        assert_eq!(urgent_positions, vec![1, 2, 3]);
    }

    #[test]
    fn concurrent_enqueues_keep_arrival_order_within_a_tier() {
        let clock = Arc::new(TickingClock(AtomicU64::new(START)));
        let client = WardClient::with_store(Arc::new(InMemoryStore::new()), CoreConfig::default(), clock);
        thread::scope(|s| {
            for i in 0..16 {
                let client = &client;
                s.spawn(move || {
                    client
                        .queue()
                        .enqueue(&reception(), request(&format!("p{}", i), "doc1", Priority::Normal))
                        .unwrap();
                });
            }
        });

        let mut active = client.queue().list_active("t1", Some("doc1")).unwrap();
        active.sort_by_key(|e| e.position);
        assert!(QueueScheduler::is_gapless(&active));
        for pair in active.windows(2) {
            assert!(pair[0].seq < pair[1].seq, "position order must follow arrival order");
            assert!(pair[0].enqueued_at <= pair[1].enqueued_at);
        }
    }

    // =========================================================================
    // Dequeue / no-show
    // =========================================================================

    #[test]
    fn dequeue_closes_the_gap() {
        let (client, _) = setup();
        enqueue(&client, "p1", Priority::Normal);
        let middle = enqueue(&client, "p2", Priority::Normal);
        enqueue(&client, "p3", Priority::Normal);

        let removed = client
            .queue()
            .dequeue(&reception(), "t1", &middle.id, Some("left"))
            .unwrap();
        assert_eq!(removed.status, QueueStatus::Cancelled);
        assert_eq!(
            positions(&client),
            vec![("p1".to_string(), 1), ("p3".to_string(), 2)]
        );
    }

    #[test]
    fn dequeue_of_closed_entry_is_invalid_state() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);
        client.queue().dequeue(&reception(), "t1", &entry.id, None).unwrap();

        let err = client.queue().dequeue(&reception(), "t1", &entry.id, None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn dequeued_patient_can_be_queued_again() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);
        client.queue().dequeue(&reception(), "t1", &entry.id, None).unwrap();

        let again = enqueue(&client, "p1", Priority::Normal);
        assert_ne!(again.id, entry.id);
        assert_eq!(again.position, 1);
    }

    #[test]
    fn no_show_only_from_called() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);

        let err = client.queue().mark_no_show(&doctor(), "t1", &entry.id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));

        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();
        let closed = client.queue().mark_no_show(&doctor(), "t1", &entry.id).unwrap();
        assert_eq!(closed.status, QueueStatus::NoShow);
    }

    #[test]
    fn called_patients_past_timeout_become_no_shows() {
        let (client, clock) = setup();
        enqueue(&client, "p1", Priority::Normal);
        enqueue(&client, "p2", Priority::Normal);
        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();

        clock.advance(10 * MINUTE_MS);
        assert!(client.queue().expire_no_shows(&doctor(), "t1", "doc1").unwrap().is_empty());
        let sweeps = audit_rows(&client, QueueOperation::NoShow);
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].context["expired"], 0);

        clock.advance(5 * MINUTE_MS);
        let expired = client.queue().expire_no_shows(&doctor(), "t1", "doc1").unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].patient_id, "p1");
        assert_eq!(positions(&client), vec![("p2".to_string(), 1)]);
    }

    // =========================================================================
    // Service flow
    // =========================================================================

    #[test]
    fn call_next_on_empty_queue_returns_none() {
        let (client, _) = setup();
        assert!(client.queue().call_next(&doctor(), "t1", "doc1").unwrap().is_none());
    }

    #[test]
    fn call_next_on_empty_queue_is_still_audited() {
        let (client, _) = setup();
        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();

        let rows = audit_rows(&client, QueueOperation::Called);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        assert_eq!(rows[0].clinician_id.as_deref(), Some("doc1"));
        assert!(rows[0].entry_id.is_none());
        assert_eq!(rows[0].context["next"], serde_json::Value::Null);
    }

    #[test]
    fn start_service_requires_called() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);
        let err = client.queue().start_service(&doctor(), "t1", &entry.id).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn finalize_completes_encounter_and_calls_next() {
        let (client, _) = setup();
        let (first, second) = serving_two(&client);

        let outcome = client
            .queue()
            .finalize_and_advance(&doctor(), "t1", &first.appointment_id, Some("ok"))
            .unwrap();
        assert!(!outcome.already_finalized);
        assert_eq!(outcome.finalized.status, QueueStatus::Done);
        assert_eq!(outcome.finalized.notes.as_deref(), Some("ok"));
        let next = outcome.next_patient.unwrap();
        assert_eq!(next.id, second.id);
        assert_eq!(next.status, QueueStatus::Called);
        assert_eq!(next.position, 1);

        assert_eq!(
            client.queue().encounter_status("t1", &first.appointment_id).unwrap().as_deref(),
            Some("completed")
        );
    }

    #[test]
    fn finalize_twice_is_idempotent() {
        let (client, _) = setup();
        let (first, _) = serving_two(&client);
        client
            .queue()
            .finalize_and_advance(&doctor(), "t1", &first.appointment_id, None)
            .unwrap();

        let again = client
            .queue()
            .finalize_and_advance(&doctor(), "t1", &first.appointment_id, None)
            .unwrap();
        assert!(again.already_finalized);
        assert!(again.next_patient.is_none());

        let called = client
            .queue()
            .list_active("t1", Some("doc1"))
            .unwrap()
            .into_iter()
            .filter(|e| e.status == QueueStatus::Called)
            .count();
        assert_eq!(called, 1);

        let finalized = audit_rows(&client, QueueOperation::Finalized);
        assert_eq!(finalized.len(), 2);
        assert_eq!(
            finalized
                .iter()
                .filter(|row| row.context["already_finalized"] == true)
                .count(),
            1
        );
    }

    #[test]
    fn finalize_of_waiting_entry_is_invalid_state() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);
        let err = client
            .queue()
            .finalize_and_advance(&doctor(), "t1", &entry.appointment_id, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn concurrent_finalize_calls_next_exactly_once() {
        let (client, _) = setup();
        let (first, second) = serving_two(&client);

        let outcomes: Vec<FinalizeOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let client = &client;
                    let appointment = first.appointment_id.clone();
                    s.spawn(move || {
                        client
                            .queue()
                            .finalize_and_advance(&doctor(), "t1", &appointment, None)
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.already_finalized).count(), 1);
        let called: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.next_patient.as_ref().map(|e| e.id.clone()))
            .collect();
        assert_eq!(called, vec![second.id.clone()]);

        let active = client.queue().list_active("t1", Some("doc1")).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, QueueStatus::Called);
    }

    // =========================================================================
    // Events and statistics
    // =========================================================================

    #[test]
    fn call_next_publishes_called_then_snapshot() {
        let (client, _) = setup();
        enqueue(&client, "p1", Priority::Normal);
        let mut sub = client.notifier().connect("t1", Some("doc1"), START);

        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();

        match sub.events.try_recv().unwrap() {
            QueueEvent::PatientCalled { entry, .. } => assert_eq!(entry.patient_id, "p1"),
            other => panic!("expected patient_called, got {:?}", other),
        }
        assert!(matches!(
            sub.events.try_recv().unwrap(),
            QueueEvent::QueueSnapshotChanged { .. }
        ));
    }

    #[test]
    fn rejected_operations_publish_nothing() {
        let (client, _) = setup();
        let entry = enqueue(&client, "p1", Priority::Normal);
        let mut sub = client.notifier().connect("t1", None, START);

        let _ = client.queue().mark_no_show(&doctor(), "t1", &entry.id);
        assert!(sub.events.try_recv().is_err());
    }

    #[test]
    fn statistics_count_statuses_and_waits() {
        let (client, clock) = setup();
        let (first, _) = {
            let first = enqueue(&client, "p1", Priority::Normal);
            let second = enqueue(&client, "p2", Priority::Normal);
            clock.advance(30 * MINUTE_MS);
            client.queue().call_next(&doctor(), "t1", "doc1").unwrap();
            client.queue().start_service(&doctor(), "t1", &first.id).unwrap();
            (first, second)
        };
        client
            .queue()
            .finalize_and_advance(&doctor(), "t1", &first.appointment_id, None)
            .unwrap();
        enqueue(&client, "p3", Priority::Normal);

        let stats = client.queue().statistics("t1", Some("doc1")).unwrap();
        assert_eq!(stats.done, 1);
        assert_eq!(stats.called, 1);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.average_wait_minutes, 30.0);
        assert!(stats.estimated_next_call_at.is_some());
        assert!(stats.overflowing.is_empty());
    }

    #[test]
    fn statistics_flag_clinicians_at_max_queue_size() {
        let clock = Arc::new(ManualClock::new(START));
        let mut config = CoreConfig::default();
        config.queue.max_queue_size = 2;
        let client = WardClient::with_store(Arc::new(InMemoryStore::new()), config, clock);

        enqueue(&client, "p1", Priority::Normal);
        client
            .queue()
            .enqueue(&reception(), request("p2", "doc2", Priority::Normal))
            .unwrap();
        assert!(client.queue().statistics("t1", None).unwrap().overflowing.is_empty());

        enqueue(&client, "p3", Priority::Normal);
        let stats = client.queue().statistics("t1", None).unwrap();
        assert_eq!(stats.overflowing, vec!["doc1".to_string()]);

        client.queue().call_next(&doctor(), "t1", "doc1").unwrap();
        assert!(client.queue().statistics("t1", Some("doc1")).unwrap().overflowing.is_empty());
    }

    // =========================================================================
    // SQLite backend
    // =========================================================================

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_concurrent_finalize_calls_next_exactly_once() {
        use crate::infrastructure_sqlite::SqliteStore;

        let clock = Arc::new(ManualClock::new(START));
        let client = WardClient::with_store(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            CoreConfig::default(),
            clock,
        );
        let (first, second) = serving_two(&client);

        let outcomes: Vec<FinalizeOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let client = &client;
                    let appointment = first.appointment_id.clone();
                    s.spawn(move || {
                        client
                            .queue()
                            .finalize_and_advance(&doctor(), "t1", &appointment, None)
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| !o.already_finalized).count(), 1);
        let called: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.next_patient.as_ref().map(|e| e.id.clone()))
            .collect();
        assert_eq!(called, vec![second.id.clone()]);
        assert_eq!(audit_rows(&client, QueueOperation::Finalized).len(), 4);

        let active = client.queue().list_active("t1", Some("doc1")).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, QueueStatus::Called);
    }
}
