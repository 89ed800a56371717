#[cfg(test)]
mod tests {
    use crate::notify::{QueueEvent, SubscriberRegistry};

    fn removed(tenant: &str, clinician: &str) -> QueueEvent {
        QueueEvent::PatientRemoved {
            tenant_id: tenant.to_string(),
            clinician_id: clinician.to_string(),
            entry_id: "qe_1".to_string(),
            patient_id: "pat1".to_string(),
            reason: "cancelled".to_string(),
        }
    }

    #[test]
    fn events_reach_clinician_and_tenant_scopes_only() {
        let registry = SubscriberRegistry::new(8);
        let mut doc1 = registry.connect("t1", Some("doc1"), 0);
        let mut doc2 = registry.connect("t1", Some("doc2"), 0);
        let mut tenant_wide = registry.connect("t1", None, 0);
        let mut other_tenant = registry.connect("t2", None, 0);

        assert_eq!(registry.publish(&removed("t1", "doc1")), 2);

        assert!(doc1.events.try_recv().is_ok());
        assert!(tenant_wide.events.try_recv().is_ok());
        assert!(doc2.events.try_recv().is_err());
        assert!(other_tenant.events.try_recv().is_err());
    }

    #[test]
    fn full_buffer_drops_the_event_for_that_subscriber() {
        let registry = SubscriberRegistry::new(1);
        let mut sub = registry.connect("t1", Some("doc1"), 0);

        assert_eq!(registry.publish(&removed("t1", "doc1")), 1);
        assert_eq!(registry.publish(&removed("t1", "doc1")), 0);

        assert!(sub.events.try_recv().is_ok());
        assert!(sub.events.try_recv().is_err());
        assert_eq!(registry.subscriber_count(Some("t1")), 1);
    }

    #[test]
    fn closed_subscribers_are_removed_on_publish() {
        let registry = SubscriberRegistry::new(4);
        let sub = registry.connect("t1", Some("doc1"), 0);
        drop(sub);

        assert_eq!(registry.publish(&removed("t1", "doc1")), 0);
        assert_eq!(registry.subscriber_count(None), 0);
    }

    #[test]
    fn sweep_drops_idle_subscribers_and_touch_keeps_them() {
        let registry = SubscriberRegistry::new(4);
        let idle = registry.connect("t1", None, 0);
        let busy = registry.connect("t1", None, 0);

        assert!(registry.touch(&busy.id, 80_000));
        assert_eq!(registry.sweep(100_000, 90_000), 1);
        assert_eq!(registry.subscriber_count(Some("t1")), 1);
        assert!(!registry.disconnect(&idle.id));
        assert!(registry.disconnect(&busy.id));
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let value = serde_json::to_value(removed("t1", "doc1")).unwrap();
        assert_eq!(value["event"], "patient_removed");
        assert_eq!(value["clinician_id"], "doc1");
    }
}
