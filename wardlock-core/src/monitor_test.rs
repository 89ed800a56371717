#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::{CoreConfig, MonitorConfig};
    use crate::infrastructure_in_memory::InMemoryStore;
    use crate::lock_manager::AcquireRequest;
    use crate::monitor::{AlertKind, AlertLevel, LockMonitor, ReportStatus};
    use crate::types::*;
    use crate::WardClient;
    use std::sync::Arc;

    const START: u64 = 1_700_000_000_000;

    fn quiet_leases() -> LeaseStatistics {
        LeaseStatistics {
            active: 3,
            expired: 1,
            released: 10,
            average_duration_minutes: 12.0,
            ..Default::default()
        }
    }

    #[test]
    fn quiet_tenant_is_healthy() {
        let report = LockMonitor::report(
            "t1",
            START,
            quiet_leases(),
            CollisionStatistics::default(),
            &MonitorConfig::default(),
        );
        assert_eq!(report.status, ReportStatus::Healthy);
        assert!(report.alerts.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn thresholds_are_exclusive() {
        let config = MonitorConfig::default();
        let at_limit = LeaseStatistics {
            active: config.max_active_leases,
            expired: config.max_expired_leases,
            average_duration_minutes: config.max_average_duration_minutes,
            ..Default::default()
        };
        assert!(LockMonitor::alerts(&at_limit, &config).is_empty());
    }

    #[test]
    fn busy_tenant_raises_each_alert() {
        let leases = LeaseStatistics {
            active: 101,
            expired: 51,
            average_duration_minutes: 75.0,
            ..Default::default()
        };
        let alerts = LockMonitor::alerts(&leases, &MonitorConfig::default());
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::HighActiveLeases,
                AlertKind::LongLeaseDuration,
                AlertKind::ManyExpiredLeases
            ]
        );
        assert_eq!(alerts[2].level, AlertLevel::Info);
    }

    #[test]
    fn info_alert_alone_still_flags_the_report() {
        let leases = LeaseStatistics {
            expired: 60,
            ..quiet_leases()
        };
        let report = LockMonitor::report(
            "t1",
            START,
            leases,
            CollisionStatistics::default(),
            &MonitorConfig::default(),
        );
        assert_eq!(report.status, ReportStatus::Warning);
    }

    #[test]
    fn recommendations_follow_durations_resolutions_and_force_releases() {
        let leases = LeaseStatistics {
            average_duration_minutes: 40.0,
            force_released: 11,
            ..Default::default()
        };
        let collisions = CollisionStatistics {
            total: 10,
            resolved: 5,
            resolution_rate: 50.0,
            ..Default::default()
        };
        let out = LockMonitor::recommendations(&leases, &collisions, &MonitorConfig::default());
        assert_eq!(out.len(), 3);
        assert!(out[1].contains("50%"));
    }

    #[test]
    fn no_collisions_is_not_a_poor_resolution_rate() {
        let out = LockMonitor::recommendations(
            &quiet_leases(),
            &CollisionStatistics::default(),
            &MonitorConfig::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn client_report_uses_configured_thresholds() {
        let mut config = CoreConfig::default();
        config.monitor.max_active_leases = 1;
        let client = WardClient::with_store(
            Arc::new(InMemoryStore::new()),
            config,
            Arc::new(ManualClock::new(START)),
        );
        let doctor = Actor::new("dr_a", ActorRole::Physician);
        for record in ["mr1", "mr2"] {
            client
                .locks()
                .acquire(
                    &doctor,
                    AcquireRequest::new(
                        ResourceRef::new("t1", ResourceType::MedicalRecord, record),
                        LeaseType::MedicalRecordEdit,
                    ),
                )
                .unwrap();
        }

        let report = client.lock_report("t1").unwrap();
        assert_eq!(report.leases.active, 2);
        assert_eq!(report.generated_at, START);
        assert_eq!(report.status, ReportStatus::Warning);
        assert_eq!(report.alerts[0].kind, AlertKind::HighActiveLeases);

        assert_eq!(client.lock_report("t2").unwrap().status, ReportStatus::Healthy);
    }
}
