//! Lock usage report: lease and collision statistics held against the
//! thresholds in [`MonitorConfig`].

use serde::Serialize;

use crate::config::MonitorConfig;
use crate::types::{CollisionStatistics, LeaseStatistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighActiveLeases,
    LongLeaseDuration,
    ManyExpiredLeases,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::HighActiveLeases => "high_active_leases",
            AlertKind::LongLeaseDuration => "long_lease_duration",
            AlertKind::ManyExpiredLeases => "many_expired_leases",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorAlert {
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Healthy,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockReport {
    pub tenant_id: String,
    pub generated_at: u64,
    pub leases: LeaseStatistics,
    pub collisions: CollisionStatistics,
    pub alerts: Vec<MonitorAlert>,
    pub recommendations: Vec<String>,
    /// `Warning` as soon as there is any alert
    pub status: ReportStatus,
}

pub struct LockMonitor;

impl LockMonitor {
    pub fn alerts(leases: &LeaseStatistics, config: &MonitorConfig) -> Vec<MonitorAlert> {
        let mut alerts = Vec::new();
        if leases.active > config.max_active_leases {
            alerts.push(MonitorAlert {
                kind: AlertKind::HighActiveLeases,
                level: AlertLevel::Warning,
                message: format!(
                    "{} active leases, above the limit of {}",
                    leases.active, config.max_active_leases
                ),
            });
        }
        if leases.average_duration_minutes > config.max_average_duration_minutes {
            alerts.push(MonitorAlert {
                kind: AlertKind::LongLeaseDuration,
                level: AlertLevel::Warning,
                message: format!(
                    "average lease duration is {:.1} minutes, above {:.1}",
                    leases.average_duration_minutes, config.max_average_duration_minutes
                ),
            });
        }
        if leases.expired > config.max_expired_leases {
            alerts.push(MonitorAlert {
                kind: AlertKind::ManyExpiredLeases,
                level: AlertLevel::Info,
                message: format!("{} leases ended by expiry instead of release", leases.expired),
            });
        }
        alerts
    }

    pub fn recommendations(
        leases: &LeaseStatistics,
        collisions: &CollisionStatistics,
        config: &MonitorConfig,
    ) -> Vec<String> {
        let mut out = Vec::new();
        if leases.average_duration_minutes > config.review_ttl_above_minutes {
            out.push("Reduce lease TTLs so records are freed sooner".to_string());
        }
        // No collisions means nothing to resolve
        if collisions.total > 0 && collisions.resolution_rate < config.min_resolution_rate {
            out.push(format!(
                "Resolve pending collisions: {:.0}% resolved, target {:.0}%",
                collisions.resolution_rate, config.min_resolution_rate
            ));
        }
        if leases.force_released > config.max_force_released {
            out.push(format!(
                "Review lease usage: {} leases were force-released",
                leases.force_released
            ));
        }
        out
    }

    pub fn report(
        tenant_id: &str,
        now: u64,
        leases: LeaseStatistics,
        collisions: CollisionStatistics,
        config: &MonitorConfig,
    ) -> LockReport {
        let alerts = Self::alerts(&leases, config);
        let recommendations = Self::recommendations(&leases, &collisions, config);
        let status = if alerts.is_empty() {
            ReportStatus::Healthy
        } else {
            ReportStatus::Warning
        };
        LockReport {
            tenant_id: tenant_id.to_string(),
            generated_at: now,
            leases,
            collisions,
            alerts,
            recommendations,
            status,
        }
    }
}
