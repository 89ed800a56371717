//! Tunables for the services. Every section has defaults so a partial TOML
//! file (or none at all) is enough.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub queue: QueueConfig,
    pub collision: CollisionRules,
    pub notify: NotifyConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub average_service_minutes: u32,
    /// Upper bound for the advisory wait estimate
    pub max_estimated_wait_minutes: u32,
    /// A `Called` patient who has not started service after this long is a no-show
    pub no_show_timeout_minutes: u32,
    /// Waiting patients at or above this count flag the queue as overflowing
    pub max_queue_size: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            average_service_minutes: 20,
            max_estimated_wait_minutes: 120,
            no_show_timeout_minutes: 15,
            max_queue_size: 20,
        }
    }
}

/// Rule tables for the collision detector. Keys and values are upper-cased
/// codes; lookups are symmetric only when the table says so.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionRules {
    pub diagnosis_lookback_days: u32,
    pub exam_lookback_days: u32,
    /// Diagnosis code → codes it must not coexist with
    pub antagonistic_diagnoses: BTreeMap<String, Vec<String>>,
    /// Exam code → exam codes that overlap with it
    pub overlapping_exams: BTreeMap<String, Vec<String>>,
    /// Medication → medications it interacts with
    pub medication_interactions: BTreeMap<String, Vec<String>>,
}

fn table(rows: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    rows.iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

impl Default for CollisionRules {
    fn default() -> Self {
        Self {
            diagnosis_lookback_days: 30,
            exam_lookback_days: 7,
            antagonistic_diagnoses: table(&[
                ("F32", &["F31", "F33"]),
                ("F31", &["F32", "F33"]),
                ("F33", &["F31", "F32"]),
                ("I10", &["I11", "I12"]),
                ("E11", &["E10", "E12"]),
            ]),
            overlapping_exams: table(&[
                ("ECG", &["ECG", "HOLTER"]),
                ("HOLTER", &["ECG", "HOLTER"]),
                ("RX_TORAX", &["RX_TORAX", "TC_TORAX"]),
                ("TC_TORAX", &["RX_TORAX", "TC_TORAX"]),
            ]),
            medication_interactions: table(&[
                ("WARFARINA", &["ASPIRINA", "IBUPROFENO", "DICLOFENACO"]),
                ("DIGOXINA", &["FUROSEMIDA", "HIDROCLOROTIAZIDA"]),
                ("METFORMINA", &["INSULINA", "GLIBENCLAMIDA"]),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Per-subscriber buffer; events beyond it are dropped for that subscriber
    pub channel_capacity: usize,
    pub max_idle_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            max_idle_seconds: 90,
            sweep_interval_seconds: 30,
        }
    }
}

/// Thresholds for the lock usage report. Values strictly above a `max_*`
/// (or below a `min_*`) raise an alert or a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub max_active_leases: usize,
    pub max_average_duration_minutes: f64,
    pub max_expired_leases: usize,
    /// Average duration above this suggests the default TTLs are too long
    pub review_ttl_above_minutes: f64,
    pub max_force_released: usize,
    /// Percent of collisions resolved
    pub min_resolution_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_active_leases: 100,
            max_average_duration_minutes: 60.0,
            max_expired_leases: 50,
            review_ttl_above_minutes: 30.0,
            max_force_released: 10,
            min_resolution_rate: 80.0,
        }
    }
}
