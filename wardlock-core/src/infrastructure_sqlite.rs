//! SQLite-backed implementation of every storage trait.
//! Provides persistent leases, audit, collisions and queues across restarts.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! wardlock-core = { path = "../wardlock-core", features = ["sqlite"] }
//! ```

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CoreError, StoreError};
use crate::infrastructure::{
    AuditSink, ClinicalHistory, CollisionStore, LeaseStore, QueueStore, QueueTxn,
};
use crate::types::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS leases (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    lease_type    TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT NOT NULL,
    holder_id     TEXT NOT NULL,
    acquired_at   INTEGER NOT NULL,
    expires_at    INTEGER NOT NULL,
    state         TEXT NOT NULL,
    heartbeat_at  INTEGER NOT NULL,
    released_at   INTEGER,
    metadata      TEXT NOT NULL DEFAULT '{}',
    force_release TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_leases_active_resource
    ON leases(tenant_id, resource_type, resource_id) WHERE state = 'active';
CREATE INDEX IF NOT EXISTS idx_leases_tenant_state ON leases(tenant_id, state);
CREATE INDEX IF NOT EXISTS idx_leases_expiry ON leases(state, expires_at);

CREATE TABLE IF NOT EXISTS lease_audit (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    lease_id    TEXT,
    resource    TEXT,
    operation   TEXT NOT NULL,
    actor_id    TEXT NOT NULL,
    actor_role  TEXT NOT NULL,
    success     INTEGER NOT NULL,
    error       TEXT,
    context     TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lease_audit_tenant ON lease_audit(tenant_id, created_at);

CREATE TABLE IF NOT EXISTS queue_audit (
    id           TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL,
    clinician_id TEXT,
    entry_id     TEXT,
    operation    TEXT NOT NULL,
    actor_id     TEXT NOT NULL,
    actor_role   TEXT NOT NULL,
    success      INTEGER NOT NULL,
    error        TEXT,
    context      TEXT NOT NULL,
    created_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_audit_tenant ON queue_audit(tenant_id, created_at);

CREATE TABLE IF NOT EXISTS collisions (
    id                        TEXT PRIMARY KEY,
    tenant_id                 TEXT NOT NULL,
    collision_type            TEXT NOT NULL,
    resource_id               TEXT NOT NULL,
    resource_type             TEXT NOT NULL,
    conflicting_resource_id   TEXT,
    conflicting_resource_type TEXT,
    severity                  TEXT NOT NULL,
    review_required           INTEGER NOT NULL,
    blocking                  INTEGER NOT NULL,
    status                    TEXT NOT NULL,
    detected_by               TEXT NOT NULL,
    detected_at               INTEGER NOT NULL,
    detection_meta            TEXT NOT NULL,
    resolved_by               TEXT,
    resolved_at               INTEGER,
    resolution_notes          TEXT
);
CREATE INDEX IF NOT EXISTS idx_collisions_tenant ON collisions(tenant_id, status);

CREATE TABLE IF NOT EXISTS diagnoses (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    patient_id  TEXT NOT NULL,
    code        TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_diagnoses_patient ON diagnoses(tenant_id, patient_id, recorded_at);

CREATE TABLE IF NOT EXISTS billing_jobs (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    invoice_id     TEXT NOT NULL,
    procedure_code TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_billing_jobs_invoice ON billing_jobs(tenant_id, invoice_id);

CREATE TABLE IF NOT EXISTS exam_orders (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    exam_code  TEXT NOT NULL,
    ordered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_exam_orders_patient ON exam_orders(tenant_id, patient_id, ordered_at);

CREATE TABLE IF NOT EXISTS medications (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    name       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_medications_patient ON medications(tenant_id, patient_id);

CREATE TABLE IF NOT EXISTS queue_entries (
    id                     TEXT PRIMARY KEY,
    tenant_id              TEXT NOT NULL,
    appointment_id         TEXT NOT NULL,
    patient_id             TEXT NOT NULL,
    clinician_id           TEXT NOT NULL,
    position               INTEGER NOT NULL,
    status                 TEXT NOT NULL,
    priority               TEXT NOT NULL,
    enqueued_at            INTEGER NOT NULL,
    seq                    INTEGER NOT NULL,
    called_at              INTEGER,
    service_started_at     INTEGER,
    service_ended_at       INTEGER,
    estimated_wait_minutes INTEGER,
    estimated_call_at      INTEGER,
    notes                  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_queue_active_patient
    ON queue_entries(tenant_id, patient_id) WHERE status IN ('waiting', 'called', 'in_service');
CREATE UNIQUE INDEX IF NOT EXISTS ux_queue_active_appointment
    ON queue_entries(tenant_id, appointment_id) WHERE status IN ('waiting', 'called', 'in_service');
CREATE INDEX IF NOT EXISTS idx_queue_clinician ON queue_entries(tenant_id, clinician_id, status);

CREATE TABLE IF NOT EXISTS queue_tokens (
    tenant_id    TEXT NOT NULL,
    clinician_id TEXT NOT NULL,
    version      INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, clinician_id)
);

CREATE TABLE IF NOT EXISTS queue_seq (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS encounters (
    tenant_id      TEXT NOT NULL,
    appointment_id TEXT NOT NULL,
    status         TEXT NOT NULL,
    notes          TEXT,
    completed_at   INTEGER,
    PRIMARY KEY (tenant_id, appointment_id)
);
";

const LEASE_COLUMNS: &str = "id, tenant_id, lease_type, resource_type, resource_id, holder_id, \
     acquired_at, expires_at, state, heartbeat_at, released_at, metadata, force_release";

const LEASE_AUDIT_COLUMNS: &str = "id, tenant_id, lease_id, resource, operation, actor_id, \
     actor_role, success, error, context, created_at";

const QUEUE_AUDIT_COLUMNS: &str = "id, tenant_id, clinician_id, entry_id, operation, actor_id, \
     actor_role, success, error, context, created_at";

const COLLISION_COLUMNS: &str = "id, tenant_id, collision_type, resource_id, resource_type, \
     conflicting_resource_id, conflicting_resource_type, severity, review_required, blocking, \
     status, detected_by, detected_at, detection_meta, resolved_by, resolved_at, resolution_notes";

const QUEUE_COLUMNS: &str = "id, tenant_id, appointment_id, patient_id, clinician_id, position, \
     status, priority, enqueued_at, seq, called_at, service_started_at, service_ended_at, \
     estimated_wait_minutes, estimated_call_at, notes";

const ACTIVE_STATUSES: &str = "('waiting', 'called', 'in_service')";

/// A persistent store backed by SQLite.
///
/// Uses WAL mode for concurrent read performance. Every call goes through
/// one connection mutex and queue transactions run as `BEGIN IMMEDIATE`,
/// which takes the database-wide write lock. Writers are therefore
/// serialized per process and per file, not per clinician: SQLite has no
/// finer-grained write lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // Enable WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

// ─── Row Mapping ────────────────────────────────────────────────────────────

fn corrupt(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(StoreError::Corrupt(message)))
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| corrupt(idx, format!("unknown value '{}'", raw)))
}

fn opt_enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| corrupt(idx, format!("unknown value '{}'", raw))),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(idx, e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn row_to_lease(row: &Row) -> rusqlite::Result<ResourceLease> {
    let force_release: Option<String> = row.get(12)?;
    let force_release = match force_release {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| corrupt(12, e.to_string()))?),
        None => None,
    };

    Ok(ResourceLease {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        lease_type: enum_col(row, 2, LeaseType::parse)?,
        resource_type: enum_col(row, 3, ResourceType::parse)?,
        resource_id: row.get(4)?,
        holder_id: row.get(5)?,
        acquired_at: row.get(6)?,
        expires_at: row.get(7)?,
        state: enum_col(row, 8, LeaseState::parse)?,
        heartbeat_at: row.get(9)?,
        released_at: row.get(10)?,
        metadata: json_col(row, 11)?,
        force_release,
    })
}

fn row_to_lease_audit(row: &Row) -> rusqlite::Result<LeaseAuditEntry> {
    Ok(LeaseAuditEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        lease_id: row.get(2)?,
        resource: row.get(3)?,
        operation: enum_col(row, 4, LeaseOperation::parse)?,
        actor_id: row.get(5)?,
        actor_role: enum_col(row, 6, ActorRole::parse)?,
        success: row.get(7)?,
        error: row.get(8)?,
        context: json_col(row, 9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_queue_audit(row: &Row) -> rusqlite::Result<QueueAuditEntry> {
    Ok(QueueAuditEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        clinician_id: row.get(2)?,
        entry_id: row.get(3)?,
        operation: enum_col(row, 4, QueueOperation::parse)?,
        actor_id: row.get(5)?,
        actor_role: enum_col(row, 6, ActorRole::parse)?,
        success: row.get(7)?,
        error: row.get(8)?,
        context: json_col(row, 9)?,
        created_at: row.get(10)?,
    })
}

fn parse_collision_status(s: &str) -> Option<CollisionStatus> {
    match s {
        "detected" => Some(CollisionStatus::Detected),
        "resolved" => Some(CollisionStatus::Resolved),
        _ => None,
    }
}

fn collision_status_str(status: CollisionStatus) -> &'static str {
    match status {
        CollisionStatus::Detected => "detected",
        CollisionStatus::Resolved => "resolved",
    }
}

fn row_to_collision(row: &Row) -> rusqlite::Result<CollisionRecord> {
    Ok(CollisionRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        collision_type: enum_col(row, 2, CollisionType::parse)?,
        resource_id: row.get(3)?,
        resource_type: enum_col(row, 4, ResourceType::parse)?,
        conflicting_resource_id: row.get(5)?,
        conflicting_resource_type: opt_enum_col(row, 6, ResourceType::parse)?,
        severity: enum_col(row, 7, Severity::parse)?,
        review_required: row.get(8)?,
        blocking: row.get(9)?,
        status: enum_col(row, 10, parse_collision_status)?,
        detected_by: row.get(11)?,
        detected_at: row.get(12)?,
        detection_meta: json_col(row, 13)?,
        resolved_by: row.get(14)?,
        resolved_at: row.get(15)?,
        resolution_notes: row.get(16)?,
    })
}

fn row_to_entry(row: &Row) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        appointment_id: row.get(2)?,
        patient_id: row.get(3)?,
        clinician_id: row.get(4)?,
        position: row.get(5)?,
        status: enum_col(row, 6, QueueStatus::parse)?,
        priority: enum_col(row, 7, Priority::parse)?,
        enqueued_at: row.get(8)?,
        seq: row.get(9)?,
        called_at: row.get(10)?,
        service_started_at: row.get(11)?,
        service_ended_at: row.get(12)?,
        estimated_wait_minutes: row.get(13)?,
        estimated_call_at: row.get(14)?,
        notes: row.get(15)?,
    })
}

/// Run a query and collect every mapped row.
fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Option<T>, StoreError> {
    Ok(conn.query_row(sql, params, map).optional()?)
}

fn write_entry(conn: &Connection, sql: &str, entry: &QueueEntry) -> Result<usize, StoreError> {
    Ok(conn.execute(
        sql,
        params![
            entry.id,
            entry.tenant_id,
            entry.appointment_id,
            entry.patient_id,
            entry.clinician_id,
            entry.position,
            entry.status.as_str(),
            entry.priority.as_str(),
            entry.enqueued_at,
            entry.seq,
            entry.called_at,
            entry.service_started_at,
            entry.service_ended_at,
            entry.estimated_wait_minutes,
            entry.estimated_call_at,
            entry.notes,
        ],
    )?)
}

// ─── Leases ─────────────────────────────────────────────────────────────────

impl LeaseStore for SqliteStore {
    fn insert_active(&self, lease: &ResourceLease) -> Result<(), StoreError> {
        let metadata = to_json(&lease.metadata)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO leases ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, NULL, ?10, NULL)",
                LEASE_COLUMNS
            ),
            params![
                lease.id,
                lease.tenant_id,
                lease.lease_type.as_str(),
                lease.resource_type.as_str(),
                lease.resource_id,
                lease.holder_id,
                lease.acquired_at,
                lease.expires_at,
                lease.heartbeat_at,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn get(&self, tenant_id: &str, lease_id: &str) -> Result<Option<ResourceLease>, StoreError> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM leases WHERE tenant_id = ?1 AND id = ?2", LEASE_COLUMNS),
            params![tenant_id, lease_id],
            row_to_lease,
        )
    }

    fn find_active(&self, resource: &ResourceRef) -> Result<Option<ResourceLease>, StoreError> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM leases
                 WHERE tenant_id = ?1 AND resource_type = ?2 AND resource_id = ?3 AND state = 'active'",
                LEASE_COLUMNS
            ),
            params![
                resource.tenant_id,
                resource.resource_type.as_str(),
                resource.resource_id
            ],
            row_to_lease,
        )
    }

    fn update_if_active(&self, lease: &ResourceLease) -> Result<bool, StoreError> {
        let metadata = to_json(&lease.metadata)?;
        let force_release = lease.force_release.as_ref().map(to_json).transpose()?;
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE leases
             SET lease_type = ?2, holder_id = ?3, expires_at = ?4, state = ?5, heartbeat_at = ?6,
                 released_at = ?7, metadata = ?8, force_release = ?9
             WHERE id = ?1 AND state = 'active'",
            params![
                lease.id,
                lease.lease_type.as_str(),
                lease.holder_id,
                lease.expires_at,
                lease.state.as_str(),
                lease.heartbeat_at,
                lease.released_at,
                metadata,
                force_release,
            ],
        )?;
        Ok(rows > 0)
    }

    fn expire_if_overdue(&self, tenant_id: &str, lease_id: &str, now: u64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE leases SET state = 'expired'
             WHERE id = ?1 AND tenant_id = ?2 AND state = 'active' AND expires_at <= ?3",
            params![lease_id, tenant_id, now],
        )?;
        Ok(rows > 0)
    }

    fn list(
        &self,
        tenant_id: &str,
        state: Option<LeaseState>,
    ) -> Result<Vec<ResourceLease>, StoreError> {
        let conn = self.lock()?;
        match state {
            Some(state) => query_all(
                &conn,
                &format!(
                    "SELECT {} FROM leases WHERE tenant_id = ?1 AND state = ?2
                     ORDER BY acquired_at DESC, id",
                    LEASE_COLUMNS
                ),
                params![tenant_id, state.as_str()],
                row_to_lease,
            ),
            None => query_all(
                &conn,
                &format!(
                    "SELECT {} FROM leases WHERE tenant_id = ?1 ORDER BY acquired_at DESC, id",
                    LEASE_COLUMNS
                ),
                params![tenant_id],
                row_to_lease,
            ),
        }
    }

    fn expire_overdue(&self, tenant_id: Option<&str>, now: u64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = match tenant_id {
            Some(tenant_id) => conn.execute(
                "UPDATE leases SET state = 'expired'
                 WHERE state = 'active' AND expires_at <= ?1 AND tenant_id = ?2",
                params![now, tenant_id],
            )?,
            None => conn.execute(
                "UPDATE leases SET state = 'expired' WHERE state = 'active' AND expires_at <= ?1",
                params![now],
            )?,
        };
        Ok(rows)
    }
}

// ─── Audit ──────────────────────────────────────────────────────────────────

impl AuditSink for SqliteStore {
    fn record_lease(&self, entry: &LeaseAuditEntry) -> Result<(), StoreError> {
        let context = to_json(&entry.context)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO lease_audit ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                LEASE_AUDIT_COLUMNS
            ),
            params![
                entry.id,
                entry.tenant_id,
                entry.lease_id,
                entry.resource,
                entry.operation.as_str(),
                entry.actor_id,
                entry.actor_role.as_str(),
                entry.success,
                entry.error,
                context,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    fn record_queue(&self, entry: &QueueAuditEntry) -> Result<(), StoreError> {
        let context = to_json(&entry.context)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO queue_audit ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                QUEUE_AUDIT_COLUMNS
            ),
            params![
                entry.id,
                entry.tenant_id,
                entry.clinician_id,
                entry.entry_id,
                entry.operation.as_str(),
                entry.actor_id,
                entry.actor_role.as_str(),
                entry.success,
                entry.error,
                context,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    fn lease_audit(
        &self,
        tenant_id: &str,
        lease_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LeaseAuditEntry>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM lease_audit
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR lease_id = ?2)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3",
                LEASE_AUDIT_COLUMNS
            ),
            params![tenant_id, lease_id, limit as i64],
            row_to_lease_audit,
        )
    }

    fn queue_audit(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueAuditEntry>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM queue_audit
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR clinician_id = ?2)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3",
                QUEUE_AUDIT_COLUMNS
            ),
            params![tenant_id, clinician_id, limit as i64],
            row_to_queue_audit,
        )
    }
}

// ─── Collisions ─────────────────────────────────────────────────────────────

impl CollisionStore for SqliteStore {
    fn insert(&self, record: &CollisionRecord) -> Result<(), StoreError> {
        let meta = to_json(&record.detection_meta)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO collisions ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                COLLISION_COLUMNS
            ),
            params![
                record.id,
                record.tenant_id,
                record.collision_type.as_str(),
                record.resource_id,
                record.resource_type.as_str(),
                record.conflicting_resource_id,
                record.conflicting_resource_type.map(ResourceType::as_str),
                record.severity.as_str(),
                record.review_required,
                record.blocking,
                collision_status_str(record.status),
                record.detected_by,
                record.detected_at,
                meta,
                record.resolved_by,
                record.resolved_at,
                record.resolution_notes,
            ],
        )?;
        Ok(())
    }

    fn get(&self, tenant_id: &str, id: &str) -> Result<Option<CollisionRecord>, StoreError> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM collisions WHERE tenant_id = ?1 AND id = ?2", COLLISION_COLUMNS),
            params![tenant_id, id],
            row_to_collision,
        )
    }

    fn resolve(
        &self,
        tenant_id: &str,
        id: &str,
        actor_id: &str,
        notes: &str,
        now: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE collisions
             SET status = 'resolved', resolved_by = ?3, resolved_at = ?4, resolution_notes = ?5
             WHERE tenant_id = ?1 AND id = ?2 AND status = 'detected'",
            params![tenant_id, id, actor_id, now, notes],
        )?;
        Ok(rows > 0)
    }

    fn list(
        &self,
        tenant_id: &str,
        pending_only: bool,
    ) -> Result<Vec<CollisionRecord>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM collisions
                 WHERE tenant_id = ?1 AND (?2 = 0 OR status = 'detected')
                 ORDER BY detected_at DESC, id",
                COLLISION_COLUMNS
            ),
            params![tenant_id, pending_only],
            row_to_collision,
        )
    }
}

// ─── Clinical History ───────────────────────────────────────────────────────

impl ClinicalHistory for SqliteStore {
    fn diagnoses_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<DiagnosisRecord>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            "SELECT id, patient_id, code, recorded_at FROM diagnoses
             WHERE tenant_id = ?1 AND patient_id = ?2 AND recorded_at >= ?3
             ORDER BY recorded_at DESC",
            params![tenant_id, patient_id, since],
            |row| {
                Ok(DiagnosisRecord {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    code: row.get(2)?,
                    recorded_at: row.get(3)?,
                })
            },
        )
    }

    fn billing_jobs(
        &self,
        tenant_id: &str,
        invoice_id: &str,
    ) -> Result<Vec<BillingJob>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            "SELECT id, invoice_id, procedure_code, status, created_at FROM billing_jobs
             WHERE tenant_id = ?1 AND invoice_id = ?2
             ORDER BY created_at",
            params![tenant_id, invoice_id],
            |row| {
                Ok(BillingJob {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    procedure_code: row.get(2)?,
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
    }

    fn exams_since(
        &self,
        tenant_id: &str,
        patient_id: &str,
        since: u64,
    ) -> Result<Vec<ExamOrder>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            "SELECT id, patient_id, exam_code, ordered_at FROM exam_orders
             WHERE tenant_id = ?1 AND patient_id = ?2 AND ordered_at >= ?3
             ORDER BY ordered_at DESC",
            params![tenant_id, patient_id, since],
            |row| {
                Ok(ExamOrder {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    exam_code: row.get(2)?,
                    ordered_at: row.get(3)?,
                })
            },
        )
    }

    fn active_medications(
        &self,
        tenant_id: &str,
        patient_id: &str,
    ) -> Result<Vec<ActiveMedication>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            "SELECT id, patient_id, name FROM medications WHERE tenant_id = ?1 AND patient_id = ?2",
            params![tenant_id, patient_id],
            |row| {
                Ok(ActiveMedication {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
    }

    fn record_diagnosis(
        &self,
        tenant_id: &str,
        record: &DiagnosisRecord,
    ) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO diagnoses (id, tenant_id, patient_id, code, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                tenant_id,
                record.patient_id,
                record.code,
                record.recorded_at
            ],
        )?;
        Ok(())
    }

    fn record_billing_job(&self, tenant_id: &str, job: &BillingJob) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO billing_jobs (id, tenant_id, invoice_id, procedure_code, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                tenant_id,
                job.invoice_id,
                job.procedure_code,
                job.status,
                job.created_at
            ],
        )?;
        Ok(())
    }

    fn record_exam(&self, tenant_id: &str, exam: &ExamOrder) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO exam_orders (id, tenant_id, patient_id, exam_code, ordered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                exam.id,
                tenant_id,
                exam.patient_id,
                exam.exam_code,
                exam.ordered_at
            ],
        )?;
        Ok(())
    }

    fn record_medication(
        &self,
        tenant_id: &str,
        medication: &ActiveMedication,
    ) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO medications (id, tenant_id, patient_id, name) VALUES (?1, ?2, ?3, ?4)",
            params![
                medication.id,
                tenant_id,
                medication.patient_id,
                medication.name
            ],
        )?;
        Ok(())
    }
}

// ─── Queue ──────────────────────────────────────────────────────────────────

struct SqliteTxn<'a> {
    conn: &'a Connection,
    tenant_id: &'a str,
    clinician_id: &'a str,
}

impl QueueTxn for SqliteTxn<'_> {
    fn active_entries(&mut self) -> Result<Vec<QueueEntry>, StoreError> {
        query_all(
            self.conn,
            &format!(
                "SELECT {} FROM queue_entries
                 WHERE tenant_id = ?1 AND clinician_id = ?2 AND status IN {}",
                QUEUE_COLUMNS, ACTIVE_STATUSES
            ),
            params![self.tenant_id, self.clinician_id],
            row_to_entry,
        )
    }

    fn find_active_for(
        &mut self,
        patient_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        query_one(
            self.conn,
            &format!(
                "SELECT {} FROM queue_entries
                 WHERE tenant_id = ?1 AND (patient_id = ?2 OR appointment_id = ?3) AND status IN {}
                 LIMIT 1",
                QUEUE_COLUMNS, ACTIVE_STATUSES
            ),
            params![self.tenant_id, patient_id, appointment_id],
            row_to_entry,
        )
    }

    fn get(&mut self, entry_id: &str) -> Result<Option<QueueEntry>, StoreError> {
        query_one(
            self.conn,
            &format!(
                "SELECT {} FROM queue_entries WHERE tenant_id = ?1 AND id = ?2",
                QUEUE_COLUMNS
            ),
            params![self.tenant_id, entry_id],
            row_to_entry,
        )
    }

    fn latest_for_appointment(
        &mut self,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        query_one(
            self.conn,
            &format!(
                "SELECT {} FROM queue_entries WHERE tenant_id = ?1 AND appointment_id = ?2
                 ORDER BY enqueued_at DESC, seq DESC LIMIT 1",
                QUEUE_COLUMNS
            ),
            params![self.tenant_id, appointment_id],
            row_to_entry,
        )
    }

    fn next_seq(&mut self) -> Result<u64, StoreError> {
        self.conn.execute(
            "INSERT INTO queue_seq (id, value) VALUES (1, 1)
             ON CONFLICT(id) DO UPDATE SET value = value + 1",
            [],
        )?;
        Ok(self
            .conn
            .query_row("SELECT value FROM queue_seq WHERE id = 1", [], |row| row.get(0))?)
    }

    fn insert(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        write_entry(
            self.conn,
            &format!(
                "INSERT INTO queue_entries ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                QUEUE_COLUMNS
            ),
            entry,
        )?;
        Ok(())
    }

    fn update(&mut self, entry: &QueueEntry) -> Result<(), StoreError> {
        let rows = write_entry(
            self.conn,
            "UPDATE queue_entries
             SET tenant_id = ?2, appointment_id = ?3, patient_id = ?4, clinician_id = ?5,
                 position = ?6, status = ?7, priority = ?8, enqueued_at = ?9, seq = ?10,
                 called_at = ?11, service_started_at = ?12, service_ended_at = ?13,
                 estimated_wait_minutes = ?14, estimated_call_at = ?15, notes = ?16
             WHERE id = ?1",
            entry,
        )?;
        if rows == 0 {
            return Err(StoreError::Backend(format!(
                "queue entry '{}' vanished mid-transaction",
                entry.id
            )));
        }
        Ok(())
    }

    fn complete_encounter(
        &mut self,
        appointment_id: &str,
        notes: Option<&str>,
        now: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO encounters (tenant_id, appointment_id, status, notes, completed_at)
             VALUES (?1, ?2, 'completed', ?3, ?4)
             ON CONFLICT(tenant_id, appointment_id)
             DO UPDATE SET status = 'completed', notes = COALESCE(?3, notes), completed_at = ?4",
            params![self.tenant_id, appointment_id, notes, now],
        )?;
        Ok(())
    }
}

impl QueueStore for SqliteStore {
    fn transact(
        &self,
        tenant_id: &str,
        clinician_id: &str,
        work: &mut dyn FnMut(&mut dyn QueueTxn) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        tx.execute(
            "INSERT INTO queue_tokens (tenant_id, clinician_id, version) VALUES (?1, ?2, 1)
             ON CONFLICT(tenant_id, clinician_id) DO UPDATE SET version = version + 1",
            params![tenant_id, clinician_id],
        )
        .map_err(StoreError::from)?;

        let mut txn = SqliteTxn {
            conn: &tx,
            tenant_id,
            clinician_id,
        };
        // Dropping `tx` on error rolls back
        work(&mut txn)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    fn get(&self, tenant_id: &str, entry_id: &str) -> Result<Option<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM queue_entries WHERE tenant_id = ?1 AND id = ?2",
                QUEUE_COLUMNS
            ),
            params![tenant_id, entry_id],
            row_to_entry,
        )
    }

    fn latest_for_appointment(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM queue_entries WHERE tenant_id = ?1 AND appointment_id = ?2
                 ORDER BY enqueued_at DESC, seq DESC LIMIT 1",
                QUEUE_COLUMNS
            ),
            params![tenant_id, appointment_id],
            row_to_entry,
        )
    }

    fn list_active(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM queue_entries
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR clinician_id = ?2) AND status IN {}
                 ORDER BY clinician_id, position",
                QUEUE_COLUMNS, ACTIVE_STATUSES
            ),
            params![tenant_id, clinician_id],
            row_to_entry,
        )
    }

    fn list_all(
        &self,
        tenant_id: &str,
        clinician_id: Option<&str>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM queue_entries
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR clinician_id = ?2)
                 ORDER BY enqueued_at, seq",
                QUEUE_COLUMNS
            ),
            params![tenant_id, clinician_id],
            row_to_entry,
        )
    }

    fn encounter_status(
        &self,
        tenant_id: &str,
        appointment_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT status FROM encounters WHERE tenant_id = ?1 AND appointment_id = ?2",
                params![tenant_id, appointment_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}
