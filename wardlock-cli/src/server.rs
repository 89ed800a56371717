use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, Request, State,
    },
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use wardlock_core::config::CoreConfig;
use wardlock_core::lock_manager::AcquireRequest;
use wardlock_core::notify::Subscription;
use wardlock_core::queue_coordinator::EnqueueRequest;
use wardlock_core::types::{
    AcquireOutcome, ActiveMedication, BillingJob, DiagnosisRecord, EnqueueOutcome, ExamOrder,
    ResourceRef,
};
use wardlock_core::{CoreResult, WardClient};

use crate::handlers::*;

const MAX_IN_FLIGHT_REQUESTS: usize = 512;
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_AUDIT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    client: Arc<WardClient>,
    api_key: Option<Arc<str>>,
}

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub storage: String,
    pub config: CoreConfig,
    pub api_key: Option<String>,
}

pub async fn run(options: ServeOptions) -> Result<(), String> {
    let sweep_every = Duration::from_secs(options.config.notify.sweep_interval_seconds.max(1));
    let client = create_client(&options.storage, options.config)?;
    let state = AppState {
        client: Arc::new(client),
        api_key: options.api_key.filter(|k| !k.is_empty()).map(Arc::from),
    };

    spawn_sweeper(state.clone(), sweep_every);

    let app = Router::new()
        // Leases
        .route("/leases", post(acquire_lease).get(list_leases))
        .route("/leases/sweep", post(sweep_leases))
        .route("/leases/stats", get(lease_stats))
        .route("/leases/audit", get(lease_audit))
        .route("/leases/status", get(lease_status))
        .route("/leases/report", get(lease_report))
        .route("/leases/{id}", get(get_lease))
        .route("/leases/{id}/heartbeat", post(heartbeat_lease))
        .route("/leases/{id}/release", post(release_lease))
        .route("/leases/{id}/force-release", post(force_release_lease))
        // Collisions
        .route("/collisions", get(list_collisions))
        .route("/collisions/stats", get(collision_stats))
        .route("/collisions/duplicate-submission", post(check_duplicate_submission))
        .route("/collisions/diagnosis", post(check_diagnosis))
        .route("/collisions/exam", post(check_exam))
        .route("/collisions/medication", post(check_medication))
        .route("/collisions/{id}/resolve", post(resolve_collision))
        // Clinical history
        .route("/history/diagnoses", post(record_diagnosis))
        .route("/history/billing-jobs", post(record_billing_job))
        .route("/history/exams", post(record_exam))
        .route("/history/medications", post(record_medication))
        // Queue
        .route("/queue", post(enqueue).get(list_queue))
        .route("/queue/call-next", post(call_next))
        .route("/queue/expire-no-shows", post(expire_no_shows))
        .route("/queue/finalize/{appointment_id}", post(finalize))
        .route("/queue/audit", get(queue_audit))
        .route("/queue/stats", get(queue_stats))
        .route("/queue/ws", get(queue_ws))
        .route("/queue/{id}", get(get_queue_entry))
        .route("/queue/{id}/dequeue", post(dequeue))
        .route("/queue/{id}/start", post(start_service))
        .route("/queue/{id}/no-show", post(mark_no_show))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        // Health is always open
        .route("/health", get(health))
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("{}:{}", options.host, options.port);

    if state.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No WARDLOCK_API_KEY set, server is open (dev mode)");
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {}: {}", addr, e))?;
    tracing::info!(%addr, storage = %options.storage, "wardlock server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {}", e))
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// Periodically expire overdue leases and drop idle push subscribers.
fn spawn_sweeper(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let client = state.client.clone();
            match tokio::task::spawn_blocking(move || client.sweep()).await {
                Ok(Ok((0, 0))) => {}
                Ok(Ok((expired, dropped))) => {
                    tracing::info!(expired, dropped, "Sweep completed");
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "Sweep failed"),
                Err(e) => tracing::error!(error = %e, "Sweep task panicked"),
            }
        }
    });
}

/// Run a store-backed call off the async runtime.
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&WardClient) -> CoreResult<T> + Send + 'static,
{
    let client = state.client.clone();
    tokio::task::spawn_blocking(move || f(&client))
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;
type Created<T> = ApiResult<(StatusCode, Json<ApiResponse<T>>)>;

fn reply<T: serde::Serialize>(data: T) -> Reply<T> {
    Ok(Json(ApiResponse::ok(data)))
}

fn created<T: serde::Serialize>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(ApiError::unauthorized()),
    }
}

// ─── Health ─────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.client.notifier().subscriber_count(None),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ─── Lease Handlers ─────────────────────────────────────────────────────────

async fn acquire_lease(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<AcquireLeaseRequest>,
) -> Created<wardlock_core::types::ResourceLease> {
    let (resource_type, lease_type) = req.validate()?;
    let mut request = AcquireRequest::new(
        ResourceRef::new(caller.tenant_id, resource_type, req.resource_id),
        lease_type,
    )
    .metadata(req.metadata);
    if let Some(ttl) = req.ttl_minutes {
        request = request.ttl_minutes(ttl);
    }

    let actor = caller.actor;
    match blocking(&state, move |c| c.locks().acquire(&actor, request)).await? {
        AcquireOutcome::Granted { lease } => created(lease),
        AcquireOutcome::Extended { lease } => Ok((StatusCode::OK, Json(ApiResponse::ok(lease)))),
        AcquireOutcome::Conflict { conflict } => Err(ApiError::conflict(
            format!("resource is held by {}", conflict.holder_id),
            conflict,
        )),
    }
}

async fn list_leases(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<LeaseListQuery>,
) -> Reply<Vec<wardlock_core::types::ResourceLease>> {
    let resource_type = query
        .resource_type
        .as_deref()
        .map(parse_resource_type)
        .transpose()?;
    let leases = blocking(&state, move |c| {
        c.locks().list_active(&caller.tenant_id, resource_type)
    })
    .await?;
    reply(leases)
}

async fn get_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Reply<wardlock_core::types::ResourceLease> {
    let lease = blocking(&state, move |c| c.locks().get(&caller.tenant_id, &id)).await?;
    reply(lease)
}

async fn heartbeat_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<HeartbeatRequest>>,
) -> Reply<wardlock_core::types::ResourceLease> {
    let Json(req) = body.unwrap_or_default();
    let lease = blocking(&state, move |c| {
        c.locks()
            .heartbeat(&caller.actor, &caller.tenant_id, &id, req.extend_by_minutes)
    })
    .await?;
    reply(lease)
}

async fn release_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<ReleaseRequest>>,
) -> Reply<wardlock_core::types::ResourceLease> {
    let Json(req) = body.unwrap_or_default();
    let lease = blocking(&state, move |c| {
        c.locks()
            .release(&caller.actor, &caller.tenant_id, &id, req.reason.as_deref())
    })
    .await?;
    reply(lease)
}

async fn force_release_lease(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<ForceReleaseRequest>,
) -> Reply<wardlock_core::types::ResourceLease> {
    let lease = blocking(&state, move |c| {
        c.locks()
            .force_release(&caller.actor, &caller.tenant_id, &id, &req.reason)
    })
    .await?;
    reply(lease)
}

async fn sweep_leases(State(state): State<AppState>, caller: Caller) -> Reply<SweepResponse> {
    let expired = blocking(&state, move |c| c.locks().sweep_expired(Some(&caller.tenant_id))).await?;
    reply(SweepResponse { expired })
}

async fn lease_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Reply<wardlock_core::types::LeaseStatistics> {
    let stats = blocking(&state, move |c| c.locks().statistics(&caller.tenant_id)).await?;
    reply(stats)
}

async fn lease_audit(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<LeaseAuditQuery>,
) -> Reply<Vec<wardlock_core::types::LeaseAuditEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    let trail = blocking(&state, move |c| {
        c.locks()
            .audit_trail(&caller.tenant_id, query.lease_id.as_deref(), limit)
    })
    .await?;
    reply(trail)
}

async fn lease_status(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<LeaseStatusQuery>,
) -> Reply<wardlock_core::types::LockStatus> {
    let resource = ResourceRef::new(caller.tenant_id, query.validate()?, query.resource_id);
    let actor = caller.actor;
    let status = blocking(&state, move |c| c.locks().status(&actor, &resource)).await?;
    reply(status)
}

async fn lease_report(
    State(state): State<AppState>,
    caller: Caller,
) -> Reply<wardlock_core::monitor::LockReport> {
    let report = blocking(&state, move |c| c.lock_report(&caller.tenant_id)).await?;
    reply(report)
}

// ─── Collision Handlers ─────────────────────────────────────────────────────

async fn check_duplicate_submission(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<DuplicateSubmissionRequest>,
) -> Reply<CheckResponse> {
    let found = blocking(&state, move |c| {
        c.collisions().check_duplicate_submission(
            &caller.tenant_id,
            &caller.actor,
            &req.invoice_id,
            &req.procedure_code,
        )
    })
    .await?;
    reply(found.into())
}

async fn check_diagnosis(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<DiagnosisCheckRequest>,
) -> Reply<CheckResponse> {
    let found = blocking(&state, move |c| {
        c.collisions()
            .check_diagnosis(&caller.tenant_id, &caller.actor, &req.patient_id, &req.code)
    })
    .await?;
    reply(found.into())
}

async fn check_exam(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ExamCheckRequest>,
) -> Reply<CheckResponse> {
    let found = blocking(&state, move |c| {
        c.collisions()
            .check_exam(&caller.tenant_id, &caller.actor, &req.patient_id, &req.exam_code)
    })
    .await?;
    reply(found.into())
}

async fn check_medication(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<MedicationCheckRequest>,
) -> Reply<CheckResponse> {
    let found = blocking(&state, move |c| {
        c.collisions().check_medication(
            &caller.tenant_id,
            &caller.actor,
            &req.patient_id,
            &req.medication,
        )
    })
    .await?;
    reply(found.into())
}

async fn list_collisions(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<CollisionListQuery>,
) -> Reply<Vec<wardlock_core::types::CollisionRecord>> {
    let records = blocking(&state, move |c| {
        c.collisions().list(&caller.tenant_id, query.pending_only)
    })
    .await?;
    reply(records)
}

async fn resolve_collision(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<ResolveCollisionRequest>,
) -> Reply<wardlock_core::types::CollisionRecord> {
    let record = blocking(&state, move |c| {
        c.collisions()
            .resolve(&caller.tenant_id, &id, &caller.actor, &req.notes)
    })
    .await?;
    reply(record)
}

async fn collision_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Reply<wardlock_core::types::CollisionStatistics> {
    let stats = blocking(&state, move |c| c.collisions().statistics(&caller.tenant_id)).await?;
    reply(stats)
}

// ─── History Handlers ───────────────────────────────────────────────────────

async fn record_diagnosis(
    State(state): State<AppState>,
    caller: Caller,
    Json(record): Json<DiagnosisRecord>,
) -> Created<DiagnosisRecord> {
    let record = blocking(&state, move |c| {
        c.collisions()
            .history()
            .record_diagnosis(&caller.tenant_id, &record)?;
        Ok(record)
    })
    .await?;
    created(record)
}

async fn record_billing_job(
    State(state): State<AppState>,
    caller: Caller,
    Json(job): Json<BillingJob>,
) -> Created<BillingJob> {
    let job = blocking(&state, move |c| {
        c.collisions()
            .history()
            .record_billing_job(&caller.tenant_id, &job)?;
        Ok(job)
    })
    .await?;
    created(job)
}

async fn record_exam(
    State(state): State<AppState>,
    caller: Caller,
    Json(exam): Json<ExamOrder>,
) -> Created<ExamOrder> {
    let exam = blocking(&state, move |c| {
        c.collisions().history().record_exam(&caller.tenant_id, &exam)?;
        Ok(exam)
    })
    .await?;
    created(exam)
}

async fn record_medication(
    State(state): State<AppState>,
    caller: Caller,
    Json(medication): Json<ActiveMedication>,
) -> Created<ActiveMedication> {
    let medication = blocking(&state, move |c| {
        c.collisions()
            .history()
            .record_medication(&caller.tenant_id, &medication)?;
        Ok(medication)
    })
    .await?;
    created(medication)
}

// ─── Queue Handlers ─────────────────────────────────────────────────────────

async fn enqueue(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<EnqueueBody>,
) -> Created<wardlock_core::types::QueueEntry> {
    let priority = parse_priority(body.priority.as_deref())?;
    let request = EnqueueRequest {
        tenant_id: caller.tenant_id,
        appointment_id: body.appointment_id,
        patient_id: body.patient_id,
        clinician_id: body.clinician_id,
        priority,
        notes: body.notes,
    };

    let actor = caller.actor;
    match blocking(&state, move |c| c.queue().enqueue(&actor, request)).await? {
        EnqueueOutcome::Enqueued { entry } => created(entry),
        EnqueueOutcome::Existing { entry } => Ok((StatusCode::OK, Json(ApiResponse::ok(entry)))),
        EnqueueOutcome::Conflict { conflict } => Err(ApiError::conflict(conflict.reason.clone(), conflict)),
    }
}

async fn list_queue(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ClinicianQuery>,
) -> Reply<Vec<wardlock_core::types::QueueEntry>> {
    let entries = blocking(&state, move |c| {
        c.queue()
            .list_active(&caller.tenant_id, query.clinician_id.as_deref())
    })
    .await?;
    reply(entries)
}

async fn get_queue_entry(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Reply<wardlock_core::types::QueueEntry> {
    let entry = blocking(&state, move |c| c.queue().get(&caller.tenant_id, &id)).await?;
    reply(entry)
}

async fn dequeue(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<DequeueRequest>>,
) -> Reply<wardlock_core::types::QueueEntry> {
    let Json(req) = body.unwrap_or_default();
    let entry = blocking(&state, move |c| {
        c.queue()
            .dequeue(&caller.actor, &caller.tenant_id, &id, req.reason.as_deref())
    })
    .await?;
    reply(entry)
}

async fn start_service(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Reply<wardlock_core::types::QueueEntry> {
    let entry = blocking(&state, move |c| {
        c.queue().start_service(&caller.actor, &caller.tenant_id, &id)
    })
    .await?;
    reply(entry)
}

async fn mark_no_show(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Reply<wardlock_core::types::QueueEntry> {
    let entry = blocking(&state, move |c| {
        c.queue().mark_no_show(&caller.actor, &caller.tenant_id, &id)
    })
    .await?;
    reply(entry)
}

async fn call_next(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ClinicianRequest>,
) -> Reply<Option<wardlock_core::types::QueueEntry>> {
    let called = blocking(&state, move |c| {
        c.queue()
            .call_next(&caller.actor, &caller.tenant_id, &req.clinician_id)
    })
    .await?;
    reply(called)
}

async fn expire_no_shows(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ClinicianRequest>,
) -> Reply<Vec<wardlock_core::types::QueueEntry>> {
    let closed = blocking(&state, move |c| {
        c.queue()
            .expire_no_shows(&caller.actor, &caller.tenant_id, &req.clinician_id)
    })
    .await?;
    reply(closed)
}

async fn finalize(
    State(state): State<AppState>,
    caller: Caller,
    Path(appointment_id): Path<String>,
    body: Option<Json<FinalizeRequest>>,
) -> Reply<wardlock_core::types::FinalizeOutcome> {
    let Json(req) = body.unwrap_or_default();
    let outcome = blocking(&state, move |c| {
        c.queue().finalize_and_advance(
            &caller.actor,
            &caller.tenant_id,
            &appointment_id,
            req.notes.as_deref(),
        )
    })
    .await?;
    reply(outcome)
}

async fn queue_audit(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ClinicianQuery>,
) -> Reply<Vec<wardlock_core::types::QueueAuditEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    let trail = blocking(&state, move |c| {
        c.queue()
            .list_audit(&caller.tenant_id, query.clinician_id.as_deref(), limit)
    })
    .await?;
    reply(trail)
}

async fn queue_stats(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ClinicianQuery>,
) -> Reply<wardlock_core::types::QueueStatistics> {
    let stats = blocking(&state, move |c| {
        c.queue()
            .statistics(&caller.tenant_id, query.clinician_id.as_deref())
    })
    .await?;
    reply(stats)
}

// ─── Push Channel ───────────────────────────────────────────────────────────

async fn queue_ws(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ClinicianQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let subscription = state.client.notifier().connect(
        &caller.tenant_id,
        query.clinician_id.as_deref(),
        state.client.clock().now_ms(),
    );
    tracing::info!(
        subscriber = %subscription.id,
        tenant = %caller.tenant_id,
        clinician = ?query.clinician_id,
        "Queue subscriber connected"
    );
    ws.on_upgrade(move |socket| push_events(socket, state, subscription))
}

async fn push_events(mut socket: WebSocket, state: AppState, mut subscription: Subscription) {
    let notifier = state.client.notifier().clone();
    let mut ping = tokio::time::interval(WS_PING_INTERVAL);

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                // Channel closed: the registry dropped us as idle
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode queue event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {
                    notifier.touch(&subscription.id, state.client.clock().now_ms());
                }
            },
            _ = ping.tick() => {
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    notifier.disconnect(&subscription.id);
    tracing::info!(subscriber = %subscription.id, "Queue subscriber disconnected");
}

// ─── Client Factory ─────────────────────────────────────────────────────────

fn create_client(storage: &str, config: CoreConfig) -> Result<WardClient, String> {
    if storage == "memory" {
        tracing::info!("Using in-memory storage");
        return Ok(WardClient::with_config(config));
    }

    if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!(path, "Using SQLite storage");
            return WardClient::with_sqlite(path, config)
                .map_err(|e| format!("failed to open SQLite store at {}: {}", path, e));
        }
        #[cfg(not(feature = "sqlite"))]
        {
            let _ = (path, config);
            return Err("SQLite support not compiled in (enable the sqlite feature)".to_string());
        }
    }

    Err(format!(
        "unknown storage '{}'. Use 'memory' or 'sqlite:<path>'",
        storage
    ))
}
