use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use wardlock_core::types::{
    Actor, ActorRole, CollisionRecord, LeaseType, Priority, ResourceType,
};
use wardlock_core::CoreError;

// ─── Validation Helpers ─────────────────────────────────────────────────────

fn one_of<T: Copy>(
    field: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
    all: &[T],
    name: impl Fn(T) -> &'static str,
) -> Result<T, ApiError> {
    parse(value).ok_or_else(|| {
        let valid: Vec<&str> = all.iter().map(|v| name(*v)).collect();
        ApiError::bad_request(format!(
            "Invalid {} '{}'. Must be one of: {}",
            field,
            value,
            valid.join(", ")
        ))
    })
}

pub fn parse_resource_type(value: &str) -> Result<ResourceType, ApiError> {
    one_of(
        "resource_type",
        value,
        ResourceType::parse,
        &ResourceType::ALL,
        ResourceType::as_str,
    )
}

pub fn parse_lease_type(value: &str) -> Result<LeaseType, ApiError> {
    one_of("lease_type", value, LeaseType::parse, &LeaseType::ALL, LeaseType::as_str)
}

pub fn parse_priority(value: Option<&str>) -> Result<Priority, ApiError> {
    match value {
        None => Ok(Priority::Normal),
        Some(value) => one_of(
            "priority",
            value,
            Priority::parse,
            &[Priority::Emergency, Priority::Urgent, Priority::Vip, Priority::Normal],
            Priority::as_str,
        ),
    }
}

fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::bad_request(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

// ─── Caller Identity ────────────────────────────────────────────────────────

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ROLE_HEADER: &str = "x-actor-role";

/// Tenant and actor taken from the request headers.
pub struct Caller {
    pub tenant_id: String,
    pub actor: Actor,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ApiError::bad_request(format!("{} header is required", name)))
        };

        let tenant_id = header(TENANT_HEADER)?;
        let actor_id = header(ACTOR_HEADER)?;
        let role = header(ROLE_HEADER)?;
        let role = ActorRole::parse(&role).ok_or_else(|| {
            ApiError::bad_request(format!(
                "Invalid {} '{}'. Must be one of: admin, physician, reception, system",
                ROLE_HEADER, role
            ))
        })?;

        Ok(Self {
            tenant_id,
            actor: Actor::new(actor_id, role),
        })
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: message.into(),
            detail: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            message: "missing or invalid API key".to_string(),
            detail: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: message.into(),
            detail: None,
        }
    }

    /// A lost race or an occupied slot, with the details of who holds it.
    pub fn conflict(message: impl Into<String>, detail: impl Serialize) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "CONFLICT",
            message: message.into(),
            detail: serde_json::to_value(detail).ok(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::InvalidState { .. } => StatusCode::CONFLICT,
            CoreError::Expired { .. } => StatusCode::GONE,
            CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
            CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "Request failed");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "code": self.code,
            "error": self.message,
            "detail": self.detail,
        }));
        (self.status, body).into_response()
    }
}

// ─── Request Types: Leases ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AcquireLeaseRequest {
    pub resource_type: String,
    pub resource_id: String,
    pub lease_type: String,
    pub ttl_minutes: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AcquireLeaseRequest {
    pub fn validate(&self) -> ApiResult<(ResourceType, LeaseType)> {
        required("resource_id", &self.resource_id)?;
        let resource_type = parse_resource_type(&self.resource_type)?;
        let lease_type = parse_lease_type(&self.lease_type)?;
        Ok((resource_type, lease_type))
    }
}

#[derive(Deserialize, Default)]
pub struct HeartbeatRequest {
    pub extend_by_minutes: Option<u64>,
}

#[derive(Deserialize, Default)]
pub struct ReleaseRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ForceReleaseRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct LeaseListQuery {
    pub resource_type: Option<String>,
}

#[derive(Deserialize)]
pub struct LeaseStatusQuery {
    pub resource_type: String,
    pub resource_id: String,
}

impl LeaseStatusQuery {
    pub fn validate(&self) -> ApiResult<ResourceType> {
        required("resource_id", &self.resource_id)?;
        parse_resource_type(&self.resource_type)
    }
}

#[derive(Deserialize)]
pub struct LeaseAuditQuery {
    pub lease_id: Option<String>,
    pub limit: Option<usize>,
}

// ─── Request Types: Collisions ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DuplicateSubmissionRequest {
    pub invoice_id: String,
    pub procedure_code: String,
}

#[derive(Deserialize)]
pub struct DiagnosisCheckRequest {
    pub patient_id: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ExamCheckRequest {
    pub patient_id: String,
    pub exam_code: String,
}

#[derive(Deserialize)]
pub struct MedicationCheckRequest {
    pub patient_id: String,
    pub medication: String,
}

#[derive(Deserialize)]
pub struct CollisionListQuery {
    #[serde(default)]
    pub pending_only: bool,
}

#[derive(Deserialize)]
pub struct ResolveCollisionRequest {
    pub notes: String,
}

// ─── Request Types: Queue ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EnqueueBody {
    pub appointment_id: String,
    pub patient_id: String,
    pub clinician_id: String,
    pub priority: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DequeueRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ClinicianRequest {
    pub clinician_id: String,
}

#[derive(Deserialize, Default)]
pub struct FinalizeRequest {
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ClinicianQuery {
    pub clinician_id: Option<String>,
    pub limit: Option<usize>,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub conflict: bool,
    pub blocking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collision: Option<CollisionRecord>,
}

impl From<Option<CollisionRecord>> for CheckResponse {
    fn from(collision: Option<CollisionRecord>) -> Self {
        Self {
            conflict: collision.is_some(),
            blocking: collision.as_ref().is_some_and(|c| c.blocking),
            collision,
        }
    }
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub expired: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
    pub version: String,
}
