use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bruteguard_core::{AuthRequest, GuardError, ListKind, ResetRequest, Subnet, Verdict};
use serde::{Deserialize, Serialize};

use crate::AppState;

// Response types
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// A failed operation rendered as an error envelope
pub struct ApiError(pub GuardError);

impl From<GuardError> for ApiError {
    fn from(e: GuardError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            GuardError::InvalidCidr { .. } => StatusCode::BAD_REQUEST,
            GuardError::SubnetNotFound { .. } => StatusCode::NOT_FOUND,
            GuardError::BucketExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            GuardError::Uninitialized => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// Request types
#[derive(Deserialize)]
pub struct SubnetRequest {
    pub cidr: String,
}

impl SubnetRequest {
    fn cidr(&self) -> Result<&str, GuardError> {
        let cidr = self.cidr.trim();
        if cidr.is_empty() {
            return Err(GuardError::InvalidRequest("cidr must not be empty".to_string()));
        }
        Ok(cidr)
    }
}

#[derive(Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub cache_loaded: bool,
    pub blacklist_ranges: usize,
    pub whitelist_ranges: usize,
    pub cache_age_secs: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct ResetResult {
    pub reset: bool,
}

pub async fn service_info() -> Json<ApiResponse<ServiceInfo>> {
    Json(ApiResponse::ok(ServiceInfo {
        name: "bruteguard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let stats = state.controller.cache_stats().await;
    Json(ApiResponse::ok(HealthStatus {
        status: "ok".to_string(),
        cache_loaded: stats.is_some(),
        blacklist_ranges: stats.map_or(0, |s| s.blacklist_ranges),
        whitelist_ranges: stats.map_or(0, |s| s.whitelist_ranges),
        cache_age_secs: stats.map(|s| s.age.as_secs()),
    }))
}

// Auth check handler
pub async fn check_auth(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> ApiResult<Verdict> {
    let verdict = state.controller.check_auth(&req).await?;
    Ok(Json(ApiResponse::ok(verdict)))
}

pub async fn reset_buckets(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> ApiResult<ResetResult> {
    state.controller.reset_buckets(&req).await?;
    Ok(Json(ApiResponse::ok(ResetResult { reset: true })))
}

// Subnet handlers. The list is bound per route through an `Extension`.
pub async fn list_subnets(
    State(state): State<AppState>,
    Extension(list_kind): Extension<ListKind>,
) -> ApiResult<Vec<Subnet>> {
    let subnets = state.controller.list_subnets(list_kind).await?;
    Ok(Json(ApiResponse::ok(subnets)))
}

pub async fn add_subnet(
    State(state): State<AppState>,
    Extension(list_kind): Extension<ListKind>,
    Json(req): Json<SubnetRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Subnet>>), ApiError> {
    let subnet = Subnet::new(list_kind, req.cidr()?);
    state.controller.create_subnet(&subnet).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(subnet))))
}

pub async fn remove_subnet(
    State(state): State<AppState>,
    Extension(list_kind): Extension<ListKind>,
    Json(req): Json<SubnetRequest>,
) -> ApiResult<Subnet> {
    let cidr = req.cidr()?;
    state.controller.delete_subnet(list_kind, cidr).await?;
    Ok(Json(ApiResponse::ok(Subnet::new(list_kind, cidr))))
}
