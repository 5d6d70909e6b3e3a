use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::debug;

use super::service::{PermitWorkflowService, WorkflowError};
use super::store::PermitStore;
use super::validation::ValidationErrors;

type ServiceState<S> = State<Arc<PermitWorkflowService<S>>>;
type JsonResult = Result<Json<Value>, WorkflowError>;

/// Router builder exposing the permit, permit request and citizen request endpoints.
pub fn permit_router<S>(service: Arc<PermitWorkflowService<S>>) -> Router
where
    S: PermitStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/permits",
            post(create_permit_handler::<S>).get(all_permits_handler::<S>),
        )
        .route(
            "/api/v1/permits/:permit_id",
            get(permit_handler::<S>)
                .put(update_permit_handler::<S>)
                .delete(delete_permit_handler::<S>),
        )
        .route(
            "/api/v1/permit-requests",
            post(create_permit_request_handler::<S>),
        )
        .route(
            "/api/v1/permit-requests/open",
            get(open_permit_requests_handler::<S>),
        )
        .route(
            "/api/v1/permit-requests/:request_id",
            get(permit_request_handler::<S>),
        )
        .route(
            "/api/v1/permit-requests/:request_id/approve",
            post(approve_handler::<S>),
        )
        .route(
            "/api/v1/permit-requests/:request_id/reject",
            post(reject_handler::<S>),
        )
        .route(
            "/api/v1/citizens/:citizen_id/permit-requests",
            get(citizen_permit_requests_handler::<S>),
        )
        .route("/api/v1/requests", post(create_citizen_request_handler::<S>))
        .route(
            "/api/v1/requests/:request_id",
            get(citizen_request_handler::<S>),
        )
        .with_state(service)
}

impl WorkflowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::Validation(_)
            | WorkflowError::Declined(_)
            | WorkflowError::TransitionRejected(_) => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::Persistence { .. } | WorkflowError::Event { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "errors": self.messages() }));
        (self.status_code(), body).into_response()
    }
}

/// Bodies are read raw so that missing or malformed JSON reaches callers in the same
/// `{ "errors": [...] }` shape as schema violations. An empty body becomes `empty`.
fn json_body(body: &Bytes, empty: Value) -> Result<Value, WorkflowError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(empty);
    }
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "rejected unparseable request body");
        WorkflowError::Validation(ValidationErrors::single(format!(
            "instance is not valid JSON: {err}"
        )))
    })
}

pub(crate) async fn create_permit_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    body: Bytes,
) -> JsonResult {
    let body = json_body(&body, Value::Null)?;
    let permit = service.create_permit(&body).await?;
    Ok(Json(json!({ "permit": permit })))
}

pub(crate) async fn permit_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(permit_id): Path<String>,
) -> JsonResult {
    let permit = service.permit_by_id(&permit_id).await?;
    Ok(Json(json!({ "permit": permit })))
}

pub(crate) async fn update_permit_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(permit_id): Path<String>,
    body: Bytes,
) -> JsonResult {
    let body = json_body(&body, Value::Null)?;
    let permit = service.update_permit(&permit_id, &body).await?;
    Ok(Json(json!({ "permit": permit })))
}

pub(crate) async fn delete_permit_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(permit_id): Path<String>,
) -> JsonResult {
    let deleted = service.delete_permit(&permit_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub(crate) async fn all_permits_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
) -> JsonResult {
    let permits = service.all_permits().await?;
    Ok(Json(json!({ "permits": permits })))
}

pub(crate) async fn create_permit_request_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    body: Bytes,
) -> JsonResult {
    let body = json_body(&body, Value::Null)?;
    service.create_permit_request(&body).await?;
    Ok(Json(json!({ "success": true })))
}

pub(crate) async fn open_permit_requests_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
) -> JsonResult {
    let requests = service.open_permit_requests().await?;
    Ok(Json(json!({ "requests": requests })))
}

pub(crate) async fn permit_request_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(request_id): Path<String>,
) -> JsonResult {
    let request = service.permit_request_by_id(&request_id).await?;
    Ok(Json(json!({ "request": request })))
}

pub(crate) async fn citizen_permit_requests_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(citizen_id): Path<String>,
) -> JsonResult {
    let requests = service.citizen_permit_requests(&citizen_id).await?;
    Ok(Json(json!({ "requests": requests })))
}

pub(crate) async fn approve_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> JsonResult {
    let body = json_body(&body, json!({}))?;
    service.approve_permit_request(&request_id, &body).await?;
    Ok(Json(json!({ "success": true })))
}

pub(crate) async fn reject_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(request_id): Path<String>,
) -> JsonResult {
    service.reject_permit_request(&request_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub(crate) async fn create_citizen_request_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    body: Bytes,
) -> JsonResult {
    let body = json_body(&body, Value::Null)?;
    let request = service.create_citizen_request(&body).await?;
    Ok(Json(json!({ "request": request })))
}

pub(crate) async fn citizen_request_handler<S: PermitStore + 'static>(
    State(service): ServiceState<S>,
    Path(request_id): Path<String>,
) -> JsonResult {
    let request = service.citizen_request_by_id(&request_id).await?;
    Ok(Json(json!({ "request": request })))
}
