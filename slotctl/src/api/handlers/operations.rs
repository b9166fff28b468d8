use axum::{Json, body::Bytes, extract::State};

use crate::AppState;
use crate::api::models::operations::{ErrorResponse, OperationRequestBody, OperationResponse};
use crate::errors::Error;
use crate::operations::parse_request;

/// Run a report, cleanup or purchase against one project and location.
///
/// The body is read raw so that a missing or wrong content type is reported the same way as a
/// body that is not JSON at all.
#[utoipa::path(
    post,
    path = "/operations",
    tag = "operations",
    summary = "Run an operation",
    description = "Also served at `/`.",
    request_body = OperationRequestBody,
    responses(
        (status = 200, description = "Operation completed", body = OperationResponse),
        (status = 400, description = "Invalid request, no remote call was made", body = ErrorResponse),
        (status = 500, description = "Reservation API unreachable or credentials unavailable", body = ErrorResponse),
        (status = 502, description = "Reservation API rejected a call", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn run_operation(State(state): State<AppState>, body: Bytes) -> Result<Json<OperationResponse>, Error> {
    let request = parse_request(&body, &state.config.default_location)?;
    let outcome = state.dispatcher.dispatch(&request).await?;
    Ok(Json(OperationResponse::new(&request, outcome)))
}
