//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::api;
use crate::api::models::operations::{
    CleanupResponse, ErrorResponse, OperationRequestBody, OperationResponse, PurchaseResponse, ReportResponse,
    Severity,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "slotctl",
        description = "Purchase, report on and clean up BigQuery slot capacity"
    ),
    paths(api::handlers::operations::run_operation),
    components(schemas(
        OperationRequestBody,
        OperationResponse,
        ReportResponse,
        CleanupResponse,
        PurchaseResponse,
        ErrorResponse,
        Severity,
    )),
    tags((name = "operations", description = "Slot capacity operations"))
)]
pub struct ApiDoc;
