use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::operations::{OperationOutcome, OperationRequest};

/// Request body of the operation endpoint. Decoding and validation live with the operations.
pub use crate::operations::request::OperationRequestBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportResponse {
    pub message: String,
    /// `Reservation <name>` lines each followed by their `Assignment <name>` lines, then
    /// `Commitment <name>` lines
    pub log: Vec<String>,
    pub commitments: Vec<String>,
    pub reservations: Vec<String>,
    pub assignments: Vec<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    pub message: String,
    /// One `Deleted <kind> <name>` line per deleted resource, in deletion order
    pub log: Vec<String>,
    pub severity: Severity,
}

/// Resource names of what the purchase created
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PurchaseResponse {
    pub message: String,
    /// e.g. `projects/foobar/locations/EU/capacityCommitments/123`
    pub commitment: String,
    /// e.g. `projects/foobar/locations/EU/reservations/reservation-20240305-070809-1a2b3c4d`
    pub reservation: String,
    /// e.g. `projects/foobar/locations/EU/reservations/.../assignments/456`
    pub assignment: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum OperationResponse {
    Report(ReportResponse),
    Cleanup(CleanupResponse),
    Purchase(PurchaseResponse),
}

impl OperationResponse {
    pub fn new(request: &OperationRequest, outcome: OperationOutcome) -> Self {
        let message = request.success_message();
        match outcome {
            OperationOutcome::Report(report) => OperationResponse::Report(ReportResponse {
                message,
                log: report.log,
                commitments: report.commitments,
                reservations: report.reservations,
                assignments: report.assignments,
                severity: Severity::Info,
            }),
            OperationOutcome::Cleanup(cleanup) => OperationResponse::Cleanup(CleanupResponse {
                message,
                log: cleanup.log,
                severity: Severity::Info,
            }),
            OperationOutcome::Purchase(purchase) => OperationResponse::Purchase(PurchaseResponse {
                message,
                commitment: purchase.commitment.name,
                reservation: purchase.reservation.name,
                assignment: purchase.assignment.name,
                severity: Severity::Info,
            }),
        }
    }
}
