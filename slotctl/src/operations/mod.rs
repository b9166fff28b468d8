//! The three operations and the dispatcher that picks one.
//!
//! Each operation is a short, sequential run of reservation service calls scoped to one
//! project/location pair. Nothing is retried and nothing is kept between invocations: two
//! concurrent purchases for the same project will both go through.

use std::{fmt, str::FromStr, sync::Arc};
use tracing::{info, instrument};

use crate::config::PurchaseConfig;
use crate::reservations::{LocationPath, ReservationService, Result};

mod cleanup;
mod purchase;
mod report;
pub mod request;

pub use cleanup::{CleanupOutcome, cleanup};
pub use purchase::{PurchaseOutcome, purchase, reservation_id};
pub use report::{ReportOutcome, report};
pub use request::{InvalidRequest, parse_request};

/// Operation names accepted in the `operation` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Report,
    Cleanup,
    Purchase,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Report, Operation::Cleanup, Operation::Purchase];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Report => "report",
            Operation::Cleanup => "cleanup",
            Operation::Purchase => "purchase",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Operation::ALL.into_iter().find(|op| op.as_str() == s).ok_or(())
    }
}

/// A validated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Report { target: LocationPath },
    Cleanup { target: LocationPath },
    Purchase { target: LocationPath, slots: i64 },
}

impl OperationRequest {
    pub fn operation(&self) -> Operation {
        match self {
            OperationRequest::Report { .. } => Operation::Report,
            OperationRequest::Cleanup { .. } => Operation::Cleanup,
            OperationRequest::Purchase { .. } => Operation::Purchase,
        }
    }

    pub fn target(&self) -> &LocationPath {
        match self {
            OperationRequest::Report { target }
            | OperationRequest::Cleanup { target }
            | OperationRequest::Purchase { target, .. } => target,
        }
    }

    /// Human readable summary used in responses and logs once the operation has succeeded
    pub fn success_message(&self) -> String {
        match self {
            OperationRequest::Report { target } => format!(
                "Successfully ran report in {} for project {}",
                target.location, target.project_id
            ),
            OperationRequest::Cleanup { target } => format!(
                "Successfully ran cleanup in project {} located in {}",
                target.project_id, target.location
            ),
            OperationRequest::Purchase { target, slots } => format!(
                "Successfully purchased commitment for {slots} slots in project {} located in {}",
                target.project_id, target.location
            ),
        }
    }
}

/// What a successful operation produced
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Report(ReportOutcome),
    Cleanup(CleanupOutcome),
    Purchase(PurchaseOutcome),
}

/// Runs validated requests against a reservation service
#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<dyn ReservationService>,
    purchase: PurchaseConfig,
}

impl Dispatcher {
    pub fn new(service: Arc<dyn ReservationService>, purchase: PurchaseConfig) -> Self {
        Self { service, purchase }
    }

    #[instrument(skip_all, fields(operation = %request.operation(), parent = %request.target()))]
    pub async fn dispatch(&self, request: &OperationRequest) -> Result<OperationOutcome> {
        let service = self.service.as_ref();
        let outcome = match request {
            OperationRequest::Report { target } => OperationOutcome::Report(report(service, target).await?),
            OperationRequest::Cleanup { target } => OperationOutcome::Cleanup(cleanup(service, target).await?),
            OperationRequest::Purchase { target, slots } => {
                OperationOutcome::Purchase(purchase(service, target, *slots, &self.purchase).await?)
            }
        };

        info!("{}", request.success_message());
        Ok(outcome)
    }
}
