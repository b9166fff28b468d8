use tracing::debug;

use crate::reservations::{LocationPath, ReservationService, Result};

/// Everything found under a location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub commitments: Vec<String>,
    pub reservations: Vec<String>,
    pub assignments: Vec<String>,
    /// One line per resource: each reservation followed by its assignments, then the commitments
    pub log: Vec<String>,
}

/// List commitments, reservations and their assignments. Read-only.
pub async fn report(service: &dyn ReservationService, parent: &LocationPath) -> Result<ReportOutcome> {
    let mut outcome = ReportOutcome::default();

    for reservation in service.list_reservations(parent).await? {
        outcome.log.push(format!("Reservation {}", reservation.name));
        for assignment in service.list_assignments(&reservation.name).await? {
            outcome.log.push(format!("Assignment {}", assignment.name));
            outcome.assignments.push(assignment.name);
        }
        outcome.reservations.push(reservation.name);
    }

    for commitment in service.list_capacity_commitments(parent).await? {
        outcome.log.push(format!("Commitment {}", commitment.name));
        outcome.commitments.push(commitment.name);
    }

    debug!(
        commitments = outcome.commitments.len(),
        reservations = outcome.reservations.len(),
        assignments = outcome.assignments.len(),
        "Report complete"
    );

    Ok(outcome)
}
