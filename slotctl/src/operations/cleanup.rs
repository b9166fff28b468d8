use tracing::{info, warn};

use crate::reservations::{LocationPath, ReservationService, Result};

/// What a cleanup deleted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// `Deleted <kind> <name>`, in deletion order
    pub log: Vec<String>,
}

/// Delete every assignment, then every reservation, then every commitment under `parent`.
///
/// The order matches the API's constraints: a reservation cannot go while it has assignments.
/// The sweep stops at the first failure and nothing is restored; whatever is left is picked up
/// by the next cleanup.
pub async fn cleanup(service: &dyn ReservationService, parent: &LocationPath) -> Result<CleanupOutcome> {
    let mut outcome = CleanupOutcome::default();

    let reservations = service.list_reservations(parent).await?;

    let mut assignments = Vec::new();
    for reservation in &reservations {
        assignments.extend(service.list_assignments(&reservation.name).await?);
    }

    for assignment in &assignments {
        info!(assignment = %assignment.name, "Deleting assignment");
        service.delete_assignment(&assignment.name).await.inspect_err(|e| {
            warn!(assignment = %assignment.name, error = %e, deleted = outcome.log.len(), "Cleanup stopped");
        })?;
        outcome.log.push(format!("Deleted assignment {}", assignment.name));
    }

    for reservation in &reservations {
        info!(reservation = %reservation.name, "Deleting reservation");
        service.delete_reservation(&reservation.name).await.inspect_err(|e| {
            warn!(reservation = %reservation.name, error = %e, deleted = outcome.log.len(), "Cleanup stopped");
        })?;
        outcome.log.push(format!("Deleted reservation {}", reservation.name));
    }

    for commitment in service.list_capacity_commitments(parent).await? {
        info!(commitment = %commitment.name, "Deleting commitment");
        service.delete_capacity_commitment(&commitment.name).await.inspect_err(|e| {
            warn!(commitment = %commitment.name, error = %e, deleted = outcome.log.len(), "Cleanup stopped");
        })?;
        outcome.log.push(format!("Deleted commitment {}", commitment.name));
    }

    Ok(outcome)
}
