use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::PurchaseConfig;
use crate::reservations::{
    Assignment, CapacityCommitment, LocationPath, Reservation, ReservationError, ReservationService, Result,
};

/// The three resources a purchase creates
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOutcome {
    pub commitment: CapacityCommitment,
    pub reservation: Reservation,
    pub assignment: Assignment,
}

/// `{prefix}-{YYYYmmdd}-{HHMMSS}-{8 hex chars}`. Reservation ids must start with a lowercase
/// letter and only contain lowercase letters, digits and dashes; the prefix is validated at
/// config load.
pub fn reservation_id(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
}

/// Buy a commitment of `slots` slots, carve a reservation of the same size out of it, and assign
/// the reservation to the project itself.
///
/// Not transactional. Unless `config.rollback_on_failure` is set, a failure leaves the resources
/// created before it in place. With it set, those resources are deleted again (newest first)
/// before the original error is returned.
pub async fn purchase(
    service: &dyn ReservationService,
    parent: &LocationPath,
    slots: i64,
    config: &PurchaseConfig,
) -> Result<PurchaseOutcome> {
    info!(slots, plan = ?config.plan, "Purchasing commitment");
    let commitment = service
        .create_capacity_commitment(
            parent,
            &CapacityCommitment {
                slot_count: slots,
                plan: config.plan.clone(),
                ..Default::default()
            },
        )
        .await?;
    info!(commitment = %commitment.name, "Purchased commitment");

    let reservation_id = reservation_id(&config.reservation_prefix, Utc::now());
    info!(reservation_id = %reservation_id, slots = commitment.slot_count, "Creating reservation");
    let reservation = match service
        .create_reservation(
            parent,
            &reservation_id,
            &Reservation {
                slot_capacity: commitment.slot_count,
                ignore_idle_slots: config.ignore_idle_slots,
                ..Default::default()
            },
        )
        .await
    {
        Ok(reservation) => reservation,
        Err(e) => {
            if config.rollback_on_failure {
                roll_back(service, None, &commitment, &e).await;
            } else {
                warn!(commitment = %commitment.name, error = %e, "Reservation failed, commitment left in place");
            }
            return Err(e);
        }
    };

    let assignee = format!("projects/{}", parent.project_id);
    info!(reservation = %reservation.name, assignee = %assignee, "Creating assignment");
    let assignment = match service
        .create_assignment(
            &reservation.name,
            &Assignment {
                assignee,
                job_type: config.job_type.clone(),
                ..Default::default()
            },
        )
        .await
    {
        Ok(assignment) => assignment,
        Err(e) => {
            if config.rollback_on_failure {
                roll_back(service, Some(&reservation), &commitment, &e).await;
            } else {
                warn!(
                    commitment = %commitment.name,
                    reservation = %reservation.name,
                    error = %e,
                    "Assignment failed, commitment and reservation left in place"
                );
            }
            return Err(e);
        }
    };

    Ok(PurchaseOutcome {
        commitment,
        reservation,
        assignment,
    })
}

/// Best effort: a failed delete is logged and the next one is still attempted
async fn roll_back(
    service: &dyn ReservationService,
    reservation: Option<&Reservation>,
    commitment: &CapacityCommitment,
    cause: &ReservationError,
) {
    warn!(error = %cause, "Purchase failed, rolling back");

    if let Some(reservation) = reservation
        && let Err(e) = service.delete_reservation(&reservation.name).await
    {
        error!(reservation = %reservation.name, error = %e, "Failed to roll back reservation");
    }

    if let Err(e) = service.delete_capacity_commitment(&commitment.name).await {
        error!(commitment = %commitment.name, error = %e, "Failed to roll back commitment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservations::in_memory::{InMemoryReservationService, Primitive, ServiceCall};
    use crate::reservations::{CommitmentPlan, JobType};

    fn parent() -> LocationPath {
        LocationPath::new("foobar", "EU")
    }

    fn rollback_config() -> PurchaseConfig {
        PurchaseConfig {
            rollback_on_failure: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_reservation_id_format() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z").unwrap().with_timezone(&Utc);
        let id = reservation_id("reservation", now);

        assert!(id.starts_with("reservation-20240305-070809-"), "{id}");
        assert_eq!(id.len(), "reservation-20240305-070809-".len() + 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_ne!(id, reservation_id("reservation", now));
    }

    #[test_log::test(tokio::test)]
    async fn test_purchase_issues_three_creates_in_order() {
        let service = InMemoryReservationService::new();

        let outcome = purchase(&service, &parent(), 400, &PurchaseConfig::default()).await.unwrap();

        let calls = service.calls().await;
        assert_eq!(calls.len(), 3);

        let ServiceCall::CreateCapacityCommitment { parent: p, slot_count } = &calls[0] else {
            panic!("expected commitment first, got {:?}", calls[0]);
        };
        assert_eq!(p, "projects/foobar/locations/EU");
        assert_eq!(*slot_count, 400);

        let ServiceCall::CreateReservation {
            reservation_id,
            slot_capacity,
            ..
        } = &calls[1]
        else {
            panic!("expected reservation second, got {:?}", calls[1]);
        };
        assert_eq!(*slot_capacity, outcome.commitment.slot_count);
        assert!(outcome.reservation.name.ends_with(&format!("/reservations/{reservation_id}")));

        let ServiceCall::CreateAssignment { reservation, assignee } = &calls[2] else {
            panic!("expected assignment third, got {:?}", calls[2]);
        };
        assert_eq!(reservation, &outcome.reservation.name);
        assert_eq!(assignee, "projects/foobar");

        assert_eq!(outcome.commitment.plan, CommitmentPlan::Flex);
        assert_eq!(outcome.assignment.job_type, JobType::Query);
        assert!(outcome.assignment.name.starts_with(&outcome.reservation.name));
    }

    #[tokio::test]
    async fn test_purchase_uses_configured_shape() {
        let service = InMemoryReservationService::new();
        let config = PurchaseConfig {
            plan: CommitmentPlan::Monthly,
            job_type: JobType::Pipeline,
            ignore_idle_slots: true,
            reservation_prefix: "nightly".to_string(),
            rollback_on_failure: false,
        };

        let outcome = purchase(&service, &parent(), 100, &config).await.unwrap();

        assert_eq!(outcome.commitment.plan, CommitmentPlan::Monthly);
        assert!(outcome.reservation.ignore_idle_slots);
        assert!(outcome.reservation.name.contains("/reservations/nightly-"));
        assert_eq!(outcome.assignment.job_type, JobType::Pipeline);
    }

    #[tokio::test]
    async fn test_failed_reservation_leaves_commitment_by_default() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateReservation).await;

        assert!(purchase(&service, &parent(), 100, &PurchaseConfig::default()).await.is_err());

        assert_eq!(service.commitments().await.len(), 1);
        assert!(service.calls().await.iter().all(|c| !matches!(
            c,
            ServiceCall::DeleteCapacityCommitment { .. } | ServiceCall::CreateAssignment { .. }
        )));
    }

    #[tokio::test]
    async fn test_failed_assignment_leaves_everything_by_default() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateAssignment).await;

        assert!(purchase(&service, &parent(), 100, &PurchaseConfig::default()).await.is_err());

        assert_eq!(service.commitments().await.len(), 1);
        assert_eq!(service.reservations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_after_failed_reservation() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateReservation).await;

        let err = purchase(&service, &parent(), 100, &rollback_config()).await.unwrap_err();

        assert!(matches!(err, ReservationError::Api { status: 500, .. }));
        assert!(service.commitments().await.is_empty());
        assert!(matches!(
            service.calls().await.last(),
            Some(ServiceCall::DeleteCapacityCommitment { .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_after_failed_assignment() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateAssignment).await;

        assert!(purchase(&service, &parent(), 100, &rollback_config()).await.is_err());

        assert!(service.commitments().await.is_empty());
        assert!(service.reservations().await.is_empty());

        let primitives: Vec<_> = service
            .calls()
            .await
            .into_iter()
            .map(|c| c.primitive())
            .collect();
        assert_eq!(
            primitives,
            vec![
                Primitive::CreateCapacityCommitment,
                Primitive::CreateReservation,
                Primitive::CreateAssignment,
                Primitive::DeleteReservation,
                Primitive::DeleteCapacityCommitment,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_rollback_returns_original_error() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateAssignment).await;
        service.fail_on(Primitive::DeleteCapacityCommitment).await;

        let err = purchase(&service, &parent(), 100, &rollback_config()).await.unwrap_err();

        match err {
            ReservationError::Api { message, .. } => assert!(message.contains("CreateAssignment")),
            other => panic!("expected the assignment error, got {other:?}"),
        }
        // the reservation rollback still went through
        assert!(service.reservations().await.is_empty());
        assert_eq!(service.commitments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commitment_creates_nothing_else() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::CreateCapacityCommitment).await;

        assert!(purchase(&service, &parent(), 100, &rollback_config()).await.is_err());
        assert_eq!(service.calls().await.len(), 1);
    }
}
