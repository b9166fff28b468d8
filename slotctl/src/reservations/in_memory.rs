//! In-memory reservation service
//!
//! Stands in for the BigQuery Reservation API without any network access. Resources live in
//! process memory, names are generated the way the API generates them, and the API's deletion
//! constraint is enforced (a reservation cannot be deleted while it still has assignments).
//!
//! Every call is recorded in order, and individual primitives can be made to fail, which is what
//! the operation tests rely on. It is also selectable from configuration for dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;

use super::{
    Assignment, CapacityCommitment, LocationPath, Reservation, ReservationError, ReservationService, Result,
};

/// The nine remote primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    ListCapacityCommitments,
    ListReservations,
    ListAssignments,
    CreateCapacityCommitment,
    CreateReservation,
    CreateAssignment,
    DeleteCapacityCommitment,
    DeleteReservation,
    DeleteAssignment,
}

/// A recorded call, with the arguments that identify what it touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    ListCapacityCommitments { parent: String },
    ListReservations { parent: String },
    ListAssignments { reservation: String },
    CreateCapacityCommitment { parent: String, slot_count: i64 },
    CreateReservation { parent: String, reservation_id: String, slot_capacity: i64 },
    CreateAssignment { reservation: String, assignee: String },
    DeleteCapacityCommitment { name: String },
    DeleteReservation { name: String },
    DeleteAssignment { name: String },
}

impl ServiceCall {
    pub fn primitive(&self) -> Primitive {
        match self {
            ServiceCall::ListCapacityCommitments { .. } => Primitive::ListCapacityCommitments,
            ServiceCall::ListReservations { .. } => Primitive::ListReservations,
            ServiceCall::ListAssignments { .. } => Primitive::ListAssignments,
            ServiceCall::CreateCapacityCommitment { .. } => Primitive::CreateCapacityCommitment,
            ServiceCall::CreateReservation { .. } => Primitive::CreateReservation,
            ServiceCall::CreateAssignment { .. } => Primitive::CreateAssignment,
            ServiceCall::DeleteCapacityCommitment { .. } => Primitive::DeleteCapacityCommitment,
            ServiceCall::DeleteReservation { .. } => Primitive::DeleteReservation,
            ServiceCall::DeleteAssignment { .. } => Primitive::DeleteAssignment,
        }
    }

    /// Whether the call changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ServiceCall::ListCapacityCommitments { .. }
                | ServiceCall::ListReservations { .. }
                | ServiceCall::ListAssignments { .. }
        )
    }
}

#[derive(Default)]
struct State {
    commitments: Vec<CapacityCommitment>,
    reservations: Vec<Reservation>,
    assignments: Vec<Assignment>,
    calls: Vec<ServiceCall>,
    failing: HashSet<Primitive>,
    next_id: u64,
}

impl State {
    /// Record the call, then fail it if it was configured to fail
    fn record(&mut self, call: ServiceCall) -> Result<()> {
        let primitive = call.primitive();
        self.calls.push(call);
        if self.failing.contains(&primitive) {
            return Err(ReservationError::Api {
                status: 500,
                code: "INTERNAL".to_string(),
                message: format!("Injected failure for {primitive:?}"),
            });
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn is_child_of(name: &str, parent: &str) -> bool {
    name.strip_prefix(parent).is_some_and(|rest| rest.starts_with('/'))
}

/// In-memory implementation of [`ReservationService`]
#[derive(Default)]
pub struct InMemoryReservationService {
    state: Mutex<State>,
}

impl InMemoryReservationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make every subsequent call of `primitive` fail with an API error
    pub async fn fail_on(&self, primitive: Primitive) {
        self.state.lock().await.failing.insert(primitive);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    pub async fn commitments(&self) -> Vec<CapacityCommitment> {
        self.state.lock().await.commitments.clone()
    }

    pub async fn reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.clone()
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        self.state.lock().await.assignments.clone()
    }
}

#[async_trait]
impl ReservationService for InMemoryReservationService {
    async fn list_capacity_commitments(&self, parent: &LocationPath) -> Result<Vec<CapacityCommitment>> {
        let parent = parent.to_string();
        let mut state = self.state.lock().await;
        state.record(ServiceCall::ListCapacityCommitments { parent: parent.clone() })?;
        Ok(state
            .commitments
            .iter()
            .filter(|c| is_child_of(&c.name, &parent))
            .cloned()
            .collect())
    }

    async fn list_reservations(&self, parent: &LocationPath) -> Result<Vec<Reservation>> {
        let parent = parent.to_string();
        let mut state = self.state.lock().await;
        state.record(ServiceCall::ListReservations { parent: parent.clone() })?;
        Ok(state
            .reservations
            .iter()
            .filter(|r| is_child_of(&r.name, &parent))
            .cloned()
            .collect())
    }

    async fn list_assignments(&self, reservation: &str) -> Result<Vec<Assignment>> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::ListAssignments {
            reservation: reservation.to_string(),
        })?;
        Ok(state
            .assignments
            .iter()
            .filter(|a| is_child_of(&a.name, reservation))
            .cloned()
            .collect())
    }

    async fn create_capacity_commitment(
        &self,
        parent: &LocationPath,
        commitment: &CapacityCommitment,
    ) -> Result<CapacityCommitment> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::CreateCapacityCommitment {
            parent: parent.to_string(),
            slot_count: commitment.slot_count,
        })?;

        let id = state.next_id();
        let now = Utc::now();
        let created = CapacityCommitment {
            name: format!("{parent}/capacityCommitments/{id}"),
            state: Some("ACTIVE".to_string()),
            commitment_start_time: Some(now),
            commitment_end_time: Some(now),
            ..commitment.clone()
        };
        state.commitments.push(created.clone());
        Ok(created)
    }

    async fn create_reservation(
        &self,
        parent: &LocationPath,
        reservation_id: &str,
        reservation: &Reservation,
    ) -> Result<Reservation> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::CreateReservation {
            parent: parent.to_string(),
            reservation_id: reservation_id.to_string(),
            slot_capacity: reservation.slot_capacity,
        })?;

        let name = format!("{parent}/reservations/{reservation_id}");
        if state.reservations.iter().any(|r| r.name == name) {
            return Err(ReservationError::Api {
                status: 409,
                code: "ALREADY_EXISTS".to_string(),
                message: format!("Already Exists: Reservation {name}"),
            });
        }

        let now = Utc::now();
        let created = Reservation {
            name,
            creation_time: Some(now),
            update_time: Some(now),
            ..reservation.clone()
        };
        state.reservations.push(created.clone());
        Ok(created)
    }

    async fn create_assignment(&self, reservation: &str, assignment: &Assignment) -> Result<Assignment> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::CreateAssignment {
            reservation: reservation.to_string(),
            assignee: assignment.assignee.clone(),
        })?;

        if !state.reservations.iter().any(|r| r.name == reservation) {
            return Err(ReservationError::not_found(reservation));
        }

        let id = state.next_id();
        let created = Assignment {
            name: format!("{reservation}/assignments/{id}"),
            state: Some("ACTIVE".to_string()),
            ..assignment.clone()
        };
        state.assignments.push(created.clone());
        Ok(created)
    }

    async fn delete_capacity_commitment(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::DeleteCapacityCommitment { name: name.to_string() })?;

        let before = state.commitments.len();
        state.commitments.retain(|c| c.name != name);
        if state.commitments.len() == before {
            return Err(ReservationError::not_found(name));
        }
        Ok(())
    }

    async fn delete_reservation(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::DeleteReservation { name: name.to_string() })?;

        if state.assignments.iter().any(|a| is_child_of(&a.name, name)) {
            return Err(ReservationError::Api {
                status: 400,
                code: "FAILED_PRECONDITION".to_string(),
                message: format!("Reservation {name} has assignments, delete them first"),
            });
        }

        let before = state.reservations.len();
        state.reservations.retain(|r| r.name != name);
        if state.reservations.len() == before {
            return Err(ReservationError::not_found(name));
        }
        Ok(())
    }

    async fn delete_assignment(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(ServiceCall::DeleteAssignment { name: name.to_string() })?;

        let before = state.assignments.len();
        state.assignments.retain(|a| a.name != name);
        if state.assignments.len() == before {
            return Err(ReservationError::not_found(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> LocationPath {
        LocationPath::new("foobar", "EU")
    }

    async fn reservation_with_assignment(service: &InMemoryReservationService) -> (Reservation, Assignment) {
        let reservation = service
            .create_reservation(
                &parent(),
                "r1",
                &Reservation {
                    slot_capacity: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let assignment = service
            .create_assignment(
                &reservation.name,
                &Assignment {
                    assignee: "projects/foobar".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (reservation, assignment)
    }

    #[tokio::test]
    async fn test_created_names_follow_api_layout() {
        let service = InMemoryReservationService::new();
        let commitment = service
            .create_capacity_commitment(
                &parent(),
                &CapacityCommitment {
                    slot_count: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (reservation, assignment) = reservation_with_assignment(&service).await;

        assert_eq!(commitment.name, "projects/foobar/locations/EU/capacityCommitments/1");
        assert_eq!(commitment.slot_count, 100);
        assert_eq!(reservation.name, "projects/foobar/locations/EU/reservations/r1");
        assert_eq!(assignment.name, "projects/foobar/locations/EU/reservations/r1/assignments/2");
    }

    #[tokio::test]
    async fn test_lists_are_scoped_to_parent() {
        let service = InMemoryReservationService::new();
        reservation_with_assignment(&service).await;

        let other = LocationPath::new("foobar", "US");
        assert!(service.list_reservations(&other).await.unwrap().is_empty());
        assert_eq!(service.list_reservations(&parent()).await.unwrap().len(), 1);

        // `r1` must not match `r10`
        assert!(
            service
                .list_assignments("projects/foobar/locations/EU/reservations/r")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_reservation_with_assignments_cannot_be_deleted() {
        let service = InMemoryReservationService::new();
        let (reservation, assignment) = reservation_with_assignment(&service).await;

        let err = service.delete_reservation(&reservation.name).await.unwrap_err();
        assert!(matches!(err, ReservationError::Api { status: 400, .. }));

        service.delete_assignment(&assignment.name).await.unwrap();
        service.delete_reservation(&reservation.name).await.unwrap();
        assert!(service.reservations().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_reservation_id() {
        let service = InMemoryReservationService::new();
        reservation_with_assignment(&service).await;

        let err = service
            .create_reservation(&parent(), "r1", &Reservation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_deleting_unknown_resource_is_not_found() {
        let service = InMemoryReservationService::new();
        let err = service
            .delete_capacity_commitment("projects/foobar/locations/EU/capacityCommitments/9")
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_are_recorded() {
        let service = InMemoryReservationService::new();
        service.fail_on(Primitive::ListReservations).await;

        assert!(service.list_reservations(&parent()).await.is_err());
        assert!(service.list_capacity_commitments(&parent()).await.is_ok());

        let calls = service.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].primitive(), Primitive::ListReservations);
        assert!(calls.iter().all(|call| !call.is_mutation()));
    }
}
