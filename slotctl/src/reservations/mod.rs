//! Reservation service abstraction layer
//!
//! This module defines the `ReservationService` trait, which abstracts the list/create/delete
//! primitives of the BigQuery Reservation API for capacity commitments, reservations and
//! assignments. The operations in [`crate::operations`] are written against the trait only.
//!
//! Resource types mirror the v1 REST representation. 64-bit integers are encoded as JSON strings
//! by the API, so counts accept both strings and numbers when decoding and are sent as strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use std::{fmt, sync::Arc};

use crate::config::ReservationServiceConfig;

pub mod bigquery;
pub mod credentials;
pub mod in_memory;

/// Create a reservation service from configuration
///
/// Adding a new backend requires adding a match arm here.
pub fn create_service(config: &ReservationServiceConfig) -> anyhow::Result<Arc<dyn ReservationService>> {
    match config {
        ReservationServiceConfig::BigQuery(bigquery_config) => {
            Ok(Arc::new(bigquery::BigQueryReservationService::new(bigquery_config)?))
        }
        ReservationServiceConfig::InMemory => {
            tracing::warn!("Using the in-memory reservation service: no BigQuery resources will be touched");
            Ok(Arc::new(in_memory::InMemoryReservationService::new()))
        }
    }
}

/// Result type for reservation service operations
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Errors returned by a reservation service
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// The API answered with a non-success status
    #[error("Reservation API returned {status} {code}: {message}")]
    Api { status: u16, code: String, message: String },

    /// The request never produced a response (connect failure, timeout, ...)
    #[error("Reservation API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with something we could not decode
    #[error("Invalid reservation API response: {0}")]
    InvalidResponse(String),

    /// No access token could be obtained
    #[error("Failed to obtain access token: {0}")]
    Credentials(String),
}

impl ReservationError {
    pub(crate) fn not_found(name: &str) -> Self {
        ReservationError::Api {
            status: 404,
            code: "NOT_FOUND".to_string(),
            message: format!("Not found: {name}"),
        }
    }
}

/// `projects/{project}/locations/{location}`, the parent of commitments and reservations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationPath {
    pub project_id: String,
    pub location: String,
}

impl LocationPath {
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/locations/{}", self.project_id, self.location)
    }
}

/// Commitment plan of a capacity commitment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitmentPlan {
    #[default]
    Flex,
    Trial,
    Monthly,
    Annual,
    ThreeYear,
    /// Plans this crate does not know about are passed through untouched
    #[serde(untagged)]
    Other(String),
}

/// Job type an assignment applies to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    #[default]
    Query,
    Pipeline,
    MlExternal,
    Background,
    #[serde(untagged)]
    Other(String),
}

/// A purchased block of slots
#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityCommitment {
    /// Output only. `projects/{project}/locations/{location}/capacityCommitments/{id}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub slot_count: i64,
    #[serde(default)]
    pub plan: CommitmentPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment_end_time: Option<DateTime<Utc>>,
}

/// Slots carved out for a set of assignments
#[serde_as]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Output only. `projects/{project}/locations/{location}/reservations/{id}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub slot_capacity: i64,
    #[serde(default)]
    pub ignore_idle_slots: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

/// Binding of a reservation to a project, folder or organization
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Output only. `{reservation}/assignments/{id}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// e.g. `projects/myproject`
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Abstract reservation service interface
///
/// Implementors talk to the BigQuery Reservation API or stand in for it. Every method maps to
/// exactly one logical remote primitive; list methods return all pages.
#[async_trait]
pub trait ReservationService: Send + Sync {
    /// List all capacity commitments under `parent`
    async fn list_capacity_commitments(&self, parent: &LocationPath) -> Result<Vec<CapacityCommitment>>;

    /// List all reservations under `parent`
    async fn list_reservations(&self, parent: &LocationPath) -> Result<Vec<Reservation>>;

    /// List all assignments of the reservation named `reservation`
    async fn list_assignments(&self, reservation: &str) -> Result<Vec<Assignment>>;

    /// Purchase a capacity commitment. Returns the commitment as created, including its name.
    async fn create_capacity_commitment(
        &self,
        parent: &LocationPath,
        commitment: &CapacityCommitment,
    ) -> Result<CapacityCommitment>;

    /// Create a reservation with the caller-chosen `reservation_id`
    async fn create_reservation(
        &self,
        parent: &LocationPath,
        reservation_id: &str,
        reservation: &Reservation,
    ) -> Result<Reservation>;

    /// Create an assignment under the reservation named `reservation`
    async fn create_assignment(&self, reservation: &str, assignment: &Assignment) -> Result<Assignment>;

    /// Delete a capacity commitment by resource name
    async fn delete_capacity_commitment(&self, name: &str) -> Result<()>;

    /// Delete a reservation by resource name. Fails while the reservation has assignments.
    async fn delete_reservation(&self, name: &str) -> Result<()>;

    /// Delete an assignment by resource name
    async fn delete_assignment(&self, name: &str) -> Result<()>;
}
