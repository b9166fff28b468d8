//! API request and response data models.
//!
//! These define the public contract of the service and are kept separate from the reservation
//! resource types in [`crate::reservations`], which follow the remote API's representation.

pub mod operations;
