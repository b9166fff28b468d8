//! Request parsing and validation.
//!
//! Everything here runs before the reservation service is touched: a request that fails
//! validation never produces a remote call. `project_id` and `location` end up as path segments
//! of remote resource names, so both are restricted to the characters the API allows in them.

use serde::{Deserialize, Deserializer, de::Error as _};
use utoipa::ToSchema;

use crate::reservations::LocationPath;

use super::{Operation, OperationRequest};

/// Decoded request body, before validation.
///
/// Every field is optional at the decoding stage so that a missing field is reported with a
/// specific message rather than a generic decoding error.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct OperationRequestBody {
    /// `report`, `cleanup` or `purchase`
    #[schema(example = "report")]
    pub operation: Option<String>,
    /// Project that owns the commitments and reservations
    #[schema(example = "foobar")]
    pub project_id: Option<String>,
    /// Reservation location, e.g. `EU` or `us-central1`. Defaults to the configured location.
    #[schema(example = "EU")]
    pub location: Option<String>,
    /// Number of slots to purchase. Required for `purchase`, ignored otherwise. Accepts an
    /// integer, an integral float such as `400.0`, or a numeric string.
    #[serde(default, deserialize_with = "deserialize_slots")]
    #[schema(value_type = Option<i64>, example = 100)]
    pub slots: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Slots {
    Integer(i64),
    Float(f64),
    Text(String),
}

fn deserialize_slots<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let integral = |f: f64| f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64;
    match Option::<Slots>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Slots::Integer(n)) => Ok(Some(n)),
        Some(Slots::Float(f)) if integral(f) => Ok(Some(f as i64)),
        Some(Slots::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("slots must be an integer, got '{text}'"))),
        Some(Slots::Float(f)) => Err(D::Error::custom(format!("slots must be an integer, got {f}"))),
    }
}

/// Project ids are lowercase letters, digits and dashes, optionally scoped by a domain
/// (`example.com:my-project`)
fn is_valid_project_id(project_id: &str) -> bool {
    project_id.starts_with(|c: char| c.is_ascii_lowercase())
        && project_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | ':'))
        && !project_id.contains("..")
}

/// `EU`, `US`, `us-central1`, `europe-west4`, ...
fn is_valid_location(location: &str) -> bool {
    location.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("json request is required")]
    NotJson,

    #[error("Invalid json request: {0}")]
    Malformed(String),

    #[error("operation is required. Available operations are 'report', 'cleanup' and 'purchase'")]
    MissingOperation,

    #[error("Unsupported operation '{0}'. Available operations are 'report', 'cleanup' and 'purchase'")]
    UnsupportedOperation(String),

    #[error("project_id is required in the json request")]
    MissingProjectId,

    #[error("Invalid project_id '{0}'. Project ids contain only lowercase letters, digits, dashes, dots and colons")]
    InvalidProjectId(String),

    #[error("location cannot be empty")]
    EmptyLocation,

    #[error("Invalid location '{0}'. Locations contain only letters, digits and dashes")]
    InvalidLocation(String),

    #[error("slots is required in the json request for the purchase operation")]
    MissingSlots,

    #[error("slots must be a positive integer, got {0}")]
    NonPositiveSlots(i64),
}

/// Parse a raw request body. Anything that is not a JSON object is rejected, whatever the
/// content type says.
pub fn parse_request(body: &[u8], default_location: &str) -> Result<OperationRequest, InvalidRequest> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| InvalidRequest::NotJson)?;
    if !value.is_object() {
        return Err(InvalidRequest::NotJson);
    }

    let body: OperationRequestBody =
        serde_json::from_value(value).map_err(|e| InvalidRequest::Malformed(e.to_string()))?;

    validate(body, default_location)
}

/// Turn a decoded body into a request, applying the configured default location
pub fn validate(body: OperationRequestBody, default_location: &str) -> Result<OperationRequest, InvalidRequest> {
    let operation: Operation = match body.operation {
        None => return Err(InvalidRequest::MissingOperation),
        Some(op) => op.parse().map_err(|_| InvalidRequest::UnsupportedOperation(op))?,
    };

    let project_id = match body.project_id {
        Some(project_id) if !project_id.trim().is_empty() => project_id,
        _ => return Err(InvalidRequest::MissingProjectId),
    };
    if !is_valid_project_id(&project_id) {
        return Err(InvalidRequest::InvalidProjectId(project_id));
    }

    let location = body.location.unwrap_or_else(|| default_location.to_string());
    if location.trim().is_empty() {
        return Err(InvalidRequest::EmptyLocation);
    }
    if !is_valid_location(&location) {
        return Err(InvalidRequest::InvalidLocation(location));
    }

    let target = LocationPath::new(project_id, location);

    Ok(match operation {
        Operation::Report => OperationRequest::Report { target },
        Operation::Cleanup => OperationRequest::Cleanup { target },
        Operation::Purchase => match body.slots {
            None => return Err(InvalidRequest::MissingSlots),
            Some(slots) if slots <= 0 => return Err(InvalidRequest::NonPositiveSlots(slots)),
            Some(slots) => OperationRequest::Purchase { target, slots },
        },
    })
}
