//! HTTP surface: the operation endpoint and its wire models.
//!
//! - **[`handlers`]**: axum route handlers
//! - **[`models`]**: request/response bodies, annotated with `utoipa` for the OpenAPI document
//!   served at `/api-docs/openapi.json`

pub mod handlers;
pub mod models;
