//! HTTP request handlers.
//!
//! Handlers return [`crate::errors::Error`], which converts to an HTTP status and a JSON
//! `{ message, severity }` body.

pub mod operations;
