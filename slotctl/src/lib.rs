//! # slotctl: BigQuery slot capacity control
//!
//! `slotctl` is a small HTTP service that manages BigQuery flat-rate capacity for one project and
//! location at a time. Each request names one of three operations:
//!
//! - **report**: list the capacity commitments, reservations and assignments that exist
//! - **cleanup**: delete all of them, assignments first, then reservations, then commitments
//! - **purchase**: buy a commitment of N slots, create a reservation of the same size, and assign
//!   it to the project for query jobs
//!
//! It is meant to be invoked by a scheduler (Cloud Scheduler, cron, a workflow) around a batch
//! window: purchase before, cleanup after, report whenever.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). A request is parsed and validated
//! in full before anything remote happens ([`operations::parse_request`]), then handed to the
//! [`operations::Dispatcher`], which runs the operation against a
//! [`reservations::ReservationService`]. The production implementation talks to the BigQuery
//! Reservation REST API with a token from the instance metadata server; an in-memory
//! implementation stands in for it in tests and dry runs.
//!
//! Nothing is persisted and nothing is retried. Operations are not transactional: a purchase that
//! fails half way leaves what it created unless `purchase.rollback_on_failure` is set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use slotctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = slotctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     slotctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! ```bash
//! curl -X POST localhost:8080/ -d '{"operation": "purchase", "project_id": "foobar", "location": "EU", "slots": 100}'
//! ```
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod operations;
pub mod reservations;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;

use axum::{
    Json, Router,
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;

pub use config::Config;
use openapi::ApiDoc;
use operations::Dispatcher;
use reservations::ReservationService;

/// Shared state handed to every handler
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .dispatcher(Dispatcher::new(service, purchase_config))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(api::handlers::operations::run_operation))
        .route("/operations", post(api::handlers::operations::run_operation))
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create an application backed by the reservation service named in the configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting slotctl with configuration: {:#?}", config);
        let service = reservations::create_service(&config.reservations)?;
        Ok(Self::with_service(config, service))
    }

    /// Create an application backed by an existing reservation service
    pub fn with_service(config: Config, service: Arc<dyn ReservationService>) -> Self {
        let state = AppState::builder()
            .dispatcher(Dispatcher::new(service, config.purchase.clone()))
            .config(config.clone())
            .build();

        Self {
            router: build_router(state),
            config,
        }
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves, then flush telemetry
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "slotctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
