//! Shared test helpers.

use axum_test::TestServer;
use std::sync::Arc;

use crate::config::{Config, ReservationServiceConfig};
use crate::reservations::in_memory::InMemoryReservationService;

/// A reqwest client usable from tests. The binary installs the crypto provider in `main`; tests
/// have to do it themselves, and only the first install per process succeeds.
pub fn http_client() -> reqwest::Client {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("Failed to build test HTTP client")
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        reservations: ReservationServiceConfig::InMemory,
        ..Default::default()
    }
}

/// A test server over a fresh in-memory reservation service, returned alongside it for
/// inspection
pub fn create_test_app() -> (TestServer, Arc<InMemoryReservationService>) {
    let service = Arc::new(InMemoryReservationService::new());
    let app = crate::Application::with_service(create_test_config(), service.clone());
    (app.into_test_server(), service)
}
