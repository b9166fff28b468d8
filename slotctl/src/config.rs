//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `SLOTCTL_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SLOTCTL_` override YAML values
//! 3. **PORT** - Special case: overrides `port` if set, as injected by Cloud Run and Cloud Functions
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `SLOTCTL_PURCHASE__ROLLBACK_ON_FAILURE=true` sets the `purchase.rollback_on_failure` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Region used when a request omits `location`
//! SLOTCTL_DEFAULT_LOCATION=US
//!
//! # Use a pre-minted access token instead of the metadata server. Without a config file the
//! # service type has to be given too, since it tags the `reservations` table.
//! SLOTCTL_RESERVATIONS__TYPE=bigquery
//! SLOTCTL_RESERVATIONS__CREDENTIALS__TYPE=static
//! SLOTCTL_RESERVATIONS__CREDENTIALS__ACCESS_TOKEN="$(gcloud auth print-access-token)"
//!
//! # Dry-run against the in-process fake
//! SLOTCTL_RESERVATIONS__TYPE=in_memory
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::reservations::{CommitmentPlan, JobType};

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SLOTCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Location used when a request does not carry one
    pub default_location: String,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Which reservation service backs the operations
    pub reservations: ReservationServiceConfig,
    /// Shape of the resources created by the purchase operation
    pub purchase: PurchaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            default_location: "EU".to_string(),
            enable_otel_export: false,
            reservations: ReservationServiceConfig::default(),
            purchase: PurchaseConfig::default(),
        }
    }
}

/// Reservation service backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationServiceConfig {
    /// The BigQuery Reservation REST API
    #[serde(rename = "bigquery")]
    BigQuery(BigQueryConfig),
    /// In-process fake, nothing leaves the process. Useful for dry runs and local development.
    InMemory,
}

impl Default for ReservationServiceConfig {
    fn default() -> Self {
        ReservationServiceConfig::BigQuery(BigQueryConfig::default())
    }
}

/// BigQuery Reservation API client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BigQueryConfig {
    /// API root, without the version segment
    pub endpoint: Url,
    /// Timeout applied to every API request (default: 30s)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Page size requested from list endpoints
    pub page_size: u32,
    /// Where bearer tokens come from
    pub credentials: CredentialsConfig,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://bigqueryreservation.googleapis.com/"
                .parse()
                .expect("default endpoint is a valid URL"),
            request_timeout: Duration::from_secs(30),
            page_size: 100,
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Access token source for the BigQuery Reservation API.
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsConfig {
    /// Fetch tokens for the attached service account from the GCE metadata server.
    /// This is what Cloud Functions, Cloud Run and GCE instances provide.
    MetadataServer {
        #[serde(default = "default_metadata_url")]
        metadata_url: Url,
    },
    /// A fixed bearer token, e.g. from `gcloud auth print-access-token`
    Static { access_token: String },
}

fn default_metadata_url() -> Url {
    "http://metadata.google.internal/"
        .parse()
        .expect("default metadata URL is a valid URL")
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        CredentialsConfig::MetadataServer {
            metadata_url: default_metadata_url(),
        }
    }
}

// Tokens must never end up in logs
impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsConfig::MetadataServer { metadata_url } => f
                .debug_struct("MetadataServer")
                .field("metadata_url", &metadata_url.as_str())
                .finish(),
            CredentialsConfig::Static { .. } => f.debug_struct("Static").field("access_token", &"<redacted>").finish(),
        }
    }
}

/// Purchase operation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PurchaseConfig {
    /// Commitment plan to buy (default: FLEX)
    pub plan: CommitmentPlan,
    /// Job type of the created assignment (default: QUERY)
    pub job_type: JobType,
    /// Whether the created reservation refuses idle slots from other reservations
    pub ignore_idle_slots: bool,
    /// Prefix of generated reservation ids
    pub reservation_prefix: String,
    /// Delete already-created resources when a later purchase step fails.
    ///
    /// Off by default: a failed purchase leaves whatever was created in place, and the caller
    /// runs cleanup. When on, a failed assignment deletes the new reservation, and a failed
    /// reservation or assignment deletes the new commitment. Note that FLEX commitments cannot
    /// be deleted during their first minute, so the compensation itself may fail.
    pub rollback_on_failure: bool,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            plan: CommitmentPlan::Flex,
            job_type: JobType::Query,
            ignore_idle_slots: false,
            reservation_prefix: "reservation".to_string(),
            rollback_on_failure: false,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate configuration values that serde cannot check
    pub fn validate(&self) -> Result<(), Error> {
        if self.default_location.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: default_location cannot be empty".to_string(),
            });
        }

        let prefix = &self.purchase.reservation_prefix;
        if !prefix.starts_with(|c: char| c.is_ascii_lowercase())
            || !prefix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: purchase.reservation_prefix '{prefix}' must start with a lowercase letter \
                     and contain only lowercase letters, digits and dashes"
                ),
            });
        }

        if let ReservationServiceConfig::BigQuery(bigquery) = &self.reservations {
            if bigquery.request_timeout.is_zero() {
                return Err(Error::Internal {
                    operation: "Config validation: reservations.request_timeout must be greater than zero".to_string(),
                });
            }
            if bigquery.page_size == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: reservations.page_size must be greater than zero".to_string(),
                });
            }
            if let CredentialsConfig::Static { access_token } = &bigquery.credentials
                && access_token.is_empty()
            {
                return Err(Error::Internal {
                    operation: "Config validation: static credentials require a non-empty access_token. \
                     Set SLOTCTL_RESERVATIONS__CREDENTIALS__ACCESS_TOKEN."
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values. SLOTCTL_CONFIG is consumed by clap.
            .merge(Env::prefixed("SLOTCTL_").split("__").ignore(&["config"]))
            // Serverless platforms tell us where to listen through PORT
            .merge(Env::raw().only(&["PORT"]).map(|_| "port".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.port, 8080);
            assert_eq!(config.default_location, "EU");
            assert_eq!(config.purchase.plan, CommitmentPlan::Flex);
            assert_eq!(config.purchase.job_type, JobType::Query);
            assert!(!config.purchase.rollback_on_failure);
            match config.reservations {
                ReservationServiceConfig::BigQuery(bigquery) => {
                    assert_eq!(bigquery.endpoint.as_str(), "https://bigqueryreservation.googleapis.com/");
                    assert_eq!(bigquery.request_timeout, Duration::from_secs(30));
                    assert!(matches!(bigquery.credentials, CredentialsConfig::MetadataServer { .. }));
                }
                other => panic!("expected bigquery backend, got {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_yaml_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
default_location: US
reservations:
  type: bigquery
  endpoint: http://localhost:9999
  request_timeout: 5s
  credentials:
    type: static
    access_token: ya29.token
purchase:
  plan: MONTHLY
  reservation_prefix: nightly
  rollback_on_failure: true
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.default_location, "US");
            assert_eq!(config.purchase.plan, CommitmentPlan::Monthly);
            assert_eq!(config.purchase.reservation_prefix, "nightly");
            assert!(config.purchase.rollback_on_failure);
            let ReservationServiceConfig::BigQuery(bigquery) = config.reservations else {
                panic!("expected bigquery backend");
            };
            assert_eq!(bigquery.endpoint.as_str(), "http://localhost:9999/");
            assert_eq!(bigquery.request_timeout, Duration::from_secs(5));
            assert_eq!(bigquery.page_size, 100); // default
            match bigquery.credentials {
                CredentialsConfig::Static { access_token } => assert_eq!(access_token, "ya29.token"),
                other => panic!("expected static credentials, got {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "default_location: US\n")?;

            jail.set_env("SLOTCTL_HOST", "127.0.0.1");
            jail.set_env("SLOTCTL_DEFAULT_LOCATION", "asia-northeast1");
            jail.set_env("SLOTCTL_RESERVATIONS__TYPE", "in_memory");
            jail.set_env("SLOTCTL_CONFIG", "test.yaml");
            jail.set_env("PORT", "9090");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9090);
            assert_eq!(config.default_location, "asia-northeast1");
            assert!(matches!(config.reservations, ReservationServiceConfig::InMemory));

            Ok(())
        });
    }

    #[test]
    fn test_static_token_from_env_only() {
        Jail::expect_with(|jail| {
            jail.set_env("SLOTCTL_RESERVATIONS__TYPE", "bigquery");
            jail.set_env("SLOTCTL_RESERVATIONS__CREDENTIALS__TYPE", "static");
            jail.set_env("SLOTCTL_RESERVATIONS__CREDENTIALS__ACCESS_TOKEN", "ya29.from-env");

            let config = Config::load(&args("missing.yaml"))?;

            let ReservationServiceConfig::BigQuery(bigquery) = &config.reservations else {
                panic!("expected bigquery service, got {:?}", config.reservations);
            };
            assert!(matches!(
                &bigquery.credentials,
                CredentialsConfig::Static { access_token } if access_token == "ya29.from-env"
            ));
            assert_eq!(bigquery.page_size, 100);

            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_fields() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "default_region: US\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.default_location = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.purchase.reservation_prefix = "Nightly".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.purchase.reservation_prefix = "".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reservations = ReservationServiceConfig::BigQuery(BigQueryConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reservations = ReservationServiceConfig::BigQuery(BigQueryConfig {
            credentials: CredentialsConfig::Static {
                access_token: String::new(),
            },
            ..Default::default()
        });
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_static_token_is_redacted_in_debug_output() {
        let credentials = CredentialsConfig::Static {
            access_token: "ya29.secret".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("ya29.secret"));
        assert!(rendered.contains("redacted"));
    }
}
