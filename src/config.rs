/// Configuration management for the bucket gateway
use crate::error::{GatewayError, GatewayResult};
use crate::tenant::Permissions;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default segment rotation threshold (1 MiB)
pub const DEFAULT_MAX_REF_FILE_SIZE: u64 = 1_048_576;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "bucket_gateway=debug,tower_http=debug";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub defaults: Permissions,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one namespace per tenant hash
    pub storage_directory: PathBuf,
    /// Trusted domain whitelist
    pub tenants_file: PathBuf,
    /// Generated domain -> tenant map
    pub tenant_map_file: PathBuf,
    /// Segment rotation threshold in bytes
    pub max_reference_file_size: u64,
    /// How long a writer waits for a tenant lock
    pub lock_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives
    pub level: String,
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GatewayResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GATEWAY_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_setting(env::var("GATEWAY_PORT").ok(), 8080, "Invalid port number")?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let storage_directory: PathBuf = env::var("GATEWAY_STORAGE_DIRECTORY")
            .unwrap_or_else(|_| "./data/storage".to_string())
            .into();
        let tenants_file = env::var("GATEWAY_TENANTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/tenants/tenants.json"));
        let tenant_map_file = env::var("GATEWAY_TENANT_MAP_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/tenants/tenants_map.json"));
        let max_reference_file_size = parse_setting(
            env::var("GATEWAY_MAX_REF_FILE_SIZE").ok(),
            DEFAULT_MAX_REF_FILE_SIZE,
            "Invalid reference file size",
        )?;
        let lock_timeout_secs = parse_setting(
            env::var("GATEWAY_LOCK_TIMEOUT_SECS").ok(),
            10,
            "Invalid lock timeout",
        )?;

        let fallback = Permissions::default();
        let max_file_size = env::var("GATEWAY_DEFAULT_MAX_FILE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(fallback.max_file_size);
        let allowed_mime_types = env::var("GATEWAY_DEFAULT_MIME_TYPES")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<String>>()
            })
            .unwrap_or(fallback.allowed_mime_types);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        Ok(GatewayConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                storage_directory,
                tenants_file,
                tenant_map_file,
                max_reference_file_size,
                lock_timeout_secs,
            },
            defaults: Permissions {
                max_file_size,
                allowed_mime_types,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Configuration rooted at a single data directory (used by tests and local runs)
    pub fn with_data_directory(data_directory: impl Into<PathBuf>) -> Self {
        let data_directory = data_directory.into();
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8080,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                storage_directory: data_directory.join("storage"),
                tenants_file: data_directory.join("tenants").join("tenants.json"),
                tenant_map_file: data_directory.join("tenants").join("tenants_map.json"),
                max_reference_file_size: DEFAULT_MAX_REF_FILE_SIZE,
                lock_timeout_secs: 10,
            },
            defaults: Permissions::default(),
            logging: LoggingConfig {
                level: DEFAULT_LOG_FILTER.to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> GatewayResult<()> {
        if self.service.hostname.is_empty() {
            return Err(GatewayError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.storage.max_reference_file_size == 0 {
            return Err(GatewayError::Validation(
                "Reference file size threshold must be greater than zero".to_string(),
            ));
        }

        if self.defaults.allowed_mime_types.is_empty() {
            return Err(GatewayError::Validation(
                "At least one default MIME type must be allowed".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse an optional numeric setting, falling back to `default` when unset
fn parse_setting<T: FromStr>(raw: Option<String>, default: T, message: &str) -> GatewayResult<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| GatewayError::Validation(format!("{}: '{}'", message, value))),
        None => Ok(default),
    }
}
