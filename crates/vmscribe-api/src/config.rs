//! Configuration management for the vmscribe service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use vmscribe_workflow::{ClientConfig, Credentials, JwtCredentials, RetryPolicies, RetrySchedule};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use vmscribe_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,
    /// Database connection idle timeout in seconds.
    ///
    /// Environment variable: `DATABASE_IDLE_TIMEOUT`
    #[serde(default = "default_idle_timeout", alias = "DATABASE_IDLE_TIMEOUT")]
    pub database_idle_timeout: u64,
    /// Maximum lifetime of database connections in seconds.
    ///
    /// Environment variable: `DATABASE_MAX_LIFETIME`
    #[serde(default = "default_max_lifetime", alias = "DATABASE_MAX_LIFETIME")]
    pub database_max_lifetime: u64,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Message store API
    /// Base URL of the message-store API.
    ///
    /// Environment variable: `API_BASE_URL`
    #[serde(default = "default_api_base_url", alias = "API_BASE_URL")]
    pub api_base_url: String,
    /// Pre-issued bearer token, used only when `api_jwt` is empty.
    ///
    /// Environment variable: `API_ACCESS_TOKEN`
    #[serde(default, alias = "API_ACCESS_TOKEN")]
    pub api_access_token: String,
    /// OAuth client id for the JWT-bearer grant.
    ///
    /// Environment variable: `API_CLIENT_ID`
    #[serde(default, alias = "API_CLIENT_ID")]
    pub api_client_id: String,
    /// OAuth client secret for the JWT-bearer grant.
    ///
    /// Environment variable: `API_CLIENT_SECRET`
    #[serde(default, alias = "API_CLIENT_SECRET")]
    pub api_client_secret: String,
    /// Signed JWT exchanged for access tokens.
    ///
    /// Environment variable: `API_JWT`
    #[serde(default, alias = "API_JWT")]
    pub api_jwt: String,
    /// Message-store request timeout in seconds.
    ///
    /// Environment variable: `API_TIMEOUT_SECONDS`
    #[serde(default = "default_api_timeout", alias = "API_TIMEOUT_SECONDS")]
    pub api_timeout_seconds: u64,

    // Webhook
    /// Shared secret expected in the `verification-token` header.
    ///
    /// Environment variable: `WEBHOOK_VERIFICATION_TOKEN`
    #[serde(default, alias = "WEBHOOK_VERIFICATION_TOKEN")]
    pub webhook_verification_token: String,

    // Shared file
    /// Directory on the file store holding the spreadsheet.
    ///
    /// Environment variable: `FILE_ROOT_DIRECTORY`
    #[serde(default = "default_file_root_directory", alias = "FILE_ROOT_DIRECTORY")]
    pub file_root_directory: String,
    /// Local directory backing the file store.
    ///
    /// Environment variable: `FILE_STORE_PATH`
    #[serde(default = "default_file_store_path", alias = "FILE_STORE_PATH")]
    pub file_store_path: String,
    /// Name of the shared spreadsheet.
    ///
    /// Environment variable: `SPREADSHEET_FILE_NAME`
    #[serde(default = "default_spreadsheet_file_name", alias = "SPREADSHEET_FILE_NAME")]
    pub spreadsheet_file_name: String,

    // Retry
    /// Retries after the initial call, for every policy.
    ///
    /// Environment variable: `RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts", alias = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,
    /// Attachment polling delays in seconds.
    ///
    /// Environment variable: `ATTACHMENT_RETRY_DELAYS`
    #[serde(default = "default_attachment_retry_delays", alias = "ATTACHMENT_RETRY_DELAYS")]
    pub attachment_retry_delays: Vec<u64>,
    /// Smallest jitter added to each polling delay, in seconds.
    ///
    /// Environment variable: `ATTACHMENT_JITTER_MIN_SECONDS`
    #[serde(default = "default_jitter_min", alias = "ATTACHMENT_JITTER_MIN_SECONDS")]
    pub attachment_jitter_min_seconds: u64,
    /// Largest jitter added to each polling delay, in seconds.
    ///
    /// Environment variable: `ATTACHMENT_JITTER_MAX_SECONDS`
    #[serde(default = "default_jitter_max", alias = "ATTACHMENT_JITTER_MAX_SECONDS")]
    pub attachment_jitter_max_seconds: u64,

    // Lifecycle
    /// Time allowed for running workflows to stop on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to message-store client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_base_url.clone(),
            credentials: self.api_credentials(),
            timeout: Duration::from_secs(self.api_timeout_seconds),
            user_agent: format!("vmscribe/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Returns true when access tokens come from the JWT-bearer grant.
    pub fn uses_jwt_authorization(&self) -> bool {
        !self.api_jwt.trim().is_empty()
    }

    fn api_credentials(&self) -> Credentials {
        if self.uses_jwt_authorization() {
            Credentials::Jwt(JwtCredentials {
                client_id: self.api_client_id.clone(),
                client_secret: self.api_client_secret.clone(),
                assertion: self.api_jwt.trim().to_string(),
            })
        } else {
            Credentials::Static(self.api_access_token.clone())
        }
    }

    /// Convert to the retry policies of the workflow.
    pub fn to_retry_policies(&self) -> RetryPolicies {
        RetryPolicies::new(self.retry_max_attempts)
    }

    /// Convert to the attachment polling schedule.
    pub fn to_retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::from_seconds(
            &self.attachment_retry_delays,
            self.attachment_jitter_min_seconds,
            self.attachment_jitter_max_seconds,
        )
    }

    /// Time allowed for running workflows to stop on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let mut masked = self.database_url.clone();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }

        if self.api_timeout_seconds == 0 {
            anyhow::bail!("api_timeout_seconds must be greater than 0");
        }

        if self.uses_jwt_authorization()
            && (self.api_client_id.trim().is_empty() || self.api_client_secret.trim().is_empty())
        {
            anyhow::bail!("api_client_id and api_client_secret are required with api_jwt");
        }

        if self.spreadsheet_file_name.trim().is_empty() {
            anyhow::bail!("spreadsheet_file_name must not be empty");
        }

        if self.attachment_retry_delays.is_empty() {
            anyhow::bail!("attachment_retry_delays must contain at least one delay");
        }

        if self.attachment_jitter_min_seconds > self.attachment_jitter_max_seconds {
            anyhow::bail!("attachment jitter minimum cannot exceed the maximum");
        }

        if self.shutdown_timeout_seconds == 0 {
            anyhow::bail!("shutdown_timeout_seconds must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            database_idle_timeout: default_idle_timeout(),
            database_max_lifetime: default_max_lifetime(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            api_base_url: default_api_base_url(),
            api_access_token: String::new(),
            api_client_id: String::new(),
            api_client_secret: String::new(),
            api_jwt: String::new(),
            api_timeout_seconds: default_api_timeout(),
            webhook_verification_token: String::new(),
            file_root_directory: default_file_root_directory(),
            file_store_path: default_file_store_path(),
            spreadsheet_file_name: default_spreadsheet_file_name(),
            retry_max_attempts: default_retry_max_attempts(),
            attachment_retry_delays: default_attachment_retry_delays(),
            attachment_jitter_min_seconds: default_jitter_min(),
            attachment_jitter_max_seconds: default_jitter_max(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/vmscribe".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://platform.ringcentral.com".to_string()
}

fn default_api_timeout() -> u64 {
    30
}

fn default_file_root_directory() -> String {
    "/shared".to_string()
}

fn default_file_store_path() -> String {
    "./data".to_string()
}

fn default_spreadsheet_file_name() -> String {
    "voicemail-transcriptions.csv".to_string()
}

fn default_retry_max_attempts() -> u32 {
    vmscribe_workflow::retry::DEFAULT_MAX_RETRIES
}

fn default_attachment_retry_delays() -> Vec<u64> {
    vec![20, 40, 80]
}

fn default_jitter_min() -> u64 {
    1
}

fn default_jitter_max() -> u64 {
    3
}

fn default_shutdown_timeout() -> u64 {
    vmscribe_workflow::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_log_level() -> String {
    "info".to_string()
}
