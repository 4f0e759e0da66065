//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub max_upload_bytes: usize,

    // --- Extraction ---
    pub openai_api_key: Option<String>,
    pub extraction_model: String,

    // --- Object storage ---
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub presigned_url_ttl: Duration,

    // --- Auth ---
    pub session_secret: String,
    pub allow_guest_tokens: bool,

    // --- Spreadsheet provider ---
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,

    // --- Pipeline tuning ---
    pub external_call_timeout: Duration,
    pub batch_concurrency: usize,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:3000")?;
        let database_url = required("DATABASE_URL")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:8081");
        let max_upload_bytes = parse_var::<usize>("MAX_UPLOAD_BYTES", "20971520")?;

        // --- Load Extraction Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let extraction_model = var_or("EXTRACTION_MODEL", "gpt-4o");

        // --- Load Object Storage Settings ---
        let s3_bucket = required("S3_BUCKET")?;
        let s3_region = var_or("S3_REGION", "auto");
        let s3_endpoint = std::env::var("S3_ENDPOINT").ok();
        let s3_access_key_id = std::env::var("S3_ACCESS_KEY_ID").ok();
        let s3_secret_access_key = std::env::var("S3_SECRET_ACCESS_KEY").ok();
        let presigned_url_ttl =
            Duration::from_secs(parse_var::<u64>("PRESIGNED_URL_TTL_SECS", "900")?);

        // --- Load Auth Settings ---
        let session_secret = required("SESSION_SECRET")?;
        if session_secret.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "SESSION_SECRET".to_string(),
                "must be at least 32 characters".to_string(),
            ));
        }
        let allow_guest_tokens = parse_var::<bool>("ALLOW_GUEST_TOKENS", "false")?;

        // --- Load Spreadsheet Provider Settings (optional) ---
        let google_client_id = std::env::var("GOOGLE_CLIENT_ID").ok();
        let google_client_secret = std::env::var("GOOGLE_CLIENT_SECRET").ok();

        // --- Load Pipeline Tuning ---
        let external_call_timeout =
            Duration::from_secs(parse_var::<u64>("EXTERNAL_CALL_TIMEOUT_SECS", "60")?);
        let batch_concurrency = parse_var::<usize>("BATCH_CONCURRENCY", "4")?;
        if batch_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            max_upload_bytes,
            openai_api_key,
            extraction_model,
            s3_bucket,
            s3_region,
            s3_endpoint,
            s3_access_key_id,
            s3_secret_access_key,
            presigned_url_ttl,
            session_secret,
            allow_guest_tokens,
            google_client_id,
            google_client_secret,
            external_call_timeout,
            batch_concurrency,
        })
    }
}

/// Configuration for the device-side `sync` runner.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub session_token: Option<String>,
    pub cache_dir: PathBuf,
    pub log_level: Level,
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base_url = var_or("API_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let session_token = std::env::var("SESSION_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let cache_dir = PathBuf::from(var_or("CACHE_DIR", "./.receipt-cache"));
        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let request_timeout =
            Duration::from_secs(parse_var::<u64>("EXTERNAL_CALL_TIMEOUT_SECS", "30")?);

        Ok(Self {
            api_base_url,
            session_token,
            cache_dir,
            log_level,
            request_timeout,
        })
    }
}
