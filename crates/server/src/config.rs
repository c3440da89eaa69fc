//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `AGENDA_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `IDENTITY_URL` - Base URL of the identity provider (e.g. `https://xyz.supabase.co`)
//! - `IDENTITY_API_KEY` - Project API key sent alongside user tokens
//!
//! ## Optional
//! - `AGENDA_HOST` - Bind address (default: 127.0.0.1)
//! - `AGENDA_PORT` - Listen port (default: 3000)
//! - `IDENTITY_TENANT_CLAIM` - Metadata claim holding the tenant (default: `client_id`)
//! - `ADMIN_TENANT` - Tenant allowed to act on behalf of any tenant (default: `admin`)
//! - `AUTH_FALLBACK_TENANT` - Tenant assumed when a user has no binding.
//!   Unset by default, which makes unbound users fail closed with 403.
//! - `MIRROR_REFRESH_TOKEN` - OAuth refresh token for the spreadsheet API,
//!   exchanged for access tokens as they expire. Requires `MIRROR_CLIENT_ID`
//!   and `MIRROR_CLIENT_SECRET`.
//! - `MIRROR_TOKEN_URL` - OAuth token endpoint (default: Google)
//! - `MIRROR_ACCESS_TOKEN` - Fixed access token, used when no refresh token is
//!   set. With neither set, mirroring is disabled for every tenant.
//! - `MIRROR_BASE_URL` - Spreadsheet values API (default: Google Sheets v4)
//! - `MIRROR_SHEET_NAME` - Sheet (tab) holding the appointments (default: `Agendamentos`)
//! - `HTTP_CLIENT_TIMEOUT_SECS` - Timeout for outbound HTTP calls (default: 10)
//! - `LOG_FORMAT` - `pretty` (default) or `json`
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use agenda_core::TenantId;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_MIRROR_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const DEFAULT_MIRROR_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server application configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// Tenant resolution policy
    pub tenancy: TenancyConfig,
    /// Spreadsheet mirror configuration (`None` disables mirroring)
    pub mirror: Option<MirrorConfig>,
    /// Timeout applied to every outbound HTTP request
    pub http_timeout: Duration,
    /// Log output format
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions sent to Sentry
    pub sentry_traces_sample_rate: f32,
}

/// Identity provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct IdentityConfig {
    /// Base URL of the identity provider
    pub base_url: Url,
    /// Project API key
    pub api_key: SecretString,
    /// Name of the metadata claim carrying the tenant id
    pub tenant_claim: String,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("tenant_claim", &self.tenant_claim)
            .finish()
    }
}

/// How a caller's tenant is resolved and who may cross tenants.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Tenant that may act on behalf of any other tenant
    pub admin_tenant: TenantId,
    /// Tenant assumed for users without any binding (fail closed when `None`)
    pub fallback_tenant: Option<TenantId>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            admin_tenant: TenantId::new("admin"),
            fallback_tenant: None,
        }
    }
}

/// Spreadsheet mirror configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct MirrorConfig {
    /// Base URL of the spreadsheet values API
    pub base_url: Url,
    pub credentials: MirrorCredentials,
    /// Sheet (tab) name inside each tenant's document
    pub sheet_name: String,
}

impl std::fmt::Debug for MirrorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorConfig")
            .field("base_url", &self.base_url.as_str())
            .field("credentials", &self.credentials)
            .field("sheet_name", &self.sheet_name)
            .finish()
    }
}

/// How the mirror authenticates to the spreadsheet API.
#[derive(Clone)]
pub enum MirrorCredentials {
    /// A fixed OAuth access token.
    AccessToken(SecretString),
    /// An OAuth refresh token, exchanged at `token_url` for access tokens.
    RefreshToken {
        token_url: Url,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
}

impl std::fmt::Debug for MirrorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessToken(_) => f.debug_tuple("AccessToken").field(&"[REDACTED]").finish(),
            Self::RefreshToken {
                token_url,
                client_id,
                ..
            } => f
                .debug_struct("RefreshToken")
                .field("token_url", &token_url.as_str())
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("refresh_token", &"[REDACTED]")
                .finish(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_source(&EnvSource::Process)
    }

    /// Load configuration from an arbitrary variable source.
    fn from_source(env: &EnvSource) -> Result<Self, ConfigError> {
        let database_url = env
            .get("AGENDA_DATABASE_URL")
            .or_else(|| env.get("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("AGENDA_DATABASE_URL".to_string()))?;
        let host = env.parsed("AGENDA_HOST", "127.0.0.1")?;
        let port = env.parsed("AGENDA_PORT", "3000")?;

        let identity = IdentityConfig::from_source(env)?;
        let tenancy = TenancyConfig::from_source(env);
        let mirror = MirrorConfig::from_source(env)?;

        let http_timeout = Duration::from_secs(env.parsed("HTTP_CLIENT_TIMEOUT_SECS", "10")?);
        let log_format = match env.or_default("LOG_FORMAT", "pretty").as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "LOG_FORMAT".to_string(),
                    format!("expected 'pretty' or 'json', got '{other}'"),
                ));
            }
        };

        Ok(Self {
            database_url,
            host,
            port,
            identity,
            tenancy,
            mirror,
            http_timeout,
            log_format,
            sentry_dsn: env.get("SENTRY_DSN"),
            sentry_environment: env.get("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: env.parsed("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: env.parsed("SENTRY_TRACES_SAMPLE_RATE", "0.0")?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl IdentityConfig {
    fn from_source(env: &EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: env.url("IDENTITY_URL", None)?,
            api_key: env.validated_secret("IDENTITY_API_KEY")?,
            tenant_claim: env.or_default("IDENTITY_TENANT_CLAIM", "client_id"),
        })
    }
}

impl TenancyConfig {
    fn from_source(env: &EnvSource) -> Self {
        Self {
            admin_tenant: TenantId::new(env.or_default("ADMIN_TENANT", "admin")),
            fallback_tenant: env
                .get("AUTH_FALLBACK_TENANT")
                .filter(|t| !t.trim().is_empty())
                .map(TenantId::new),
        }
    }
}

impl MirrorConfig {
    /// Load only the mirror settings, for tools that do not serve requests.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a mirror variable is invalid.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let _ = dotenvy::dotenv();

        Self::from_source(&EnvSource::Process)
    }

    fn from_source(env: &EnvSource) -> Result<Option<Self>, ConfigError> {
        let credentials = if env.get("MIRROR_REFRESH_TOKEN").is_some() {
            MirrorCredentials::RefreshToken {
                token_url: env.url("MIRROR_TOKEN_URL", Some(DEFAULT_MIRROR_TOKEN_URL))?,
                client_id: env.required("MIRROR_CLIENT_ID")?,
                client_secret: env.validated_secret("MIRROR_CLIENT_SECRET")?,
                refresh_token: env.validated_secret("MIRROR_REFRESH_TOKEN")?,
            }
        } else if env.get("MIRROR_ACCESS_TOKEN").is_some() {
            MirrorCredentials::AccessToken(env.validated_secret("MIRROR_ACCESS_TOKEN")?)
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            base_url: env.url("MIRROR_BASE_URL", Some(DEFAULT_MIRROR_BASE_URL))?,
            credentials,
            sheet_name: env.or_default("MIRROR_SHEET_NAME", "Agendamentos"),
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Where configuration values come from.
enum EnvSource {
    /// The process environment.
    Process,
    /// A fixed map, for tests.
    #[cfg_attr(not(test), allow(dead_code))]
    Map(HashMap<String, String>),
}

impl EnvSource {
    /// Get an optional variable.
    fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Process => std::env::var(key).ok(),
            Self::Map(map) => map.get(key).cloned(),
        }
    }

    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Get a variable (or its default) parsed into `T`.
    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.or_default(key, default)
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }

    /// Get a variable as an absolute `http(s)` URL.
    fn url(&self, key: &str, default: Option<&str>) -> Result<Url, ConfigError> {
        let raw = match default {
            Some(default) => self.or_default(key, default),
            None => self.required(key)?,
        };
        let url = Url::parse(&raw)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        Ok(url)
    }

    /// Load and validate a secret.
    fn validated_secret(&self, key: &str) -> Result<SecretString, ConfigError> {
        let value = self.required(key)?;
        validate_secret_strength(&value, key)?;
        Ok(SecretString::from(value))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the provider."
            ),
        ));
    }

    Ok(())
}
