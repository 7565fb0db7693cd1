//! Gateway configuration, read from the environment (and `.env` via dotenvy
//! in `main`).

use std::time::Duration;

use reqwest::Url;
use zeroize::Zeroizing;

pub const MIN_JWT_SECRET_BYTES: usize = 32;
pub const MAX_UPLOAD_URL_TTL_MINUTES: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

/// Attributes of the refresh cookie.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookiePolicy {
    /// Browsers drop `SameSite=None` cookies that are not `Secure`.
    pub fn new(secure: bool, same_site: SameSite) -> Self {
        Self {
            secure: secure || same_site == SameSite::None,
            same_site,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Clone)]
pub struct StorageConfig {
    /// `None` selects the in-memory backend.
    pub endpoint: Option<Url>,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Zeroizing<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DevSeed {
    pub email: String,
    pub password: Zeroizing<String>,
}

#[derive(Clone)]
pub struct Config {
    pub http_port: u16,
    /// `None` selects the in-memory credential store.
    pub database_url: Option<String>,
    pub jwt_secret: Zeroizing<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub cookie: CookiePolicy,
    pub storage: StorageConfig,
    pub upload_url_ttl: Duration,
    pub max_upload_bytes: u64,
    pub store_timeout: Duration,
    pub storage_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub login_max_failures: u32,
    pub login_lockout: Duration,
    pub password_hash: PasswordHashConfig,
    pub cors_allowed_origin: Option<String>,
    pub dev_seed: Option<DevSeed>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("cookie", &self.cookie)
            .field("storage", &self.storage)
            .field("upload_url_ttl", &self.upload_url_ttl)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::Invalid("JWT_SECRET"));
        }

        let same_site = match get("COOKIE_SAME_SITE")
            .unwrap_or_else(|| "lax".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "lax" => SameSite::Lax,
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => return Err(ConfigError::Invalid("COOKIE_SAME_SITE")),
        };
        let cookie = CookiePolicy::new(
            parse_or(&get, "COOKIE_SECURE", true)?,
            same_site,
        );

        let upload_ttl_minutes: u64 = parse_or(&get, "UPLOAD_URL_TTL_MINUTES", 5)?;
        if upload_ttl_minutes == 0 {
            return Err(ConfigError::Invalid("UPLOAD_URL_TTL_MINUTES"));
        }
        let upload_ttl_minutes = upload_ttl_minutes.min(MAX_UPLOAD_URL_TTL_MINUTES);

        let access_minutes: u64 = parse_or(&get, "ACCESS_TOKEN_TTL_MINUTES", 15)?;
        if access_minutes == 0 {
            return Err(ConfigError::Invalid("ACCESS_TOKEN_TTL_MINUTES"));
        }
        let refresh_days: u64 = parse_or(&get, "REFRESH_TOKEN_TTL_DAYS", 30)?;
        if refresh_days == 0 {
            return Err(ConfigError::Invalid("REFRESH_TOKEN_TTL_DAYS"));
        }

        let dev_seed = match (get("DEV_SEED_EMAIL"), get("DEV_SEED_PASSWORD")) {
            (Some(email), Some(password)) => Some(DevSeed {
                email,
                password: Zeroizing::new(password),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("DEV_SEED_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("DEV_SEED_EMAIL")),
        };

        Ok(Self {
            http_port: parse_or(&get, "HTTP_PORT", 9009)?,
            database_url: get("DATABASE_URL"),
            jwt_secret: Zeroizing::new(jwt_secret),
            access_token_ttl: Duration::from_secs(access_minutes * 60),
            refresh_token_ttl: Duration::from_secs(refresh_days * 24 * 60 * 60),
            cookie,
            storage: storage_config(&get)?,
            upload_url_ttl: Duration::from_secs(upload_ttl_minutes * 60),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 100 * 1024 * 1024)?,
            store_timeout: Duration::from_millis(parse_or(&get, "STORE_TIMEOUT_MS", 2000)?),
            storage_timeout: Duration::from_millis(parse_or(&get, "STORAGE_TIMEOUT_MS", 10_000)?),
            retry_max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 2)?,
            retry_base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 50)?),
            login_max_failures: parse_or(&get, "LOGIN_MAX_FAILURES", 5)?,
            login_lockout: Duration::from_secs(parse_or(&get, "LOGIN_LOCKOUT_SECS", 900)?),
            password_hash: PasswordHashConfig {
                memory_kib: parse_or(&get, "ARGON2_MEMORY_KIB", 19_456)?,
                iterations: parse_or(&get, "ARGON2_ITERATIONS", 2)?,
                parallelism: parse_or(&get, "ARGON2_PARALLELISM", 1)?,
            },
            cors_allowed_origin: get("CORS_ALLOWED_ORIGIN"),
            dev_seed,
        })
    }
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

fn storage_config<G>(get: &G) -> Result<StorageConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let bucket = get("STORAGE_BUCKET").unwrap_or_else(|| "docvault-documents".to_string());
    let region = get("STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let Some(endpoint) = get("STORAGE_ENDPOINT") else {
        return Ok(StorageConfig {
            endpoint: None,
            bucket,
            region,
            access_key_id: "local".to_string(),
            secret_access_key: Zeroizing::new("local-development-secret".to_string()),
        });
    };

    let endpoint = Url::parse(&endpoint).map_err(|_| ConfigError::Invalid("STORAGE_ENDPOINT"))?;
    if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
        return Err(ConfigError::Invalid("STORAGE_ENDPOINT"));
    }

    Ok(StorageConfig {
        endpoint: Some(endpoint),
        bucket,
        region,
        access_key_id: get("STORAGE_ACCESS_KEY_ID")
            .ok_or(ConfigError::Missing("STORAGE_ACCESS_KEY_ID"))?,
        secret_access_key: Zeroizing::new(
            get("STORAGE_SECRET_ACCESS_KEY")
                .ok_or(ConfigError::Missing("STORAGE_SECRET_ACCESS_KEY"))?,
        ),
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
