//! Service settings shared by the binaries, and the CORS policy both services apply.

use std::{fmt, net::SocketAddr, path::PathBuf, time::Duration};

use reqwest::Url;
use sqlx::mysql::MySqlConnectOptions;

use crate::rate_limit::RateLimitConfig;

pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_AUTH_SERVICE_URL: &str = "http://localhost:8080";
pub const DEFAULT_AUTH_DB_PATH: &str = "/data/auth.db";

const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "OPTIONS"];
const ALLOWED_HEADERS: [&str; 2] = ["content-type", "authorization"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CORS origin {0:?}: expected scheme://host[:port] or *")]
    InvalidOrigin(String),
    #[error("invalid auth service url {0:?}")]
    InvalidServiceUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Which browser origins may call a service. One policy type serves both services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    AnyOrigin,
    AllowList(Vec<String>),
}

impl Default for CorsPolicy {
    fn default() -> Self {
        CorsPolicy::AllowList(vec![DEFAULT_ALLOWED_ORIGIN.to_string()])
    }
}

impl CorsPolicy {
    /// Parse a comma separated origin list. A `*` entry allows every origin.
    pub fn parse(origins: &str) -> Result<Self, ConfigError> {
        let origins: Vec<&str> = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect();

        if origins.contains(&"*") {
            return Ok(CorsPolicy::AnyOrigin);
        }

        origins
            .into_iter()
            .map(normalize_origin)
            .collect::<Result<Vec<_>, _>>()
            .map(CorsPolicy::AllowList)
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::AnyOrigin => true,
            CorsPolicy::AllowList(origins) => origins.iter().any(|allowed| allowed == origin),
        }
    }

    pub fn to_warp(&self) -> warp::filters::cors::Builder {
        let builder = warp::cors()
            .allow_methods(ALLOWED_METHODS)
            .allow_headers(ALLOWED_HEADERS);

        match self {
            CorsPolicy::AnyOrigin => builder.allow_any_origin(),
            CorsPolicy::AllowList(origins) => {
                builder.allow_origins(origins.iter().map(String::as_str))
            }
        }
    }
}

// warp panics on origins it cannot parse, so everything is checked up front
fn normalize_origin(origin: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidOrigin(origin.to_string());
    let url = Url::parse(origin).map_err(|_| invalid())?;

    let plain = matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some()
        && url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none()
        && url.username().is_empty();

    if !plain {
        return Err(invalid());
    }

    Ok(origin.trim_end_matches('/').to_string())
}

#[derive(Debug, Clone)]
pub struct AuthServiceSettings {
    pub listen: SocketAddr,
    pub jwt_secret: Option<String>,
    pub cors: CorsPolicy,
    pub trust_forwarded_headers: bool,
    pub rate_limit: RateLimitConfig,
    /// SQLite file holding the accounts.
    pub database_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TasksServiceSettings {
    pub listen: SocketAddr,
    pub cors: CorsPolicy,
    pub auth_service_url: Url,
    pub verify_timeout: Duration,
    /// Zero disables the verification cache.
    pub verify_cache_ttl: Duration,
    pub database: MySqlSettings,
}

/// Where the tasks service keeps its records.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl MySqlSettings {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name);

        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

impl fmt::Display for MySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mysql://{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}

// never print the password
impl fmt::Debug for MySqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

pub fn parse_service_url(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url).map_err(|_| ConfigError::InvalidServiceUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
        return Err(ConfigError::InvalidServiceUrl(url.to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_password_is_never_printed() {
        let settings = MySqlSettings {
            host: "db".into(),
            port: 3306,
            user: "tasks".into(),
            password: "hunter22".into(),
            name: "task_manager".into(),
        };

        assert_eq!(settings.to_string(), "mysql://tasks@db:3306/task_manager");
        assert!(!format!("{settings:?}").contains("hunter22"));
    }

    #[test]
    fn parses_allow_list() {
        let policy = CorsPolicy::parse("http://localhost:3000, https://app.example.com/").unwrap();
        assert_eq!(
            policy,
            CorsPolicy::AllowList(vec![
                "http://localhost:3000".to_string(),
                "https://app.example.com".to_string()
            ])
        );
        assert!(policy.allows("https://app.example.com"));
        assert!(!policy.allows("https://evil.example.com"));
    }

    #[test]
    fn star_allows_everything() {
        let policy = CorsPolicy::parse("http://localhost:3000,*").unwrap();
        assert_eq!(policy, CorsPolicy::AnyOrigin);
        assert!(policy.allows("https://anything.example"));
    }

    #[test]
    fn rejects_origins_warp_cannot_use() {
        for origin in [
            "localhost:3000",
            "ftp://files.example.com",
            "http://example.com/app",
            "http://example.com?x=1",
            "not an origin",
        ] {
            assert_eq!(
                CorsPolicy::parse(origin),
                Err(ConfigError::InvalidOrigin(origin.to_string())),
                "{origin}"
            );
        }
    }

    #[test]
    fn service_url_must_be_http() {
        assert!(parse_service_url("http://auth:8080").is_ok());
        assert!(parse_service_url("auth:8080").is_err());
        assert!(parse_service_url("mailto:ops@example.com").is_err());
    }
}
