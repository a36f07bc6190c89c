//! Command line and environment configuration for the two binaries.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::{
    config::{
        parse_service_url, AuthServiceSettings, ConfigError, CorsPolicy, MySqlSettings,
        TasksServiceSettings, DEFAULT_ALLOWED_ORIGIN, DEFAULT_AUTH_DB_PATH,
        DEFAULT_AUTH_SERVICE_URL,
    },
    rate_limit::{RateLimitConfig, DEFAULT_MAX_SOURCES},
};

#[must_use]
pub fn auth_command() -> Command {
    let command = Command::new("auth-service")
        .about("Issues and verifies identity tokens")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Secret used to sign identity tokens")
                .env("JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("trust-forwarded-headers")
                .long("trust-forwarded-headers")
                .help("Identify clients by X-Forwarded-For / X-Real-IP (only behind a trusted proxy)")
                .env("TRUST_FORWARDED_HEADERS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("rate-limit-attempts")
                .long("rate-limit-attempts")
                .help("Register/login attempts allowed per client within the window")
                .env("RATE_LIMIT_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("rate-limit-window")
                .long("rate-limit-window")
                .help("Rate limit window in seconds")
                .env("RATE_LIMIT_WINDOW_SECS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("database-path")
                .long("database-path")
                .help("SQLite file holding the accounts, created if missing")
                .env("AUTH_DB_PATH")
                .default_value(DEFAULT_AUTH_DB_PATH)
                .value_parser(clap::value_parser!(PathBuf)),
        );

    with_common_args(command, "8080", "AUTH_PORT")
}

#[must_use]
pub fn tasks_command() -> Command {
    let command = Command::new("tasks-service")
        .about("Per-user task records, authorized by the auth service")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("auth-service-url")
                .long("auth-service-url")
                .help("Base URL of the auth service")
                .env("AUTH_SERVICE_URL")
                .default_value(DEFAULT_AUTH_SERVICE_URL),
        )
        .arg(
            Arg::new("verify-timeout")
                .long("verify-timeout")
                .help("Timeout in seconds for token verification calls")
                .env("VERIFY_TIMEOUT_SECS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verify-cache-ttl")
                .long("verify-cache-ttl")
                .help("Seconds a successful verification is reused, 0 disables caching")
                .env("VERIFY_CACHE_TTL_SECS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("db-host")
                .long("db-host")
                .help("MySQL host")
                .env("DB_HOST")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("db-port")
                .long("db-port")
                .help("MySQL port")
                .env("DB_PORT")
                .default_value("3306")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("db-user")
                .long("db-user")
                .help("MySQL user")
                .env("DB_USER")
                .default_value("root"),
        )
        .arg(
            Arg::new("db-password")
                .long("db-password")
                .help("MySQL password")
                .env("DB_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("db-name")
                .long("db-name")
                .help("MySQL database name")
                .env("DB_NAME")
                .default_value("task_manager"),
        );

    with_common_args(command, "8082", "TASKS_PORT")
}

fn with_common_args(command: Command, default_port: &'static str, port_env: &'static str) -> Command {
    command
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value(default_port)
                .env(port_env)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("allowed-origins")
                .long("allowed-origins")
                .help("Comma separated CORS origins, * allows any")
                .env("CORS_ALLOWED_ORIGINS")
                .default_value(DEFAULT_ALLOWED_ORIGIN),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity, repeat for more")
                .action(ArgAction::Count),
        )
}

pub fn verbosity(matches: &ArgMatches) -> u8 {
    matches.get_count("verbose")
}

/// # Errors
/// Returns an error if an argument is out of range or malformed.
pub fn auth_settings(matches: &ArgMatches) -> Result<AuthServiceSettings> {
    let max_attempts = positive(matches, "rate-limit-attempts")?;
    let window = positive::<u64>(matches, "rate-limit-window")?;

    Ok(AuthServiceSettings {
        listen: listen_addr(matches),
        jwt_secret: matches.get_one::<String>("jwt-secret").cloned(),
        cors: cors_policy(matches)?,
        trust_forwarded_headers: matches.get_flag("trust-forwarded-headers"),
        rate_limit: RateLimitConfig {
            max_attempts,
            window: Duration::from_secs(window),
            max_sources: DEFAULT_MAX_SOURCES,
        },
        database_path: matches
            .get_one::<PathBuf>("database-path")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUTH_DB_PATH)),
    })
}

/// # Errors
/// Returns an error if the auth service URL or a duration is invalid.
pub fn tasks_settings(matches: &ArgMatches) -> Result<TasksServiceSettings> {
    let auth_service_url = matches
        .get_one::<String>("auth-service-url")
        .context("missing required argument: --auth-service-url")?;

    Ok(TasksServiceSettings {
        listen: listen_addr(matches),
        cors: cors_policy(matches)?,
        auth_service_url: parse_service_url(auth_service_url)?,
        verify_timeout: Duration::from_secs(positive(matches, "verify-timeout")?),
        verify_cache_ttl: Duration::from_secs(
            matches.get_one::<u64>("verify-cache-ttl").copied().unwrap_or(0),
        ),
        database: mysql_settings(matches),
    })
}

fn mysql_settings(matches: &ArgMatches) -> MySqlSettings {
    let text = |name: &str| {
        matches
            .get_one::<String>(name)
            .cloned()
            .unwrap_or_default()
    };

    MySqlSettings {
        host: text("db-host"),
        port: matches.get_one::<u16>("db-port").copied().unwrap_or(3306),
        user: text("db-user"),
        password: text("db-password"),
        name: text("db-name"),
    }
}

fn listen_addr(matches: &ArgMatches) -> SocketAddr {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(0);
    SocketAddr::from(([0, 0, 0, 0], port))
}

fn cors_policy(matches: &ArgMatches) -> Result<CorsPolicy> {
    let origins = matches
        .get_one::<String>("allowed-origins")
        .map(String::as_str)
        .unwrap_or(DEFAULT_ALLOWED_ORIGIN);
    Ok(CorsPolicy::parse(origins)?)
}

fn positive<T>(matches: &ArgMatches, name: &'static str) -> Result<T>
where
    T: Copy + Default + PartialEq + Send + Sync + 'static,
{
    match matches.get_one::<T>(name).copied() {
        Some(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::Zero(name).into()),
    }
}
