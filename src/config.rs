use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Connection parameters split into separate variables, the way older
/// deployments configure the database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub enum DatabaseTarget {
    Url(String),
    Parts(DatabaseOptions),
}

/// Process-wide configuration, loaded once at startup and never re-read.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseTarget,
    /// Scope a presented token must carry to use the management API.
    pub admin_scope: String,
    /// Deadline for a single request; an expired request rolls back.
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    get(key).with_context(|| format!("environment variable '{}' not set", key))
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("environment variable '{}' is not a valid number: {}", key, raw)),
        None => Ok(default),
    }
}

fn database_target(get: &impl Fn(&str) -> Option<String>) -> anyhow::Result<DatabaseTarget> {
    if let Some(url) = get("DATABASE_URL") {
        return Ok(DatabaseTarget::Url(url));
    }

    if get("DATABASE_HOST").is_some() {
        return Ok(DatabaseTarget::Parts(DatabaseOptions {
            host: required(get, "DATABASE_HOST")?,
            port: parse_var(get, "DATABASE_PORT", 5432)?,
            database: required(get, "DATABASE_DATABASE")?,
            user: required(get, "DATABASE_USER")?,
            password: required(get, "DATABASE_PASSWORD")?,
        }));
    }

    Ok(DatabaseTarget::Url("postgres://localhost/creds".into()))
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Build the full server configuration from a variable lookup.
/// `ADMIN_SCOPE` is required and must not be blank.
pub fn load_from(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let admin_scope = required(&get, "ADMIN_SCOPE")?;
    if admin_scope.trim().is_empty() {
        anyhow::bail!("ADMIN_SCOPE must not be empty");
    }

    Ok(Config {
        port: parse_var(&get, "PORT", 8080)?,
        database: database_target(&get)?,
        admin_scope,
        request_timeout_secs: parse_var(&get, "REQUEST_TIMEOUT_SECS", 30)?,
    })
}

/// Resolve only the database target. Used by commands that never touch
/// the admin scope, such as `migrate`.
pub fn database_from(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<DatabaseTarget> {
    database_target(&get)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    load_from(env_var)
}

pub fn load_database() -> anyhow::Result<DatabaseTarget> {
    dotenvy::dotenv().ok();
    database_from(env_var)
}
