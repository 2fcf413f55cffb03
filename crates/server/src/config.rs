// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own sizing variables in db::pool.

use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::origin::AllowedOrigins;
use crate::auth::session::DEFAULT_SESSION_COOKIE_NAME;
use crate::lock::{DEFAULT_LEASE_TTL, DEFAULT_SWEEP_INTERVAL};

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string. Without it the server refuses to start.
    pub database_url: Option<String>,
    /// Log filter directive (e.g. `info`, `notee_server=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
    /// Name of the cookie carrying the session token.
    pub session_cookie_name: String,
    /// Origins allowed to call the editor-authority routes. Empty rejects
    /// every request that carries an `Origin` header.
    pub allowed_origins: AllowedOrigins,
    /// Lifetime of a freshly acquired lease.
    pub lock_ttl: Duration,
    /// Period of the expired-lease sweeper.
    pub lock_sweep_interval: Duration,
    pub skip_migrations: bool,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `NOTEE_HOST` | `0.0.0.0` |
    /// | `NOTEE_PORT` | `3000` |
    /// | `NOTEE_DATABASE_URL` | *(none)* |
    /// | `NOTEE_LOG_FILTER` | `info` |
    /// | `NOTEE_LOG_JSON` | `false` |
    /// | `NOTEE_SESSION_COOKIE_NAME` | `notee-session` |
    /// | `NOTEE_ALLOWED_ORIGINS` | *(none)*, comma-separated |
    /// | `NOTEE_LOCK_TTL_SECS` | `300` |
    /// | `NOTEE_LOCK_SWEEP_INTERVAL_SECS` | `5` |
    /// | `NOTEE_SKIP_MIGRATIONS` | `false` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("NOTEE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("NOTEE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("NOTEE_DATABASE_URL").ok();
        let log_filter = env("NOTEE_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("NOTEE_LOG_JSON").ok().is_some_and(|v| parse_flag(&v));

        let session_cookie_name = env("NOTEE_SESSION_COOKIE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE_NAME.into());

        let allowed_origins = env("NOTEE_ALLOWED_ORIGINS")
            .map(|v| AllowedOrigins::parse(&v))
            .unwrap_or_default();

        let lock_ttl = env("NOTEE_LOCK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LEASE_TTL);
        let lock_sweep_interval = env("NOTEE_LOCK_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL);

        let skip_migrations = env("NOTEE_SKIP_MIGRATIONS").ok().is_some_and(|v| parse_flag(&v));

        Self {
            listen_addr,
            database_url,
            log_filter,
            log_json,
            session_cookie_name,
            allowed_origins,
            lock_ttl,
            lock_sweep_interval,
            skip_migrations,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 3000);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert!(!cfg.log_json);
        assert_eq!(cfg.session_cookie_name, "notee-session");
        assert!(cfg.allowed_origins.is_empty());
        assert_eq!(cfg.lock_ttl, Duration::from_secs(300));
        assert_eq!(cfg.lock_sweep_interval, Duration::from_secs(5));
        assert!(!cfg.skip_migrations);
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("NOTEE_HOST", "127.0.0.1");
        m.insert("NOTEE_PORT", "8088");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8088");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("NOTEE_PORT", "not_a_number");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 3000);
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("NOTEE_DATABASE_URL", "postgres://u:p@host/notee?sslmode=require");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/notee?sslmode=require"));
    }

    #[test]
    fn log_settings_override() {
        let mut m = HashMap::new();
        m.insert("NOTEE_LOG_FILTER", "debug,sqlx=warn");
        m.insert("NOTEE_LOG_JSON", "TRUE");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,sqlx=warn");
        assert!(cfg.log_json);
    }

    #[test]
    fn lock_timings_override() {
        let mut m = HashMap::new();
        m.insert("NOTEE_LOCK_TTL_SECS", "60");
        m.insert("NOTEE_LOCK_SWEEP_INTERVAL_SECS", "1");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.lock_ttl, Duration::from_secs(60));
        assert_eq!(cfg.lock_sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn zero_lock_timings_fall_back_to_defaults() {
        let mut m = HashMap::new();
        m.insert("NOTEE_LOCK_TTL_SECS", "0");
        m.insert("NOTEE_LOCK_SWEEP_INTERVAL_SECS", "0");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.lock_ttl, DEFAULT_LEASE_TTL);
        assert_eq!(cfg.lock_sweep_interval, DEFAULT_SWEEP_INTERVAL);
    }

    #[test]
    fn blank_cookie_name_uses_default() {
        let mut m = HashMap::new();
        m.insert("NOTEE_SESSION_COOKIE_NAME", "  ");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.session_cookie_name, "notee-session");
    }

    #[test]
    fn allowed_origins_from_env() {
        let mut m = HashMap::new();
        m.insert("NOTEE_ALLOWED_ORIGINS", "https://notee.app, http://localhost:5173");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(
            cfg.allowed_origins,
            AllowedOrigins::parse("https://notee.app,http://localhost:5173")
        );
        assert!(cfg.allowed_origins.allows(&"http://localhost:5173".parse().expect("header")));
    }

    #[test]
    fn skip_migrations_flag() {
        let mut m = HashMap::new();
        m.insert("NOTEE_SKIP_MIGRATIONS", "1");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert!(cfg.skip_migrations);
    }
}
