// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, etc.) may still read their own
// env vars — this module covers the core server settings.

use std::net::SocketAddr;

const DEV_JWT_SECRET: &str = "studia_local_development_jwt_secret_must_be_32_chars";

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Shared secret for verifying identity-provider access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `studia_server=debug`).
    pub log_filter: String,
    /// External object store base URL for file uploads.
    pub object_store_url: Option<String>,
    /// Base URL embedded in group invite links.
    pub invite_link_base_url: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `STUDIA_SERVER_HOST` | `0.0.0.0` |
    /// | `STUDIA_SERVER_PORT` | `8080` |
    /// | `STUDIA_SERVER_JWT_SECRET` | dev-only placeholder |
    /// | `STUDIA_SERVER_DATABASE_URL` | *(none)* |
    /// | `STUDIA_SERVER_CORS_ORIGINS` | *(none — dev defaults)* |
    /// | `STUDIA_SERVER_LOG_FILTER` | `info` |
    /// | `STUDIA_SERVER_OBJECT_STORE_URL` | *(none — memory store)* |
    /// | `STUDIA_SERVER_INVITE_LINK_BASE_URL` | `http://localhost:3000/join` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("STUDIA_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("STUDIA_SERVER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("STUDIA_SERVER_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("STUDIA_SERVER_DATABASE_URL").ok();
        let cors_origins = env("STUDIA_SERVER_CORS_ORIGINS").ok();

        let log_filter = env("STUDIA_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let object_store_url = env("STUDIA_SERVER_OBJECT_STORE_URL").ok();

        let invite_link_base_url = env("STUDIA_SERVER_INVITE_LINK_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/join".into());

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            object_store_url,
            invite_link_base_url,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from_map(map: HashMap<&'static str, &'static str>) -> ServerConfig {
        ServerConfig::from_env_fn(move |key| {
            map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
        })
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = env_from_map(HashMap::new());
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.is_dev_jwt_secret());
        assert!(config.database_url.is_none());
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.invite_link_base_url, "http://localhost:3000/join");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = env_from_map(HashMap::from([
            ("STUDIA_SERVER_HOST", "127.0.0.1"),
            ("STUDIA_SERVER_PORT", "9100"),
            ("STUDIA_SERVER_JWT_SECRET", "an_explicit_secret_that_is_long_enough!!"),
            ("STUDIA_SERVER_DATABASE_URL", "postgres://localhost/studia?sslmode=require"),
        ]));

        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9100");
        assert!(!config.is_dev_jwt_secret());
        assert!(config.database_url.is_some());
    }

    #[test]
    fn malformed_port_falls_back_to_default() {
        let config = env_from_map(HashMap::from([("STUDIA_SERVER_PORT", "not-a-port")]));
        assert_eq!(config.listen_addr.port(), 8080);
    }
}
