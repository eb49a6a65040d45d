//! Configuration from environment variables
//!
//! Everything is read once at startup. Defaults match a local development
//! setup (registry on localhost, upstream on port 3001); production deploys
//! override via the environment.

use common::Secret;

/// Root configuration
#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
}

/// Runtime mode, selects log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Production,
    Development,
}

impl ServerMode {
    fn parse(value: &str) -> Self {
        if value == "production" {
            ServerMode::Production
        } else {
            ServerMode::Development
        }
    }
}

/// HTTP listener settings
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub mode: ServerMode,
}

/// Account registry (Redis) connection settings
#[derive(Debug)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    pub password: Secret,
    pub db: u32,
}

impl RegistryConfig {
    /// Connection URL for the registry client. Carries the password, so the
    /// result must never be logged.
    pub fn connection_url(&self) -> String {
        if self.password.is_set() {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password.expose(),
                self.host,
                self.port,
                self.db
            )
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        }
    }
}

/// Upstream forwarding settings
#[derive(Debug)]
pub struct ProxyConfig {
    pub target_url: String,
    pub timeout_secs: u64,
    pub max_connections: usize,
}

/// Static API-key admission settings.
///
/// Disabled by default; with no keys configured the middleware admits
/// everything even when enabled.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<String>,
    pub prefix: String,
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> common::Result<T> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| common::Error::Config(format!("{key} is not a valid number: {value}"))),
        _ => Ok(default),
    }
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> common::Result<Self> {
        let config = Self {
            server: ServerConfig {
                port: env_parse("PORT", 8080)?,
                mode: ServerMode::parse(&env_or("SERVER_MODE", "development")),
            },
            registry: RegistryConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_parse("REDIS_PORT", 6379)?,
                password: Secret::new(env_or("REDIS_PASSWORD", "")),
                db: env_parse("REDIS_DB", 0)?,
            },
            proxy: ProxyConfig {
                target_url: env_or("TARGET_URL", "http://localhost:3001"),
                timeout_secs: env_parse("PROXY_TIMEOUT", 300)?,
                max_connections: env_parse("MAX_CONNECTIONS", 1000)?,
            },
            auth: AuthConfig {
                enabled: env_or("MIDDLEWARE_AUTH_ENABLED", "") == "true",
                api_keys: env_or("MIDDLEWARE_API_KEYS", "")
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect(),
                prefix: env_or("MIDDLEWARE_API_KEY_PREFIX", "cr_"),
            },
        };

        // Catch a malformed upstream at startup rather than on first request.
        let url = reqwest::Url::parse(&config.proxy.target_url)
            .map_err(|e| common::Error::Config(format!("TARGET_URL is not a valid URL: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(common::Error::Config(format!(
                    "TARGET_URL must use http or https scheme, got: {scheme}"
                )));
            }
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "PROXY_TIMEOUT must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "MAX_CONNECTIONS must be greater than 0".into(),
            ));
        }

        Ok(config)
    }
}
