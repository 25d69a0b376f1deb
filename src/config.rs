use std::net::SocketAddr;
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::dispatch::DispatchSettings;

/// Server configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub process_cache_ttl: Duration,
    pub shared_cache_ttl: Duration,
    pub max_workers: usize,
    pub dependency_timeout: Duration,
    pub dispatch_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    /// DATABASE_URL defaults to "sqlite://fanout.db"
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://fanout.db".to_string());

        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("LISTEN_ADDR", "must be a valid socket address"))?;

        let process_cache_ttl = Duration::from_secs(number(&lookup, "PROCESS_CACHE_TTL_SECS", 10)?);
        let shared_cache_ttl = Duration::from_secs(number(&lookup, "SHARED_CACHE_TTL_SECS", 30)?);
        if process_cache_ttl > shared_cache_ttl {
            return Err(ConfigError::Invalid(
                "PROCESS_CACHE_TTL_SECS",
                "must not exceed SHARED_CACHE_TTL_SECS",
            ));
        }

        let max_workers = number(&lookup, "MAX_WORKERS", 20)? as usize;
        if max_workers == 0 {
            return Err(ConfigError::Invalid("MAX_WORKERS", "must be at least 1"));
        }

        let dependency_timeout = Duration::from_millis(number(&lookup, "DEPENDENCY_TIMEOUT_MS", 2000)?);
        let dispatch_timeout = Duration::from_millis(number(&lookup, "DISPATCH_TIMEOUT_MS", 10_000)?);

        Ok(Config {
            listen_addr,
            database_url,
            process_cache_ttl,
            shared_cache_ttl,
            max_workers,
            dependency_timeout,
            dispatch_timeout,
        })
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            process_ttl: self.process_cache_ttl,
            shared_ttl: self.shared_cache_ttl,
            call_timeout: self.dependency_timeout,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_workers: self.max_workers,
            enqueue_timeout: self.dependency_timeout,
            deadline: self.dispatch_timeout,
        }
    }
}

fn number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer")),
        None => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(var, msg) => write!(f, "Invalid value for {}: {}", var, msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.database_url, "sqlite://fanout.db");
        assert_eq!(config.process_cache_ttl, Duration::from_secs(10));
        assert_eq!(config.shared_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.max_workers, 20);
        assert_eq!(config.dependency_timeout, Duration::from_secs(2));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_flow_into_settings() {
        let config = load(&[
            ("PROCESS_CACHE_TTL_SECS", "5"),
            ("SHARED_CACHE_TTL_SECS", "60"),
            ("MAX_WORKERS", "8"),
            ("DEPENDENCY_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        let cache = config.cache_settings();
        assert_eq!(cache.process_ttl, Duration::from_secs(5));
        assert_eq!(cache.shared_ttl, Duration::from_secs(60));
        assert_eq!(cache.call_timeout, Duration::from_millis(250));
        assert_eq!(config.dispatch_settings().max_workers, 8);
    }

    #[test]
    fn test_process_ttl_may_not_exceed_shared_ttl() {
        let err = load(&[("PROCESS_CACHE_TTL_SECS", "31")]).unwrap_err();
        assert!(err.to_string().contains("PROCESS_CACHE_TTL_SECS"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("LISTEN_ADDR", "nowhere")]).is_err());
        assert!(load(&[("MAX_WORKERS", "0")]).is_err());
        assert!(load(&[("MAX_WORKERS", "-3")]).is_err());
        assert!(load(&[("DISPATCH_TIMEOUT_MS", "soon")]).is_err());
    }
}
