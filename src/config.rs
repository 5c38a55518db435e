use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::rate_limit::RateLimitConfig;

const MIN_SECRET_LEN: usize = 32;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: String,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub neighborhoods_file: Option<PathBuf>,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // the secret itself is read by the auth module on each request
        let secret = get("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long");
        }

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(raw) => raw.parse().with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => 5,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".to_string()),
            data_dir: get("HOOD_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            database_url: get("DATABASE_URL"),
            db_max_connections,
            neighborhoods_file: get("HOOD_NEIGHBORHOODS").map(PathBuf::from),
            rate_limits: RateLimitConfig::from_lookup(&lookup),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.frontend_url, "http://localhost:5173");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.db_max_connections, 5);
        assert!(cfg.database_url.is_none());
        assert!(cfg.neighborhoods_file.is_none());
        assert_eq!(cfg.rate_limits, RateLimitConfig::default());
    }

    #[test]
    fn secret_is_required_and_long() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])).is_err());
    }

    #[test]
    fn overrides_are_read() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DB_MAX_CONNECTIONS", "12"),
            ("HOOD_DATA_DIR", "/var/lib/hood"),
            ("RL_FOLLOW_LIMIT", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.db_max_connections, 12);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/hood"));
        assert_eq!(cfg.rate_limits.follow_limit, 3);
    }

    #[test]
    fn bad_pool_size_is_an_error() {
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("DB_MAX_CONNECTIONS", "many")])).is_err());
    }
}
