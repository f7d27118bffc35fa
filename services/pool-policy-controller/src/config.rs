use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fma_reconcile::DEFAULT_RESYNC_INTERVAL;

use crate::factory::ImageConfig;

/// Default number of concurrent reconcile workers.
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; `None` watches all namespaces.
    pub watch_namespace: Option<String>,
    pub resync_interval: Duration,
    pub workers: usize,
    pub health_addr: SocketAddr,
    pub log_level: String,
    pub images: ImageConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let watch_namespace = non_empty("FMA_WATCH_NAMESPACE");

        let resync_interval = match non_empty("FMA_RESYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid FMA_RESYNC_INTERVAL_SECS: {raw}"))?;
                if secs == 0 {
                    bail!("FMA_RESYNC_INTERVAL_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_RESYNC_INTERVAL,
        };

        let workers = match non_empty("FMA_WORKERS") {
            Some(raw) => {
                let workers: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid FMA_WORKERS: {raw}"))?;
                if workers == 0 {
                    bail!("FMA_WORKERS must be at least 1");
                }
                workers
            }
            None => DEFAULT_WORKERS,
        };

        let health_addr = non_empty("FMA_HEALTH_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string())
            .parse()
            .context("invalid FMA_HEALTH_ADDR")?;

        let log_level = non_empty("FMA_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let images = ImageConfig {
            explicit_image: non_empty("LAUNCHER_IMAGE"),
            registry: non_empty("CONTAINER_IMG_REG"),
            repository: non_empty("LAUNCHER_IMG_REPO"),
            tag: non_empty("LAUNCHER_IMG_TAG"),
        };

        Ok(Self {
            watch_namespace,
            resync_interval,
            workers,
            health_addr,
            log_level,
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.health_addr, "0.0.0.0:8081".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.images.resolve(), None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("FMA_WATCH_NAMESPACE", "inference"),
            ("FMA_RESYNC_INTERVAL_SECS", "5"),
            ("FMA_WORKERS", "4"),
            ("FMA_HEALTH_ADDR", "127.0.0.1:9000"),
            ("CONTAINER_IMG_REG", "ghcr.io/llm-d"),
            ("LAUNCHER_IMG_REPO", "launcher"),
            ("LAUNCHER_IMG_TAG", "v1"),
        ])
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("inference"));
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert_eq!(config.workers, 4);
        assert_eq!(config.health_addr.port(), 9000);
        assert_eq!(
            config.images.resolve().as_deref(),
            Some("ghcr.io/llm-d/launcher:v1")
        );
    }

    #[test]
    fn test_empty_namespace_watches_all() {
        let config = config(&[("FMA_WATCH_NAMESPACE", "  ")]).unwrap();
        assert_eq!(config.watch_namespace, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("FMA_WORKERS", "0")]).is_err());
        assert!(config(&[("FMA_WORKERS", "many")]).is_err());
        assert!(config(&[("FMA_RESYNC_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("FMA_HEALTH_ADDR", "not-an-addr")]).is_err());
    }
}
