//! Environment-backed configuration.
//!
//! Every option has a documented default so the service starts with an
//! empty environment. Recognized variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `WALLETFUND_LISTEN` | `127.0.0.1:8080` |
//! | `WALLETFUND_SCAN_QUEUE` | `scan` |
//! | `WALLETFUND_SEND_QUEUE` | `send` |
//! | `WALLETFUND_COMPLETE_QUEUE` | `complete` |
//! | `WALLETFUND_DEAD_LETTER_QUEUE` | `scan.dead-letter` |
//! | `WALLETFUND_HEADER_URL` | `http://127.0.0.1:8070/block` |
//! | `WALLETFUND_SYNC_URL` | `http://127.0.0.1:8070/sync` |
//! | `WALLETFUND_MAX_SCAN_BLOCKS` | `100` |
//! | `WALLETFUND_CONFIRMATIONS_REQUIRED` | `10` |
//! | `WALLETFUND_WORKERS` | available parallelism |
//! | `WALLETFUND_PRIVATE_BUS_HOST` | `localhost` |
//! | `WALLETFUND_PRIVATE_BUS_USERNAME` | `guest` |
//! | `WALLETFUND_PRIVATE_BUS_PASSWORD` | `guest` |
//! | `WALLETFUND_PUBLIC_BUS_HOST` | `localhost` |
//! | `WALLETFUND_PUBLIC_BUS_USERNAME` | `guest` |
//! | `WALLETFUND_PUBLIC_BUS_PASSWORD` | `guest` |

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use walletfund_core::policy::ScanPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Connection parameters for one broker cluster.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub scan_queue: String,
    pub send_queue: String,
    pub complete_queue: String,
    pub dead_letter_queue: String,
    pub header_url: String,
    pub sync_url: String,
    pub maximum_scan_blocks: u64,
    pub confirmations_required: u64,
    pub workers: usize,
    pub private_bus: BusConfig,
    pub public_bus: BusConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (the seam the tests use).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default_workers = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);

        Ok(Self {
            listen: parse(&lookup, "WALLETFUND_LISTEN", "127.0.0.1:8080")?,
            scan_queue: string(&lookup, "WALLETFUND_SCAN_QUEUE", "scan"),
            send_queue: string(&lookup, "WALLETFUND_SEND_QUEUE", "send"),
            complete_queue: string(&lookup, "WALLETFUND_COMPLETE_QUEUE", "complete"),
            dead_letter_queue: string(&lookup, "WALLETFUND_DEAD_LETTER_QUEUE", "scan.dead-letter"),
            header_url: string(
                &lookup,
                "WALLETFUND_HEADER_URL",
                "http://127.0.0.1:8070/block",
            ),
            sync_url: string(&lookup, "WALLETFUND_SYNC_URL", "http://127.0.0.1:8070/sync"),
            maximum_scan_blocks: parse(&lookup, "WALLETFUND_MAX_SCAN_BLOCKS", "100")?,
            confirmations_required: parse(&lookup, "WALLETFUND_CONFIRMATIONS_REQUIRED", "10")?,
            workers: parse(
                &lookup,
                "WALLETFUND_WORKERS",
                &default_workers.to_string(),
            )?,
            private_bus: bus(&lookup, "WALLETFUND_PRIVATE_BUS"),
            public_bus: bus(&lookup, "WALLETFUND_PUBLIC_BUS"),
        })
    }

    pub fn policy(&self) -> ScanPolicy {
        ScanPolicy {
            confirmations_required: self.confirmations_required,
            maximum_scan_blocks: self.maximum_scan_blocks,
        }
    }
}

fn string(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: &str) -> String {
    lookup(var).unwrap_or_else(|| default.to_string())
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(var)
        .unwrap_or_else(|| default.to_string())
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        })
}

fn bus(lookup: &impl Fn(&str) -> Option<String>, prefix: &str) -> BusConfig {
    let var = |suffix: &str, default: &str| {
        lookup(&format!("{prefix}_{suffix}")).unwrap_or_else(|| default.to_string())
    };
    BusConfig {
        host: var("HOST", "localhost"),
        username: var("USERNAME", "guest"),
        password: var("PASSWORD", "guest"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_with_an_empty_environment() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.scan_queue, "scan");
        assert_eq!(config.send_queue, "send");
        assert_eq!(config.complete_queue, "complete");
        assert_eq!(config.dead_letter_queue, "scan.dead-letter");
        assert_eq!(config.maximum_scan_blocks, 100);
        assert_eq!(config.confirmations_required, 10);
        assert!(config.workers >= 1);
        assert_eq!(config.private_bus.host, "localhost");
        assert_eq!(config.public_bus.username, "guest");
    }

    #[test]
    fn environment_overrides_are_honored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WALLETFUND_LISTEN", "0.0.0.0:9000"),
            ("WALLETFUND_SCAN_QUEUE", "scan.v2"),
            ("WALLETFUND_CONFIRMATIONS_REQUIRED", "30"),
            ("WALLETFUND_WORKERS", "4"),
            ("WALLETFUND_PRIVATE_BUS_HOST", "mq.internal"),
            ("WALLETFUND_PUBLIC_BUS_PASSWORD", "hunter2"),
        ]);
        let config = Config::from_lookup(|var| env.get(var).map(|v| v.to_string())).unwrap();

        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.scan_queue, "scan.v2");
        assert_eq!(config.confirmations_required, 30);
        assert_eq!(config.workers, 4);
        assert_eq!(config.private_bus.host, "mq.internal");
        assert_eq!(config.public_bus.host, "localhost");
        assert_eq!(config.public_bus.password, "hunter2");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let result = Config::from_lookup(|var| {
            (var == "WALLETFUND_MAX_SCAN_BLOCKS").then(|| "lots".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                var: "WALLETFUND_MAX_SCAN_BLOCKS",
                ..
            })
        ));
    }

    #[test]
    fn policy_mirrors_the_scan_tuning() {
        let config = Config::from_lookup(|_| None).unwrap();
        let policy = config.policy();
        assert_eq!(policy.confirmations_required, 10);
        assert_eq!(policy.maximum_scan_blocks, 100);
    }
}
