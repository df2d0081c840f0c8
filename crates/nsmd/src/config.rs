//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Operational parameters for the manager daemon. Every flag can also come
/// from the environment, which is how the container deployments set them.
#[derive(Parser, Debug, Clone)]
#[command(name = "nsmd", about = "Network service mesh manager daemon")]
pub struct Config {
    /// Component name recorded in connection path segments.
    #[arg(long, env = "NSM_NAME", default_value = "nsmgr")]
    pub name: String,

    /// Base directory for memif socket files.
    #[arg(
        long,
        env = "NSM_MEMIF_BASE_DIR",
        default_value = "/run/networkservicemesh"
    )]
    pub memif_base_dir: PathBuf,

    /// Lease duration granted to accepted connections, in seconds.
    #[arg(long, env = "NSM_LEASE_SECONDS", default_value_t = 120)]
    pub lease_seconds: u64,

    /// Delay between heal recovery passes, in seconds.
    #[arg(long, env = "NSM_RECOVERY_INTERVAL_SECONDS", default_value_t = 5)]
    pub recovery_interval_seconds: u64,

    /// JSON file with registered endpoints served by this manager.
    #[arg(long, env = "NSM_REGISTRY_FILE")]
    pub registry_file: Option<PathBuf>,
}

impl Config {
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_seconds)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_seconds as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["nsmd"]);
        assert_eq!(config.name, "nsmgr");
        assert_eq!(config.lease_seconds, 120);
        assert_eq!(config.recovery_interval_seconds, 5);
        assert!(config.registry_file.is_none());
    }

    #[test]
    fn test_flags_override() {
        let config = Config::parse_from([
            "nsmd",
            "--name",
            "nsmgr-worker1",
            "--lease-seconds",
            "30",
        ]);
        assert_eq!(config.name, "nsmgr-worker1");
        assert_eq!(config.lease(), chrono::Duration::seconds(30));
    }
}
