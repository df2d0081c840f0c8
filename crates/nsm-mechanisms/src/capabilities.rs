//! Host capability detection for the kernel mechanism.
//!
//! The kernel stage picks its interface strategy once per process: when the
//! host exposes a vhost-net device the dataplane can drive a paired TAP
//! directly, otherwise traffic goes through a veth pair bridged in with an
//! af-packet interface.

use std::path::Path;

use once_cell::sync::Lazy;

/// How the kernel mechanism realizes an interface in the peer namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStrategy {
    /// Paired dataplane/kernel TAP, requires vhost-net.
    Tap,
    /// Linux veth pair with an af-packet uplink into the dataplane.
    VethPair,
}

/// Environment switch forcing the veth strategy even when vhost-net exists.
pub const ALLOW_VHOST_ENV: &str = "NSM_FORWARDER_ALLOW_VHOST";

const VHOST_NET_DEVICE: &str = "/dev/vhost-net";

/// Process-wide strategy, probed on first use.
static KERNEL_STRATEGY: Lazy<KernelStrategy> = Lazy::new(|| {
    let strategy = probe(Path::new(VHOST_NET_DEVICE));
    tracing::info!(?strategy, "kernel interface strategy selected");
    strategy
});

/// The strategy for this process. Stable after the first call.
pub fn kernel_strategy() -> KernelStrategy {
    *KERNEL_STRATEGY
}

/// Probes `device`, honoring the [`ALLOW_VHOST_ENV`] override.
pub fn probe(device: &Path) -> KernelStrategy {
    if let Ok(value) = std::env::var(ALLOW_VHOST_ENV) {
        if value.eq_ignore_ascii_case("false") {
            return KernelStrategy::VethPair;
        }
    }
    if device.exists() {
        KernelStrategy::Tap
    } else {
        KernelStrategy::VethPair
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_probe_missing_device_falls_back_to_veth() {
        std::env::remove_var(ALLOW_VHOST_ENV);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            probe(&dir.path().join("vhost-net")),
            KernelStrategy::VethPair
        );
    }

    #[test]
    #[serial]
    fn test_probe_present_device_selects_tap() {
        std::env::remove_var(ALLOW_VHOST_ENV);
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("vhost-net");
        std::fs::write(&device, b"").unwrap();
        assert_eq!(probe(&device), KernelStrategy::Tap);
    }

    #[test]
    #[serial]
    fn test_env_override_forces_veth() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("vhost-net");
        std::fs::write(&device, b"").unwrap();

        std::env::set_var(ALLOW_VHOST_ENV, "false");
        assert_eq!(probe(&device), KernelStrategy::VethPair);
        std::env::remove_var(ALLOW_VHOST_ENV);
    }
}
