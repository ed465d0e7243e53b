//! Gateway configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use medsrv_services::ServiceConfig;
use medsrv_types::{PortRange, READY_ADDR_ENV};

/// How deep `get-working-dir-tree` descends by default
const DEFAULT_TREE_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Interface to listen on
    pub host: IpAddr,
    /// Ports tried in ascending order
    pub port_range: PortRange,
    /// Supervisor readiness listener; `None` when started by hand
    pub ready_addr: Option<SocketAddr>,
    pub tree_depth: usize,
    pub services: ServiceConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_range: PortRange::GATEWAY,
            ready_addr: None,
            tree_depth: DEFAULT_TREE_DEPTH,
            services: ServiceConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            services: ServiceConfig::from_env(),
            ..Self::default()
        };

        if let Ok(host) = std::env::var("MEDSRV_GATEWAY_HOST") {
            config.host = host
                .parse()
                .map_err(|e| anyhow::anyhow!("MEDSRV_GATEWAY_HOST '{host}' is not an IP address: {e}"))?;
        }

        let start = env_port("MEDSRV_GATEWAY_PORT_START")?.unwrap_or(config.port_range.start());
        let end = env_port("MEDSRV_GATEWAY_PORT_END")?.unwrap_or(config.port_range.end());
        config.port_range = PortRange::new(start, end)?;

        if let Ok(addr) = std::env::var(READY_ADDR_ENV) {
            config.ready_addr = Some(
                addr.parse()
                    .map_err(|e| anyhow::anyhow!("{READY_ADDR_ENV} '{addr}' is not a socket address: {e}"))?,
            );
        }

        if let Some(depth) = std::env::var("MEDSRV_TREE_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.tree_depth = depth;
        }

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.services.validate()?;
        if self.port_range.start() == 0 {
            anyhow::bail!("gateway port range must not include port 0");
        }
        Ok(())
    }
}

fn env_port(key: &str) -> anyhow::Result<Option<u16>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key} '{value}' is not a port: {e}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for key in [
            "MEDSRV_GATEWAY_HOST",
            "MEDSRV_GATEWAY_PORT_START",
            "MEDSRV_GATEWAY_PORT_END",
            READY_ADDR_ENV,
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_environment() {
        clear();
        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.port_range, PortRange::GATEWAY);
        assert!(config.ready_addr.is_none());
        assert!(config.host.is_loopback());
    }

    #[test]
    #[serial]
    fn reads_ready_address_and_range() {
        clear();
        std::env::set_var(READY_ADDR_ENV, "127.0.0.1:45001");
        std::env::set_var("MEDSRV_GATEWAY_PORT_START", "4000");
        std::env::set_var("MEDSRV_GATEWAY_PORT_END", "4010");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.ready_addr, Some("127.0.0.1:45001".parse().unwrap()));
        assert_eq!(config.port_range, PortRange::new(4000, 4010).unwrap());
        clear();
    }

    #[test]
    #[serial]
    fn inverted_range_is_an_error() {
        clear();
        std::env::set_var("MEDSRV_GATEWAY_PORT_START", "5000");
        std::env::set_var("MEDSRV_GATEWAY_PORT_END", "4000");
        assert!(GatewayConfig::from_env().is_err());
        clear();
    }
}
