//! Static structured configuration (spec §6, §10.3): router identity, an
//! optional OSPF config, and an optional BGP config with its peer list and
//! per-peer advanced-module flags. Loaded from TOML via `file::ServerConfigSpec`,
//! then lifted here into the in-memory `ServerConfig` with server-level
//! defaults applied to each peer.

mod file;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::ospf::types::NetworkType;

pub fn from_file(path: &str) -> Result<ServerConfig, ConfigError> {
    let spec = file::ServerConfigSpec::from_file(path)?;
    ServerConfig::from_spec(spec)
}

#[derive(Debug)]
pub struct ServerConfig {
    pub router_id: IpAddr,
    pub ospf: Option<OspfConfig>,
    pub bgp: Option<BgpConfig>,
}

#[derive(Debug, Clone)]
pub struct OspfConfig {
    pub area_id: Ipv4Addr,
    pub interface: String,
    pub source_address: Ipv4Addr,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub network_type: NetworkType,
    pub router_priority: u8,
    pub peer_address: Option<Ipv4Addr>,
}

#[derive(Debug)]
pub struct BgpConfig {
    pub local_as: u32,
    pub connect_retry_time: u16,
    pub route_reflector_cluster_id: Option<IpAddr>,
    pub networks: Vec<String>,
    pub peers: Vec<Arc<PeerConfig>>,
}

/// In-memory peer representation, with missing `PeerConfigSpec` fields
/// defaulted from the server-level config (a peer's `local_as` and
/// `local_router_id` fall back to the server's when omitted).
#[derive(Debug)]
pub struct PeerConfig {
    pub remote_ip: IpAddr,
    pub remote_as: u32,
    pub local_as: u32,
    pub local_router_id: IpAddr,
    pub enabled: bool,
    pub passive: bool,
    pub hold_timer: u16,
    pub dest_port: u16,
    pub route_reflector_client: bool,
    pub flap_damping: bool,
    pub rpki: bool,
    pub graceful_restart: bool,
    pub flowspec: bool,
}

impl PeerConfig {
    // Is this an eBGP session
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }
}

fn parse_network_type(value: &str) -> Result<NetworkType, ConfigError> {
    match value.to_lowercase().as_str() {
        "broadcast" => Ok(NetworkType::Broadcast),
        "point-to-point" | "p2p" => Ok(NetworkType::PointToPoint),
        "point-to-multipoint" | "p2mp" => Ok(NetworkType::PointToMultipoint),
        "nbma" => Ok(NetworkType::Nbma),
        "virtual-link" => Ok(NetworkType::VirtualLink),
        other => Err(ConfigError::Invalid(format!("unknown OSPF network type '{}'", other))),
    }
}

fn as_ipv4(addr: IpAddr, field: &str) -> Result<Ipv4Addr, ConfigError> {
    match addr {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(ConfigError::Invalid(format!("{} must be an IPv4 address (OSPFv2 only)", field))),
    }
}

impl ServerConfig {
    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self, ConfigError> {
        let router_id = as_ipv4(spec.router_id, "router_id")?;

        let ospf = spec
            .ospf
            .map(|o| -> Result<OspfConfig, ConfigError> {
                Ok(OspfConfig {
                    area_id: as_ipv4(o.area_id, "ospf.area_id")?,
                    interface: o.interface,
                    source_address: as_ipv4(o.source_address, "ospf.source_address")?,
                    hello_interval: o.hello_interval,
                    dead_interval: o.dead_interval,
                    network_type: parse_network_type(&o.network_type)?,
                    router_priority: o.router_priority,
                    peer_address: o.peer_address.map(|a| as_ipv4(a, "ospf.peer_address")).transpose()?,
                })
            })
            .transpose()?;

        let bgp = spec
            .bgp
            .map(|b| -> Result<BgpConfig, ConfigError> {
                if b.peers.is_empty() {
                    log::warn!("BGP configured with no peers");
                }
                let peers = b
                    .peers
                    .iter()
                    .map(|p| -> Result<Arc<PeerConfig>, ConfigError> {
                        let local_router_id = match p.local_router_id {
                            Some(addr) => as_ipv4(addr, "bgp.peers.local_router_id")?,
                            None => router_id,
                        };
                        Ok(Arc::new(PeerConfig {
                            remote_ip: p.remote_ip,
                            remote_as: p.remote_as,
                            local_as: p.local_as.unwrap_or(b.local_as),
                            local_router_id: IpAddr::V4(local_router_id),
                            enabled: p.enabled,
                            passive: p.passive,
                            hold_timer: p.hold_timer,
                            dest_port: p.dest_port,
                            route_reflector_client: p.route_reflector_client,
                            flap_damping: p.flap_damping,
                            rpki: p.rpki,
                            graceful_restart: p.graceful_restart,
                            flowspec: p.flowspec,
                        }))
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Ok(BgpConfig {
                    local_as: b.local_as,
                    connect_retry_time: b.connect_retry_time,
                    route_reflector_cluster_id: b.route_reflector.map(|r| r.cluster_id),
                    networks: b.networks,
                    peers,
                })
            })
            .transpose()?;

        if ospf.is_none() && bgp.is_none() {
            return Err(ConfigError::Invalid("configuration must enable at least one of ospf or bgp".to_string()));
        }

        Ok(ServerConfig { router_id: IpAddr::V4(router_id), ospf, bgp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_config_with_neither_protocol_enabled() {
        let toml = r#"router_id = "192.0.2.1""#;
        let spec: file::ServerConfigSpec = toml::from_str(toml).unwrap();
        assert!(ServerConfig::from_spec(spec).is_err());
    }

    #[test]
    fn rejects_non_ipv4_router_id() {
        let toml = r#"
            router_id = "::1"

            [ospf]
            area_id = "0.0.0.0"
            interface = "eth0"
            source_address = "10.0.0.1"
            hello_interval = 10
            dead_interval = 40
            network_type = "point-to-point"
            router_priority = 1
        "#;
        let spec: file::ServerConfigSpec = toml::from_str(toml).unwrap();
        assert!(matches!(ServerConfig::from_spec(spec), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn peer_inherits_server_local_as_when_unset() {
        let toml = r#"
            router_id = "192.0.2.1"

            [bgp]
            local_as = 65001

            [[bgp.peers]]
            remote_ip = "192.0.2.2"
            remote_as = 65002
        "#;
        let spec: file::ServerConfigSpec = toml::from_str(toml).unwrap();
        let config = ServerConfig::from_spec(spec).unwrap();
        let bgp = config.bgp.unwrap();
        assert_eq!(bgp.peers[0].local_as, 65001);
        assert_eq!(bgp.peers[0].local_router_id, config.router_id);
    }
}
