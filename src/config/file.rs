//! TOML representation of the configuration surface (spec §6, §10.3):
//! deserialized with `serde`/`toml`, then lifted into the in-memory
//! `ServerConfig` by `config::mod` with server-level defaults applied.

use std::fs::File;
use std::io::{self, Read};
use std::net::IpAddr;

use serde::Deserialize;

struct Defaults {}

impl Defaults {
    fn enabled() -> bool {
        true
    }
    fn passive() -> bool {
        false
    }
    fn hold_timer() -> u16 {
        180
    }
    fn connect_retry_time() -> u16 {
        30
    }
    fn dest_port() -> u16 {
        179
    }
    fn hello_interval() -> u16 {
        10
    }
    fn dead_interval() -> u32 {
        40
    }
    fn network_type() -> String {
        "broadcast".to_string()
    }
    fn router_priority() -> u8 {
        1
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct PeerConfigSpec {
    pub(super) remote_ip: IpAddr,
    pub(super) remote_as: u32,
    pub(super) local_as: Option<u32>,
    pub(super) local_router_id: Option<IpAddr>,

    #[serde(default = "Defaults::enabled")]
    pub(super) enabled: bool,
    #[serde(default = "Defaults::passive")]
    pub(super) passive: bool,
    #[serde(default = "Defaults::hold_timer")]
    pub(super) hold_timer: u16,
    #[serde(default = "Defaults::dest_port")]
    pub(super) dest_port: u16,

    #[serde(default)]
    pub(super) route_reflector_client: bool,
    #[serde(default)]
    pub(super) flap_damping: bool,
    #[serde(default)]
    pub(super) rpki: bool,
    #[serde(default)]
    pub(super) graceful_restart: bool,
    #[serde(default)]
    pub(super) flowspec: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct RouteReflectorSpec {
    pub(super) cluster_id: IpAddr,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct BgpConfigSpec {
    pub(super) local_as: u32,
    #[serde(default = "Defaults::connect_retry_time")]
    pub(super) connect_retry_time: u16,
    pub(super) route_reflector: Option<RouteReflectorSpec>,
    #[serde(default = "Vec::new")]
    pub(super) networks: Vec<String>,
    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct OspfConfigSpec {
    pub(super) area_id: IpAddr,
    pub(super) interface: String,
    pub(super) source_address: IpAddr,
    #[serde(default = "Defaults::hello_interval")]
    pub(super) hello_interval: u16,
    #[serde(default = "Defaults::dead_interval")]
    pub(super) dead_interval: u32,
    #[serde(default = "Defaults::network_type")]
    pub(super) network_type: String,
    #[serde(default = "Defaults::router_priority")]
    pub(super) router_priority: u8,
    pub(super) peer_address: Option<IpAddr>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    pub(super) router_id: IpAddr,
    pub(super) ospf: Option<OspfConfigSpec>,
    pub(super) bgp: Option<BgpConfigSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        toml::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_minimal_bgp_only_config() {
        let toml = r#"
            router_id = "192.0.2.1"

            [bgp]
            local_as = 65001

            [[bgp.peers]]
            remote_ip = "192.0.2.2"
            remote_as = 65002
        "#;
        let spec: ServerConfigSpec = toml::from_str(toml).unwrap();
        assert_eq!(spec.router_id, IpAddr::from(Ipv4Addr::new(192, 0, 2, 1)));
        let bgp = spec.bgp.unwrap();
        assert_eq!(bgp.local_as, 65001);
        assert_eq!(bgp.connect_retry_time, 30);
        assert_eq!(bgp.peers.len(), 1);
        assert_eq!(bgp.peers[0].hold_timer, 180);
        assert!(!bgp.peers[0].passive);
    }

    #[test]
    fn parses_ospf_section_with_defaults() {
        let toml = r#"
            router_id = "192.0.2.1"

            [ospf]
            area_id = "0.0.0.0"
            interface = "eth0"
            source_address = "10.0.0.1"
        "#;
        let spec: ServerConfigSpec = toml::from_str(toml).unwrap();
        let ospf = spec.ospf.unwrap();
        assert_eq!(ospf.hello_interval, 10);
        assert_eq!(ospf.dead_interval, 40);
        assert_eq!(ospf.network_type, "broadcast");
    }
}
