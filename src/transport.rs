//! Transport collaborators consumed by the two engines (spec §6): a TCP
//! transport for BGP sessions and an L3 raw-socket transport for OSPF. Both
//! are traits so the engines depend only on a byte-pipe contract, never on a
//! specific host API; `TokioTcpTransport` is the concrete implementation
//! this crate ships, grounded in the teacher's `session/poller.rs` use of
//! `net2::TcpBuilder` for source-address-bound outbound connects.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use net2::TcpBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// `listen`/`accept`/`connect` over TCP (spec §6). BGP session runtime code
/// is written against this trait so it can be driven by a fake in tests
/// without binding a real socket.
#[async_trait::async_trait]
pub trait TcpTransport: Send + Sync {
    async fn listen(&self, address: IpAddr, port: u16) -> io::Result<TcpListener>;
    async fn accept(&self, listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)>;
    async fn connect(&self, source: IpAddr, address: IpAddr, port: u16) -> io::Result<TcpStream>;
}

/// The real TCP transport: a thin wrapper over `tokio::net`, binding the
/// source address on active connects the way `net2::TcpBuilder` lets the
/// teacher's poller do (plain `TcpStream::connect` cannot choose a source
/// address).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTcpTransport;

#[async_trait::async_trait]
impl TcpTransport for TokioTcpTransport {
    async fn listen(&self, address: IpAddr, port: u16) -> io::Result<TcpListener> {
        TcpListener::bind(SocketAddr::new(address, port)).await
    }

    async fn accept(&self, listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        listener.accept().await
    }

    async fn connect(&self, source: IpAddr, address: IpAddr, port: u16) -> io::Result<TcpStream> {
        let builder = match address {
            IpAddr::V4(_) => TcpBuilder::new_v4()?,
            IpAddr::V6(_) => TcpBuilder::new_v6()?,
        };
        builder.reuse_address(true)?;
        builder.bind(SocketAddr::new(source, 0))?;
        let std_stream = builder.to_tcp_stream()?;
        std_stream.set_nonblocking(true)?;
        let connect = TcpStream::connect_std(std_stream, SocketAddr::new(address, port));
        timeout(CONNECT_TIMEOUT, connect).await?
    }
}

/// An L3 transport for OSPF (spec §6): joins the OSPF multicast groups, and
/// sends/receives with the IP header already stripped. Real raw-socket I/O
/// needs host privileges this crate's scope explicitly hands off ("treated
/// here as byte-pipe collaborators", spec §1); this trait is the hook the
/// hello/flooding modules are written against.
#[async_trait::async_trait]
pub trait RawIpTransport: Send + Sync {
    async fn open(&mut self, interface: &str, source_address: Ipv4Addr) -> io::Result<()>;
    async fn join_multicast(&mut self, group: Ipv4Addr) -> io::Result<()>;
    async fn send(&self, bytes: &[u8], dest_ip: Ipv4Addr) -> io::Result<usize>;
    async fn receive(&self) -> io::Result<(Vec<u8>, Ipv4Addr)>;
}

/// A loopback stand-in `RawIpTransport` used by tests and single-host
/// demos: frames queued by `send` are handed straight back out of
/// `receive`, letting the hello/adjacency/flooding state machines be
/// exercised without a real OSPF-speaking network.
#[derive(Debug, Default)]
pub struct LoopbackRawIpTransport {
    source: Ipv4Addr,
    queue: tokio::sync::Mutex<std::collections::VecDeque<(Vec<u8>, Ipv4Addr)>>,
}

#[async_trait::async_trait]
impl RawIpTransport for LoopbackRawIpTransport {
    async fn open(&mut self, _interface: &str, source_address: Ipv4Addr) -> io::Result<()> {
        self.source = source_address;
        Ok(())
    }

    async fn join_multicast(&mut self, _group: Ipv4Addr) -> io::Result<()> {
        Ok(())
    }

    async fn send(&self, bytes: &[u8], dest_ip: Ipv4Addr) -> io::Result<usize> {
        let len = bytes.len();
        self.queue.lock().await.push_back((bytes.to_vec(), dest_ip));
        Ok(len)
    }

    async fn receive(&self) -> io::Result<(Vec<u8>, Ipv4Addr)> {
        loop {
            if let Some(frame) = self.queue.lock().await.pop_front() {
                return Ok(frame);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_transport_echoes_sent_frames() {
        let mut transport = LoopbackRawIpTransport::default();
        transport.open("eth0", Ipv4Addr::new(10, 0, 0, 1)).await.unwrap();
        transport.send(b"hello", Ipv4Addr::new(224, 0, 0, 5)).await.unwrap();
        let (bytes, dest) = transport.receive().await.unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(dest, Ipv4Addr::new(224, 0, 0, 5));
    }
}
