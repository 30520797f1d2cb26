#![allow(unused_imports)]

use std::process::ExitCode;
use std::sync::Arc;

use clap::{App, Arg};
use env_logger::Builder;
use log::{error, info, LevelFilter};
use tokio::sync::oneshot;

use routed::agent::Agent;
use routed::bgp::advanced::rpki::RoaStore;
use routed::config;
use routed::fib::LoggingFibInstaller;
use routed::transport::{LoopbackRawIpTransport, TokioTcpTransport};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = App::new("routed")
        .version("0.1")
        .author("Mat W. <mat@thepacketgeek.com>")
        .about("Multi-protocol (OSPFv2 + BGP-4) routing agent")
        .arg(
            Arg::with_name("configpath")
                .short("c")
                .long("config-path")
                .help("Path to the agent's TOML config file")
                .takes_value(true)
                .index(1)
                .required(true),
        )
        .arg(
            Arg::with_name("roafile")
                .long("roa-file")
                .help("Path to a JSON file of RPKI ROAs")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of logging verbosity"),
        )
        .get_matches();

    let config_path = matches.value_of("configpath").unwrap();

    let (agent_level, other_level) = match matches.occurrences_of("v") {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new().filter(Some("routed"), agent_level).filter(None, other_level).init();
    info!("logging at levels {}/{}", agent_level, other_level);

    let config = match config::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    let roa = match matches.value_of("roafile") {
        Some(path) => match RoaStore::from_json_file(path) {
            Ok(store) => Some(store),
            Err(e) => {
                error!("failed to load ROA file {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let fib = Arc::new(LoggingFibInstaller::new());
    let agent = Agent::new(config, fib, roa);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, shutting down");
        let _ = shutdown_tx.send(());
    });

    // No host-privileged raw-socket implementation ships in this crate
    // (spec's transport collaborators are treated as byte-pipes); OSPF
    // runs over the loopback stand-in until a real one is wired in.
    agent.run(TokioTcpTransport, LoopbackRawIpTransport::default(), shutdown_rx).await;
    ExitCode::SUCCESS
}
