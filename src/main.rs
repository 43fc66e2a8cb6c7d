use quorum_kv::{Config, StoreNode};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        usage(&args[0]);
        std::process::exit(1);
    }

    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-addr" => {
                config.http_server_addr = args[i + 1].clone();
                i += 2;
            }
            "--raft-addr" => {
                config.raft_server_addr = args[i + 1].clone();
                i += 2;
            }
            "--raft-dir" => {
                config.raft_dir = args[i + 1].clone();
                i += 2;
            }
            "--single" => {
                config.run_in_single_server_mode = true;
                i += 1;
            }
            "--reset-peers" => {
                config.reset_peers_on_load = true;
                i += 1;
            }
            "--join" => {
                config.join_address = Some(args[i + 1].clone());
                i += 2;
            }
            "--bootstrap-bind" => {
                let addr: SocketAddr = args[i + 1].parse()?;
                config.bootstrap_bind = Some(addr);
                i += 2;
            }
            "--bootstrap-peer" => {
                let addr: SocketAddr = args[i + 1].parse()?;
                config.bootstrap_peers.push(addr);
                i += 2;
            }
            "--secret" => {
                config.shared_secret = Some(args[i + 1].clone());
                i += 2;
            }
            other => {
                eprintln!("Unknown flag: {}", other);
                usage(&args[0]);
                std::process::exit(1);
            }
        }
    }

    tracing::info!(
        "starting node: facade {} consensus {} dir {}",
        config.http_server_addr,
        config.raft_server_addr,
        config.raft_dir
    );

    let node = StoreNode::start(config).await?;

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    node.shutdown().await;
    Ok(())
}

fn usage(program: &str) {
    eprintln!(
        "Usage: {} --http-addr <addr:port> --raft-addr <addr:port> --raft-dir <dir> \
         [--single] [--reset-peers] [--join <addr:port>] \
         [--bootstrap-bind <addr:port>] [--bootstrap-peer <addr:port>]... [--secret <s>]",
        program
    );
    eprintln!(
        "Example: {} --http-addr 127.0.0.1:4000 --raft-addr 127.0.0.1:4100 --raft-dir ./raft-1 --single",
        program
    );
    eprintln!(
        "Example: {} --http-addr 127.0.0.1:4001 --raft-addr 127.0.0.1:4101 --raft-dir ./raft-2 --join 127.0.0.1:4000",
        program
    );
}
