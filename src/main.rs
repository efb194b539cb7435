use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use floodmesh::{EventSink, Node, NodeConfig, DEFAULT_LISTEN_HOST, NO_BOOTSTRAP};

#[derive(Parser, Debug)]
#[command(name = "floodmesh")]
#[command(author, version, about = "Serverless peer-to-peer chat", long_about = None)]
struct Args {
    /// Name shown to other peers. Must be unique on the mesh.
    #[arg(short, long)]
    name: String,

    /// Address of any existing member, or localhost:0 to start a new mesh.
    #[arg(short, long, value_name = "HOST:PORT", default_value = NO_BOOTSTRAP)]
    bootstrap: String,

    /// Interface to listen on. The port is picked by the OS.
    #[arg(long, default_value = DEFAULT_LISTEN_HOST)]
    host: String,

    /// Host other peers should use to reach this node.
    #[arg(long)]
    advertise: Option<String>,

    /// Give up on outbound connects after this many milliseconds.
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen_host: self.host.clone(),
            advertise_host: self.advertise.clone(),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            ..Default::default()
        }
    }
}

/// Prints everything the node reports as plain lines on stdout.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_peer_joined(&self, name: &str) {
        println!("{} joined the network.", name);
    }

    fn on_message_received(&self, text: &str) {
        println!("{}", text);
    }

    fn on_transport_error(&self, peer: &str, detail: &str) {
        println!("Error talking to {}: {}", peer, detail);
    }

    fn on_started(&self, name: &str, address: &str) {
        println!("Started server on {} as {}", address, name);
    }

    fn on_peer_connected(&self, address: &str) {
        println!("Connected to peer {}", address);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let node = Node::new(args.node_config(), Arc::new(ConsoleSink));
    node.connect(&args.name, &args.bootstrap)
        .await
        .context("failed to join the mesh")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        if let Err(e) = node.send_chat(&line).await {
                            println!("Not sent: {}", e);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown().await;
    Ok(())
}
