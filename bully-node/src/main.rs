//! Bully election node
//!
//! Joins a UDP broadcast group on the local network and takes part in
//! leader election. Run one node per host with the same port:
//!
//! ```sh
//! bully-node --id alpha
//! bully-node --id beta
//! ```

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use bully_core::{Bully, BullyConfig, UdpChannel, UdpConfig};

/// Bully leader election node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Peer id; greater ids win elections (minted when omitted)
    #[arg(short, long)]
    id: Option<String>,

    /// UDP port shared by the election group
    #[arg(short, long, default_value_t = bully_core::udp::DEFAULT_PORT)]
    port: u16,

    /// Declared one-way latency bound in milliseconds
    #[arg(short, long, default_value_t = 200)]
    latency_ms: u64,

    /// Whether a sitting leader holds its ground against superior
    /// challengers
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    totalitarian: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let id = args
        .id
        .unwrap_or_else(|| Uuid::new_v4().to_string()[..8].to_string());

    info!("Node \"{}\" joining election group on port {}", id, args.port);

    let channel = UdpChannel::bind(
        id.clone(),
        UdpConfig {
            port: args.port,
            latency: Duration::from_millis(args.latency_ms),
        },
    )
    .await?;
    info!("Listening on {}", channel.local_addr()?);

    let node = Bully::new(
        id,
        Arc::new(channel),
        BullyConfig {
            totalitarian: args.totalitarian,
            ..BullyConfig::default()
        },
    );

    let _watch = node.on_leader_change(|leader| {
        info!("Leader is now: {}", leader);
    });

    node.become_live();

    // Command interface on stdin
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  status    - Show this node's view of the election");
        println!("  campaign  - Contest the leadership");
        println!("  lead      - Claim the leadership outright");
        println!("  die       - Step down and go silent");
        println!("  live      - Rejoin the election");
        println!("  quit      - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if cmd_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            Some(line) = cmd_rx.recv() => {
                match line.trim() {
                    "status" => {
                        println!(
                            "id={} leader={} leading={} electing={} live={}",
                            node.id(),
                            node.leader(),
                            node.is_leader(),
                            node.is_electing(),
                            node.is_live(),
                        );
                    }
                    "campaign" => node.campaign(),
                    "lead" => node.assert_leadership(),
                    "die" => node.shutdown(),
                    "live" => node.become_live(),
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("Unknown command: {}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    node.destroy();
    Ok(())
}
