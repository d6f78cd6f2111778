//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p sync_relay -- [--config cfg.json] [--addr 127.0.0.1:40100] [--store snapshots.json]
//!
//! The relay accepts participants, forwards their replicated transforms and
//! restores each participant's last known transform when it rejoins.
//!
//! Console commands:
//!   status      - Show connected participants and stored snapshots
//!   kick <id>   - Disconnect a participant
//!   save        - Persist snapshots now
//!   quit        - Persist snapshots and shut down

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use sync_relay::server::RelayServer;
use sync_shared::config::SyncConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&args[i + 1])?,
        _ => SyncConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.relay_addr = args[i + 1].clone();
                i += 2;
            }
            "--store" if i + 1 < args.len() => {
                cfg.store_path = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.relay_addr, store = ?cfg.store_path, "Starting relay");

    let mut server = RelayServer::bind(cfg).await.context("create relay")?;
    let local = server.local_addr()?;
    info!(%local, "Relay listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Relay ready. Type 'status' for info, 'kick <id>', 'save', 'quit' to exit.");
    println!();

    // Runs until `quit` on the console.
    server.run(CancellationToken::new()).await
}
