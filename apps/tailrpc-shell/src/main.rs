use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tailrpc_core::SystemClock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

mod config;
mod shell;

use crate::config::ShellConfig;
use crate::shell::{parse_command, Flow, Shell};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (toml/yaml/json) or a .env file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Comma-separated node names, overriding the configured list
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("TAILRPC_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = match ShellConfig::new(cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };
    if !cli.nodes.is_empty() {
        config.nodes = cli.nodes.iter().map(|n| n.trim().to_string()).collect();
    }

    let mut shell = match Shell::new(&config, Arc::new(SystemClock)) {
        Ok(shell) => shell,
        Err(err) => {
            error!("failed to build nodes: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));

    let (tx, mut rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    shell.start_all();
    info!(nodes = ?config.nodes, current = %shell.current_name(), "tailrpc shell ready; type help");

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown signal received");
            break;
        }
        tokio::select! {
            _ = ticker.tick() => shell.tick(),
            line = rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if shell.execute(command) == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => println!("{err}"),
                }
            }
        }
        for line in shell.drain_output() {
            println!("{line}");
        }
    }

    shell.stop_all();
    for line in shell.drain_output() {
        println!("{line}");
    }
}
