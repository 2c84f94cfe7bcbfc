mod backend;
mod cli;
mod config;
mod estimate;
mod model;
mod orchestrator;
mod projection;
mod storage;
mod text_summary;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logs go to stderr; stdout carries command output only.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "leadctl=warn",
        1 => "leadctl=info",
        _ => "leadctl=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    if let Err(e) = cli::run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    // A pending stdin read would otherwise keep the runtime alive on shutdown.
    std::process::exit(0);
}
