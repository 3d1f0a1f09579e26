use std::net::SocketAddr;

use bareme::api::{Cli, Command, run_evaluate_command, run_http_server};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    match Cli::parse().command {
        Command::Serve { host, port } => {
            if let Err(e) = run_http_server(SocketAddr::new(host, port)).await {
                error!(event = "server_error", error = %e);
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Evaluate(args) => match run_evaluate_command(args) {
            Ok(json) => println!("{json}"),
            Err(msg) => {
                eprintln!("{msg}");
                std::process::exit(1);
            }
        },
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bareme=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
