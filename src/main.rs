use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use temstream::client::ClientConfig;
use temstream::server::ServerConfig;

#[derive(Parser)]
#[command(name = "temstream", about = "Typed, multi-stream, multi-client media distribution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a server distributing one stream of a single ServerType.
    Server(ServerConfig),
    /// Connect to a server and exercise its stream.
    Client(ClientConfig),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Server(config) => {
            if !config.valid() {
                anyhow::bail!("invalid server configuration");
            }
            temstream::server::run(config).context("server exited with an error")
        }
        Command::Client(config) => {
            temstream::client::run(config).context("client exited with an error")
        }
    };

    if let Err(e) = &result {
        log::error!("{e:#}");
    }
    result
}
