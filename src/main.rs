//! fxdeploy CLI: provision FXServer deployments from recipes.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fxdeploy",
    version,
    about = "Recipe-driven game-server provisioning into a sandboxed deployment root"
)]
struct Cli {
    #[command(subcommand)]
    command: fxdeploy::cli::Commands,
}

fn main() {
    let filter = EnvFilter::try_from_env("FXDEPLOY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = fxdeploy::cli::dispatch(cli.command) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
