use clap::Parser;
use tradeflow::cli::{load_config, Cli, Commands};
use tradeflow::cli::output::print_error;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { .. } => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging);
        }
        _ => init_logging_simple(),
    }

    if let Err(e) = cli.run().await {
        print_error(&format!("✗ {e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
