use clap::Parser;
use colored::*;
use std::process;

use panel_cli::{Cli, CliError, CommandHandler, Commands, ConfigManager};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize configuration
    let config_manager = match ConfigManager::new(cli.config.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            process::exit(1);
        }
    };

    // Set up logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let handler = match CommandHandler::new(config_manager) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            process::exit(1);
        }
    };

    if let Err(e) = execute_command(handler, &cli).await {
        eprintln!("{} {}", "Error:".red(), e);
        process::exit(1);
    }
}

async fn execute_command(mut handler: CommandHandler, cli: &Cli) -> Result<(), CliError> {
    handler.set_output_format(cli.format);

    match cli.command.clone() {
        Commands::Xui { connection, command } => handler.handle_xui_command(connection, command).await,
        Commands::Guard { connection, command } => handler.handle_guard_command(connection, command).await,
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    if quiet {
        return; // No logging in quiet mode
    }

    let level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries summaries and --format json output
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
