use clap::Parser;
use colored::*;
use std::process;
use tracing_subscriber::EnvFilter;

use corral::cli::Cli;
use corral::{ControllerConfig, ReconcileController};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Configuration problems abort before any network activity.
    let mut config = match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".bright_red().bold(), e);
            process::exit(2);
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "Error:".bright_red().bold(), e);
        process::exit(2);
    }

    let controller = ReconcileController::from_config(config);
    match controller.run().await {
        // Partial success is success: a completed run exits zero even when
        // some candidates failed.
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("{} {}", "Error:".bright_red().bold(), e);
                        process::exit(1);
                    }
                }
            } else {
                print!("{}", report.render_summary());
            }
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".bright_red().bold(), e);
            process::exit(1);
        }
    }
}
