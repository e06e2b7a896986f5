mod cli;

use clap::Parser;
use cli::{Cli, Command};
use playbind::{bridge, simulate};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate { file } => {
            let mut scenario = match simulate::load(&file) {
                Ok(scenario) => scenario,
                Err(e) => {
                    tracing::error!(error = %e, "loading scenario failed");
                    eprintln!("playbind simulate: {e}");
                    std::process::exit(1);
                }
            };
            if let Some(limit) = cli.max_reentrant_writes {
                scenario.config.max_reentrant_writes = limit;
            }
            if cli.no_dev_warnings {
                scenario.config.dev_warnings = false;
            }
            let report = match simulate::run(&scenario) {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "scenario failed");
                    eprintln!("playbind simulate: {e}");
                    std::process::exit(1);
                }
            };
            print_json(&report);
        }
        Command::Manifest => print_json(&bridge::manifest()),
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "serializing output failed");
            eprintln!("playbind: {e}");
            std::process::exit(1);
        }
    }
}
