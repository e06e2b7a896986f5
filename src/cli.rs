use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "playbind", about = "Media player state propagation runtime")]
pub struct Cli {
    /// Cap on chained writes issued from inside a propagation pass
    #[arg(long, global = true)]
    pub max_reentrant_writes: Option<usize>,

    /// Silence development warnings about misuse
    #[arg(long, global = true)]
    pub no_dev_warnings: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a JSON scenario against a simulated player and print the report
    Simulate {
        /// Scenario file
        file: PathBuf,
    },

    /// Print the bridged property, method and event manifest
    Manifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::parse_from([
            "playbind",
            "simulate",
            "scenario.json",
            "--max-reentrant-writes",
            "8",
            "--no-dev-warnings",
        ]);
        assert_eq!(cli.max_reentrant_writes, Some(8));
        assert!(cli.no_dev_warnings);
        match cli.command {
            Command::Simulate { file } => assert_eq!(file, PathBuf::from("scenario.json")),
            Command::Manifest => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn manifest_takes_no_arguments() {
        let cli = Cli::parse_from(["playbind", "manifest"]);
        assert!(matches!(cli.command, Command::Manifest));
        assert_eq!(cli.max_reentrant_writes, None);
    }
}
