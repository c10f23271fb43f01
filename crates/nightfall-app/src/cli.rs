use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nightfall", about = "nightfall: automatic light and dark theme switching")]
pub struct Cli {
    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and accept commands on stdin, one per line
    Run {
        /// Override the data directory from the config file
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the resolved configuration and today's switch times
    CheckConfig,

    /// Parse a command line without running it
    ParseCommand {
        /// Command token, for example "/delayBy 30"
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_data_dir_override() {
        let cli = Cli::try_parse_from(["nightfall", "--config", "a.toml", "run", "--data-dir", "/tmp/nf"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        match cli.command {
            Commands::Run { data_dir } => assert_eq!(data_dir, Some(PathBuf::from("/tmp/nf"))),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["nightfall"]).is_err());
    }
}
