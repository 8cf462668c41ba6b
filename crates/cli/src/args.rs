//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "hookq")]
#[command(about = "Priority webhook job queue")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Enqueue newline-delimited JSON jobs and process them
    Run {
        /// NDJSON file with one job per line (stdin when omitted)
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: Option<PathBuf>,

        /// Longest time to wait for the queue to drain
        #[arg(short = 'w', long = "wait-secs", value_name = "SECS", default_value_t = 30)]
        wait_secs: u64,

        /// Grace period for in-flight jobs at shutdown
        #[arg(long = "shutdown-secs", value_name = "SECS", default_value_t = 5)]
        shutdown_secs: u64,
    },

    /// Print the tier assigned to a message text
    Classify {
        /// Message text, or a JSON payload when --json is set
        text: String,

        /// Treat TEXT as a JSON webhook payload
        #[arg(long = "json")]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_defaults() {
        let args = Args::try_parse_from(["hookq", "run"]).unwrap();
        match args.command {
            Command::Run {
                input,
                wait_secs,
                shutdown_secs,
            } => {
                assert_eq!(input, None);
                assert_eq!(wait_secs, 30);
                assert_eq!(shutdown_secs, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_classify() {
        let args = Args::try_parse_from(["hookq", "classify", "--json", r#"{"text":"ok"}"#]).unwrap();
        assert!(matches!(args.command, Command::Classify { json: true, .. }));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Args::try_parse_from(["hookq", "serve"]).is_err());
    }
}
