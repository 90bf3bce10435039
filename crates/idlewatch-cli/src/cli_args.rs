use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub(crate) const DEFAULT_STATE_PATH: &str = ".idlewatch/state.json";

#[derive(Debug, Parser)]
#[command(
    name = "idlewatch",
    about = "Tracks member activity in group chats and posts a daily inactivity digest",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "IDLEWATCH_CONFIG",
        help = "Monitor config file (JSON, or TOML when the extension is .toml). Re-read every tick."
    )]
    pub(crate) config: Option<PathBuf>,

    #[arg(
        long,
        env = "IDLEWATCH_STATE",
        default_value = DEFAULT_STATE_PATH,
        help = "Watermark state file"
    )]
    pub(crate) state: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Reads NDJSON events from stdin and writes NDJSON digests to stdout until EOF or Ctrl-C.
    Run,
    /// Runs one inspection now and prints the report.
    Inspect {
        #[arg(long, help = "Send digests instead of only reporting them")]
        dispatch: bool,
    },
    /// Shows every tracked member of one group with days silent.
    Overview {
        #[arg(long)]
        group: String,
    },
    /// Clears today's digest marker so the next due tick fires again.
    ResetMarker,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{Cli, Command, DEFAULT_STATE_PATH};

    #[test]
    fn unit_defaults_and_subcommands_parse() {
        let cli = Cli::try_parse_from(["idlewatch", "run"]).expect("parse run");
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.state, PathBuf::from(DEFAULT_STATE_PATH));

        let cli = Cli::try_parse_from([
            "idlewatch",
            "--config",
            "monitor.toml",
            "--state",
            "/tmp/s.json",
            "inspect",
            "--dispatch",
        ])
        .expect("parse inspect");
        assert_eq!(cli.config, Some(PathBuf::from("monitor.toml")));
        assert!(matches!(cli.command, Command::Inspect { dispatch: true }));

        let cli = Cli::try_parse_from(["idlewatch", "overview", "--group", "100"])
            .expect("parse overview");
        assert!(matches!(cli.command, Command::Overview { ref group } if group == "100"));
        assert!(Cli::try_parse_from(["idlewatch", "reset-marker"]).is_ok());
    }

    #[test]
    fn regression_overview_requires_group() {
        assert!(Cli::try_parse_from(["idlewatch", "overview"]).is_err());
    }
}
