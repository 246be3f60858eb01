use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Personal task tracker.
/// Tasks live in `<data dir>/<storage key>.json`; see `--data-dir` and `--config`.
#[derive(Parser)]
#[command(name = "todo", version, about = "Personal task tracker")]
pub struct Cli {
    /// Directory holding the task store.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to the TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_completions_needs_no_store_flags() {
        let cli = Cli::try_parse_from(["todo", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
        assert!(cli.data_dir.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["todo", "list", "--data-dir", "/tmp/x", "--json"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Commands::List { json: true, .. }));
    }
}
