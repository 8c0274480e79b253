//! CLI argument parsing for clusterlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// clusterlock: inspect and maintain a shared lock store.
///
/// Every cluster node records its claims as rows in the shared store:
/// - `list` shows who holds what and which leases have run out
/// - `clear` and `reap` remove rows left behind by crashed nodes
/// - `hold` takes a lock through a regular lock manager
#[derive(Parser, Debug)]
#[command(name = "clusterlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a YAML config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Shared store directory (overrides `store_dir` from the config).
    #[arg(long, global = true, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Node identity to claim rows as (overrides `node_id` from the config).
    #[arg(long, global = true, value_name = "ID")]
    pub node_id: Option<String>,

    /// Log debug events to stderr.
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for clusterlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every row in the shared store.
    ///
    /// Shows owner, lease, age, and remaining time; expired rows are marked.
    List,

    /// Remove the row for a key.
    ///
    /// Without --force only an expired row is removed.
    Clear(ClearArgs),

    /// Remove every expired row and print what was removed.
    Reap,

    /// Acquire a lock, keep it refreshed for a while, then release it.
    ///
    /// Useful for checking that other nodes see the claim.
    Hold(HoldArgs),
}

/// Arguments for the `clear` command.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Key whose row should be removed.
    pub key: String,

    /// Remove the row even if its lease is still running.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `hold` command.
#[derive(Parser, Debug)]
pub struct HoldArgs {
    /// Key to lock.
    pub key: String,

    /// Lease timeout in seconds (defaults to `default_timeout_secs`).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// How long to hold the lock, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub duration: u64,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_list() {
        let cli = Cli::try_parse_from(["clusterlock", "list"]).unwrap();
        assert!(matches!(cli.command, Command::List));
        assert!(cli.config.is_none());
        assert!(cli.store_dir.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "clusterlock",
            "reap",
            "--store-dir",
            "/shared/locks",
            "--config",
            "lock.yaml",
            "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Reap));
        assert_eq!(cli.store_dir, Some(PathBuf::from("/shared/locks")));
        assert_eq!(cli.config, Some(PathBuf::from("lock.yaml")));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_clear() {
        let cli = Cli::try_parse_from(["clusterlock", "clear", "/content/a"]).unwrap();
        if let Command::Clear(args) = cli.command {
            assert_eq!(args.key, "/content/a");
            assert!(!args.force);
        } else {
            panic!("Expected Clear command");
        }
    }

    #[test]
    fn parse_clear_force() {
        let cli = Cli::try_parse_from(["clusterlock", "clear", "k", "--force"]).unwrap();
        if let Command::Clear(args) = cli.command {
            assert!(args.force);
        } else {
            panic!("Expected Clear command");
        }
    }

    #[test]
    fn parse_hold_defaults() {
        let cli = Cli::try_parse_from(["clusterlock", "hold", "k"]).unwrap();
        if let Command::Hold(args) = cli.command {
            assert_eq!(args.key, "k");
            assert_eq!(args.timeout, None);
            assert_eq!(args.duration, 10);
        } else {
            panic!("Expected Hold command");
        }
    }

    #[test]
    fn parse_hold_with_options() {
        let cli = Cli::try_parse_from([
            "clusterlock",
            "--node-id",
            "node-a",
            "hold",
            "k",
            "--timeout",
            "30",
            "--duration",
            "120",
        ])
        .unwrap();
        assert_eq!(cli.node_id.as_deref(), Some("node-a"));
        if let Command::Hold(args) = cli.command {
            assert_eq!(args.timeout, Some(30));
            assert_eq!(args.duration, 120);
        } else {
            panic!("Expected Hold command");
        }
    }

    #[test]
    fn clear_requires_key() {
        assert!(Cli::try_parse_from(["clusterlock", "clear"]).is_err());
    }
}
