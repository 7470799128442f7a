//! # blobfs CLI
//!
//! Command-line interface for the blobfs filesystem BLOB store.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use blobfs_config::logging::init_logging;
use blobfs_config::{log_cli_debug, Config};
use blobfs_store::{DigestAlgorithm, StoreMode};
use clap::{ArgAction, Parser, Subcommand};

mod commands;

/// blobfs - store binary large objects on the filesystem
#[derive(Parser)]
#[command(name = "blobfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store root directory (overrides config and BLOBFS_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Store mode: plain, dedup or refcount
    #[arg(long, global = true)]
    mode: Option<StoreMode>,

    /// Digest for dedup and refcount modes: md5, sha256 or blake3
    #[arg(long, global = true)]
    digest: Option<DigestAlgorithm>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save files into the store and print one id per file
    Save {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Write a blob to stdout or a file
    Load {
        #[arg(value_name = "ID")]
        id: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the payload location and size of a blob
    Find {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete blobs (one reference each in refcount mode)
    Delete {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Display store statistics
    Status {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = blobfs_config::config().clone();
    apply_overrides(&mut config, &cli);
    init_logging(config.log_level().raised(cli.verbose));
    log_cli_debug!(
        "Effective store config",
        root = %config.store.directory.display(),
        mode = %config.store.mode
    );

    match cli.command {
        Commands::Save { files } => commands::save(&config, &files),
        Commands::Load { id, output } => commands::load(&config, &id, output.as_deref()),
        Commands::Find { id } => commands::find(&config, &id),
        Commands::Delete { ids } => commands::delete(&config, &ids),
        Commands::Status { json } => commands::status(&config, json),
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_show(&config),
            ConfigCommands::Path => commands::config_path(),
        },
    }
}

/// Command-line flags win over files and environment.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(root) = &cli.root {
        config.store.directory = root.clone();
    }
    if let Some(mode) = cli.mode {
        config.store.mode = mode;
    }
    if let Some(digest) = cli.digest {
        config.store.digest = digest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "blobfs", "save", "a.jpg", "b.jpg", "--root", "/tmp/s", "--mode", "dedup", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/s")));
        assert_eq!(cli.mode, Some(StoreMode::Deduplicating));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Save { files } => assert_eq!(files.len(), 2),
            _ => panic!("expected save"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode_and_digest() {
        assert!(Cli::try_parse_from(["blobfs", "--mode", "mirror", "status"]).is_err());
        assert!(Cli::try_parse_from(["blobfs", "--digest", "crc32", "status"]).is_err());
        assert!(Cli::try_parse_from(["blobfs", "save"]).is_err());
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let cli =
            Cli::try_parse_from(["blobfs", "--root", "/x", "--digest", "sha256", "status"]).unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.store.directory, PathBuf::from("/x"));
        assert_eq!(config.store.digest, DigestAlgorithm::Sha256);
        assert_eq!(config.store.mode, StoreMode::RefCounted);
    }
}
