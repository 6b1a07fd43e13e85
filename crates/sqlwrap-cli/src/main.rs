//! sqlwrap binary: revision-script migrations for SQLite databases.
//!
//! Loads configuration, initialises structured logging, opens the database
//! and the scripts folder, then runs one `sqlwrap db …` command.

mod commands;
mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sqlwrap_db::{Database, Migrations};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlwrap")]
#[command(about = "Manage revision-script migrations for a SQLite database", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config file (default: sqlwrap.toml).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database URL, overriding the config file.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations folder, overriding the config file.
    #[arg(short, long, global = true)]
    directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration commands.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    /// Create the migrations folder and its script template.
    Init,

    /// Create a new, empty revision script on top of the head.
    Revision {
        /// Revision message.
        #[arg(short, long)]
        message: String,

        /// Parent revision; must be the current head.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Upgrade to a later revision: `head`, `+N`, or a revision id.
    Upgrade {
        #[arg(default_value = "head")]
        target: String,

        /// Print the SQL instead of running it (accepts "from:to"; a bare
        /// target is read as "base:<target>").
        #[arg(long)]
        sql: bool,
    },

    /// Revert to a previous revision: `-N`, `base`, or a revision id.
    Downgrade {
        #[arg(default_value = "-1", allow_hyphen_values = true)]
        target: String,

        /// Print the SQL instead of running it (accepts "from:to"; a bare
        /// target is read as "head:<target>").
        #[arg(long)]
        sql: bool,
    },

    /// List revisions, newest first.
    History {
        /// Range as `start:end`; either side may be `base`, `head`,
        /// `current`, or a revision id.
        #[arg(short, long)]
        range: Option<String>,

        #[arg(short, long)]
        verbose: bool,

        /// Show one page of the listing.
        #[arg(long)]
        page: Option<String>,

        /// Revisions per page (default from config).
        #[arg(long)]
        per_page: Option<u64>,
    },

    /// Show the revision the database is at.
    Current {
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the newest revision.
    Head {
        #[arg(short, long)]
        verbose: bool,
    },

    /// Record a revision as applied without running any script.
    Stamp {
        #[arg(default_value = "head")]
        target: String,

        /// Clear the version table first, even if it names an unknown revision.
        #[arg(long)]
        purge: bool,
    },
}

fn resolve_config_path(flag: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = flag.filter(|value| !value.trim().is_empty()) {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("SQLWRAP_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (resolved_config_path, config_source) = resolve_config_path(cli.config);
    let selected_config_path = resolved_config_path.as_deref().or(Some("sqlwrap.toml"));

    let mut config = config::load_config(selected_config_path)
        .expect("failed to load configuration, check the config file syntax");
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }
    if let Some(directory) = cli.directory {
        config.migrations.path = directory;
    }

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::debug!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved configuration path"
    );

    let Commands::Db(command) = cli.command;
    let url = match config.database.persistent_url() {
        Ok(url) => url,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let db = match Database::connect_with(&url, config.database.settings) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, url = %url, "failed to open database");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let migrations = match Migrations::new(&db, &config.migrations.path) {
        Ok(migrations) => migrations,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout().lock();
    match commands::run(&migrations, command, config.pagination, &mut stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_db_subcommands() {
        let cli = Cli::try_parse_from(["sqlwrap", "db", "downgrade", "-2"]).expect("should parse args");
        let Commands::Db(command) = cli.command;
        assert_eq!(
            command,
            DbCommand::Downgrade {
                target: "-2".into(),
                sql: false
            }
        );

        let cli = Cli::try_parse_from([
            "sqlwrap",
            "db",
            "revision",
            "-m",
            "add users",
            "--config",
            "other.toml",
        ])
        .expect("should parse args");
        assert_eq!(cli.config.as_deref(), Some("other.toml"));
        assert!(matches!(
            Cli::try_parse_from(["sqlwrap", "db", "upgrade"]).expect("should parse args").command,
            Commands::Db(DbCommand::Upgrade { ref target, sql: false }) if target == "head"
        ));
    }

    #[test]
    fn history_flags() {
        let cli = Cli::try_parse_from([
            "sqlwrap", "db", "history", "-r", "base:current", "--page", "2", "--per-page", "5",
        ])
        .expect("should parse args");
        let Commands::Db(command) = cli.command;
        assert_eq!(
            command,
            DbCommand::History {
                range: Some("base:current".into()),
                verbose: false,
                page: Some("2".into()),
                per_page: Some(5),
            }
        );
    }

    #[test]
    fn config_flag_beats_environment() {
        let (path, source) = resolve_config_path(Some("cli.toml".into()));
        assert_eq!(path.as_deref(), Some("cli.toml"));
        assert_eq!(source, "cli-arg");
    }
}
