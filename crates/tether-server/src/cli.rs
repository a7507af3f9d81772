//! Command-line interface for the `tether` binary.
//!
//! Migration commands run through [`run`], so an application that registers
//! its models can ship its own binary around the same commands.

use clap::{Parser, Subcommand};
use std::io::Write;

use crate::{Tether, TetherError};

/// Serve a Tether application and manage its migrations.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "TETHER_CONFIG_PATH", default_value = "config.toml")]
    pub config: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server
    Serve,

    #[command(flatten)]
    Migration(MigrationCommand),
}

/// Commands operating on the migrations directory.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum MigrationCommand {
    /// Create a new migration
    Create {
        /// Migration name
        name: String,

        /// Generate statements from the registered models
        #[arg(long)]
        auto: bool,
    },

    /// Run pending migrations
    Migrate {
        /// Stop after this migration
        name: Option<String>,

        /// Record migrations as applied without running them
        #[arg(long)]
        fake: bool,
    },

    /// Roll back the last applied migration
    Rollback {
        /// Name of the last applied migration
        name: String,
    },

    /// List applied and pending migrations
    List,
}

/// Runs `command` against `tether`, printing its result to stdout.
///
/// # Errors
///
/// Propagates migration errors, and `TetherError::Output` if stdout cannot
/// be written.
pub fn run(command: MigrationCommand, tether: &Tether) -> Result<(), TetherError> {
    run_with_output(command, tether, &mut std::io::stdout().lock())
}

/// Like [`run`], writing the result to `out`.
///
/// # Errors
///
/// See [`run`].
pub fn run_with_output(
    command: MigrationCommand,
    tether: &Tether,
    out: &mut impl Write,
) -> Result<(), TetherError> {
    match command {
        MigrationCommand::Create { name, auto } => {
            if auto && tether.models().is_empty() {
                tracing::warn!("no models registered, auto-generation has nothing to compare");
            }
            match tether.create(&name, auto)? {
                Some(created) => writeln!(out, "Migration created: {created}")?,
                None => writeln!(out, "Nothing to migrate")?,
            }
        }
        MigrationCommand::Migrate { name, fake } => {
            let applied = tether.migrate(name.as_deref(), fake)?;
            if applied.is_empty() {
                writeln!(out, "No pending migrations")?;
            }
            for migration in &applied {
                writeln!(out, "Applied: {migration}")?;
            }
        }
        MigrationCommand::Rollback { name } => {
            tether.rollback(&name)?;
            writeln!(out, "Rolled back: {name}")?;
        }
        MigrationCommand::List => {
            let list = tether.list()?;
            writeln!(out, "Migrations are done:")?;
            for name in &list.done {
                writeln!(out, "{name}")?;
            }
            writeln!(out, "Migrations are undone:")?;
            for name in &list.undone {
                writeln!(out, "{name}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migration_commands() {
        let cli = Cli::try_parse_from(["tether", "create", "add_posts", "--auto"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Migration(MigrationCommand::Create {
                name: "add_posts".into(),
                auto: true
            })
        );

        let cli = Cli::try_parse_from(["tether", "migrate", "--fake"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Migration(MigrationCommand::Migrate {
                name: None,
                fake: true
            })
        );

        let cli =
            Cli::try_parse_from(["tether", "--config", "app.toml", "rollback", "002_x"]).unwrap();
        assert_eq!(cli.config, "app.toml");
        assert_eq!(
            cli.command,
            Command::Migration(MigrationCommand::Rollback { name: "002_x".into() })
        );

        let cli = Cli::try_parse_from(["tether", "serve"]).unwrap();
        assert_eq!(cli.command, Command::Serve);
    }

    #[test]
    fn rollback_requires_a_name() {
        assert!(Cli::try_parse_from(["tether", "rollback"]).is_err());
        assert!(Cli::try_parse_from(["tether"]).is_err());
    }
}
