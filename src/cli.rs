// CLI module - command-line argument parsing and handlers
//
// Provides subcommands for configuration and storage management:
// - config --show: Display effective configuration
// - config --reset: Regenerate config file with defaults
// - config --edit: Open config file in $EDITOR
// - config --update: Rewrite config with the current template, keeping values
// - migrate: Bring the interval store to the latest schema

use crate::config::{Config, VERSION};
use crate::store::IntervalStore;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::process::Command;

/// attentd - Attention tracking daemon
#[derive(Parser)]
#[command(name = "attentd")]
#[command(version = VERSION)]
#[command(about = "Records which application or site holds your attention", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(long)]
        edit: bool,

        /// Update config with new defaults (preserves user values)
        #[arg(long)]
        update: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Run pending schema migrations and print the resulting version
    Migrate,
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config {
            show,
            reset,
            edit,
            update,
            path,
        }) => {
            if path {
                handle_config_path();
            } else if show {
                handle_config_show();
            } else if reset {
                handle_config_reset();
            } else if edit {
                handle_config_edit();
            } else if update {
                handle_config_update();
            } else {
                // No flag provided, show help
                println!("Usage: attentd config [--show|--reset|--edit|--update|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --edit    Open config file in $EDITOR");
                println!("  --update  Update config with new defaults (preserves user values)");
                println!("  --path    Show config file path");
            }
            true
        }
        Some(Commands::Migrate) => {
            handle_migrate();
            true
        }
        None => false, // No subcommand, run the daemon
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = Config::from_env();

    println!("# Effective configuration (env > file > defaults)");
    println!("# Database: {}", config.db_path().display());
    println!();
    print!("{}", config.to_toml());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    // Confirm if file exists
    if path.exists() && !confirm(&format!(
        "Config file exists at {}. Overwrite? [y/N] ",
        path.display()
    )) {
        println!("Aborted.");
        return;
    }

    if let Err(e) = Config::write_default(&path) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

/// Ask a yes/no question on stderr; anything but "y" is a no
fn confirm(prompt: &str) -> bool {
    eprint!("{}", prompt);
    let _ = std::io::stderr().flush();

    let mut input = String::new();
    match std::io::stdin().read_line(&mut input) {
        Ok(_) => input.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}

fn handle_config_edit() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    // Ensure config exists
    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    // Get editor from environment
    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            // Platform-specific fallback
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening {} with {}", path.display(), editor);

    match Command::new(&editor).arg(&path).status() {
        Ok(s) if s.success() => {}
        Ok(s) => {
            eprintln!("Editor exited with status: {}", s);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to launch editor '{}': {}", editor, e);
            eprintln!("Set $EDITOR environment variable to your preferred editor");
            std::process::exit(1);
        }
    }
}

fn handle_config_update() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if !path.exists() {
        // No existing config, just create default
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
        return;
    }

    // Re-render the effective config through the current template
    let updated = Config::from_env().to_toml();

    // Backup existing
    let backup_path = path.with_extension("toml.bak");
    if let Err(e) = std::fs::copy(&path, &backup_path) {
        eprintln!("Warning: Could not create backup: {}", e);
    } else {
        println!("Backup created: {}", backup_path.display());
    }

    if let Err(e) = std::fs::write(&path, updated) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config updated with latest structure: {}", path.display());
    println!("Your values have been preserved.");
}

fn handle_migrate() {
    let config = Config::from_env();
    let db_path = config.db_path();

    let version = IntervalStore::open(&db_path, &config.storage.store_options())
        .and_then(|store| store.schema_version());

    match version {
        Ok(version) => println!("{}: schema version {}", db_path.display(), version),
        Err(e) => {
            eprintln!("Migration failed for {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    }
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
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["attentd"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["attentd", "migrate"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Migrate)));

        let cli = Cli::try_parse_from(["attentd", "config", "--show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config { show: true, .. })
        ));
    }
}
