//! # Scribe Hub CLI (`scribe`)
//!
//! ## Usage
//!
//! ```bash
//! scribe --config ./config/scribe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scribe init` | Create the SQLite database and run schema migrations |
//! | `scribe serve` | Start the HTTP API (and the scheduled shift sync, if enabled) |
//! | `scribe sync-shifts` | Pull the schedule from the configured source |
//! | `scribe search "<query>"` | Full-text search over pages |
//! | `scribe tree` | Print the page tree |
//! | `scribe user add` / `user list` | Manage accounts |
//! | `scribe shifts dedupe` / `shifts reset` | Shift maintenance |
//! | `scribe stats` | Database overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use scribe_hub::auth::{self, NewUser};
use scribe_hub::models::{PageType, Role};
use scribe_hub::{config, logging, migrate, pages, search, server, shift_sync, shifts, stats};

/// Scribe Hub: knowledge base and shift schedule for a scribe team.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scribe.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "scribe", version, about = "Scribe Hub knowledge base and shift schedule")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scribe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Fetch shifts from the schedule source and upsert them.
    SyncShifts {
        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search pages.
    Search {
        query: String,

        /// Only pages of this type (provider, procedure, smartphrase,
        /// scenario, wiki, folder).
        #[arg(long = "type")]
        page_type: Option<PageType>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print the page tree.
    Tree,

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Shift maintenance.
    Shifts {
        #[command(subcommand)]
        action: ShiftsAction,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// `admin` or `editor`.
        #[arg(long, default_value = "editor")]
        role: Role,
        /// Falls back to the `SCRIBE_PASSWORD` environment variable.
        #[arg(long, env = "SCRIBE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// List users.
    List,
}

#[derive(Subcommand)]
enum ShiftsAction {
    /// Remove duplicate shifts, keeping the oldest row of each group.
    Dedupe,
    /// Delete every shift.
    Reset {
        /// Required; the reset cannot be undone.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::SyncShifts { dry_run } => {
            shift_sync::run_sync_command(&cfg, dry_run).await?;
        }
        Commands::Search {
            query,
            page_type,
            limit,
        } => {
            search::run_search(&cfg, &query, page_type, limit).await?;
        }
        Commands::Tree => {
            pages::run_tree(&cfg).await?;
        }
        Commands::User { action } => match action {
            UserAction::Add {
                email,
                name,
                role,
                password,
            } => {
                auth::run_user_add(
                    &cfg,
                    NewUser {
                        email,
                        name,
                        role,
                        password,
                    },
                )
                .await?;
            }
            UserAction::List => {
                auth::run_user_list(&cfg).await?;
            }
        },
        Commands::Shifts { action } => match action {
            ShiftsAction::Dedupe => {
                shifts::run_dedupe(&cfg).await?;
            }
            ShiftsAction::Reset { yes } => {
                if !yes {
                    anyhow::bail!("refusing to delete all shifts without --yes");
                }
                shifts::run_reset(&cfg).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
