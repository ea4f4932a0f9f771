//! # MAG Player CLI (`mag`)
//!
//! ## Usage
//!
//! ```bash
//! mag --config ./config/mag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mag init` | Create the database schema and load the configured users |
//! | `mag serve` | Start the HTTP server and web player |
//! | `mag ingest <archive>` | Extract and catalog a local `.mag` archive |
//! | `mag packages` | List packages |
//! | `mag search [term]` | Search audio and documents |
//! | `mag links <source-id>` | References recorded for a document |
//! | `mag delete audio\|document <id>` | Delete one asset |
//! | `mag sweep` | Remove old package directories |
//!
//! Log verbosity follows `RUST_LOG` (default `mag_player=info,warn`); logs go
//! to stderr.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mag_player::models::AssetKind;
use mag_player::sweep::SweepOptions;
use mag_player::{auth, config, db, ingest, inspect, migrate, search, server, sweep};

/// MAG Player: upload, extract, catalog and play `.mag` narration packages.
#[derive(Parser)]
#[command(name = "mag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and reconcile `[[users]]`. Idempotent.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Validate, extract and catalog a local archive.
    Ingest {
        /// Path to the `.mag` (or `.zip`) archive.
        archive: PathBuf,

        /// Uploader recorded on the package.
        #[arg(long, default_value = ingest::CLI_UPLOADER)]
        user: String,
    },

    /// List packages, most recent first.
    Packages,

    /// Case-insensitive substring search. An empty term lists everything.
    Search {
        #[arg(default_value = "")]
        term: String,
    },

    /// List references recorded for a document.
    Links { source_id: String },

    /// Delete one audio file or document.
    Delete { kind: KindArg, id: String },

    /// Remove package directories by age and/or count.
    ///
    /// Only the directories are removed; catalog rows are left untouched.
    Sweep {
        /// Remove packages last modified more than N days ago.
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Keep only the N most recent packages.
        #[arg(long)]
        keep_latest: Option<usize>,

        /// List what would be removed without removing anything.
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Audio,
    Document,
}

impl From<KindArg> for AssetKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Audio => AssetKind::Audio,
            KindArg::Document => AssetKind::Document,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mag_player=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let users = auth::sync_users(&pool, &cfg.users).await?;
            pool.close().await;
            std::fs::create_dir_all(cfg.storage.packages_dir())?;
            println!("Database initialized successfully ({} users).", users);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { archive, user } => {
            ingest::run_ingest(&cfg, &archive, &user).await?;
        }
        Commands::Packages => {
            inspect::run_list_packages(&cfg).await?;
        }
        Commands::Search { term } => {
            search::run_search(&cfg, &term).await?;
        }
        Commands::Links { source_id } => {
            inspect::run_links(&cfg, &source_id).await?;
        }
        Commands::Delete { kind, id } => {
            inspect::run_delete(&cfg, kind.into(), &id).await?;
        }
        Commands::Sweep {
            older_than_days,
            keep_latest,
            dry_run,
            yes,
        } => {
            let opts = SweepOptions {
                older_than_days,
                keep_latest,
                dry_run,
                assume_yes: yes,
            };
            tokio::task::spawn_blocking(move || sweep::run_sweep(&cfg, &opts)).await??;
        }
    }

    Ok(())
}
