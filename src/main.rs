// ABOUTME: CLI entry point for seren-snapshot
// ABOUTME: Parses commands, builds the run configuration and routes to handlers

use clap::{Args, Parser, Subcommand};
use seren_snapshot::codec::Format;
use seren_snapshot::commands;
use seren_snapshot::config::{Overrides, SyncConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seren-snapshot")]
#[command(about = "Dependency-ordered database snapshot export and import", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML profile with [connection], [snapshot], [tables] and [import] sections
    #[arg(long)]
    config: Option<PathBuf>,
    /// Database driver: mysql, mariadb, postgres or postgresql
    #[arg(long)]
    driver: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    database: Option<String>,
    /// Root directory of the snapshot store
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Snapshot key prefix inside the store
    #[arg(long)]
    prefix: Option<String>,
    /// Include only these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,
    /// Exclude these tables entirely (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_tables: Vec<String>,
    /// Skip DDL for these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_table_schema: Vec<String>,
    /// Skip data for these tables (comma-separated)
    #[arg(long, value_delimiter = ',')]
    exclude_table_data: Vec<String>,
    /// Skip schema export/import
    #[arg(long)]
    no_schema: bool,
    /// Rows per chunk
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Continue from the saved checkpoint of a previous run
    #[arg(long)]
    resume: bool,
    /// Continue from an explicit cursor: <table_index>:<chunk_index>
    #[arg(long)]
    resume_from: Option<String>,
}

impl CommonArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            profile: self.config,
            driver: self.driver,
            host: self.host,
            port: self.port,
            user: self.user,
            password: self.password,
            database: self.database,
            dir: self.dir,
            prefix: self.prefix,
            chunk_size: self.chunk_size,
            tables: self.tables,
            exclude_tables: self.exclude_tables,
            exclude_table_schema: self.exclude_table_schema,
            exclude_table_data: self.exclude_table_data,
            no_schema: self.no_schema,
            resume: self.resume,
            resume_from: self.resume_from,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Export schema and data to the snapshot store
    Export {
        #[command(flatten)]
        common: CommonArgs,
        /// Data artifact format
        #[arg(long, value_enum)]
        format: Option<Format>,
        /// Also export rows of views
        #[arg(long)]
        include_view_data: bool,
        /// Bundle the artifacts into a .zip archive
        #[arg(long)]
        archive: bool,
    },
    /// Import a snapshot into the database
    Import {
        #[command(flatten)]
        common: CommonArgs,
        /// Format to use when the snapshot has no manifest
        #[arg(long, value_enum)]
        format: Option<Format>,
        /// Empty each table before loading it
        #[arg(long)]
        truncate: bool,
        /// Insert or update on primary key conflicts
        #[arg(long)]
        upsert: bool,
        /// Restore from the latest .zip archive under the prefix
        #[arg(long)]
        archive: bool,
        /// Restore from this archive key
        #[arg(long)]
        archive_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            common,
            format,
            include_view_data,
            archive,
        } => {
            let config = SyncConfig::load(Overrides {
                format,
                include_view_data,
                archive,
                ..common.into_overrides()
            })?;
            commands::export(config).await.map(|_| ())
        }
        Commands::Import {
            common,
            format,
            truncate,
            upsert,
            archive,
            archive_key,
        } => {
            let config = SyncConfig::load(Overrides {
                format,
                truncate,
                upsert,
                archive,
                archive_key,
                ..common.into_overrides()
            })?;
            commands::import(config).await.map(|_| ())
        }
    }
}
