//! Folio CLI
//!
//! Command-line interface for Folio - local-first notes with device sync.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use folio_core::{Config, Store};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Folio - Local-first notes with nearby-device sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage pages
    Page {
        #[command(subcommand)]
        command: PageCommands,
    },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// List or manage tags
    Tags {
        #[command(subcommand)]
        command: Option<TagCommands>,
    },
    /// Export the library to an encrypted bundle
    Export {
        /// Bundle file to write
        path: PathBuf,
        /// Passphrase protecting the bundle
        #[arg(short, long, env = "FOLIO_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },
    /// Import an encrypted bundle, replacing the library
    Import {
        /// Bundle file to read
        path: PathBuf,
        /// Passphrase the bundle was exported with
        #[arg(short, long, env = "FOLIO_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },
    /// Advertise this device and accept incoming syncs
    Host {
        /// Stop after this many seconds (runs until Ctrl-C if unset)
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Look for nearby devices
    Scan {
        /// How long to listen, in seconds
        #[arg(long, default_value_t = 3)]
        timeout: u64,
    },
    /// Send the library to a nearby device
    Send {
        /// Device ID (full or prefix) or device name
        device: String,
        /// How long to look for the device, in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Check stored data for corruption
    Doctor {
        /// Rewrite every storage tier from the repaired library
        #[arg(long)]
        repair: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show status (storage tier, device, counts)
    Status,
}

#[derive(Subcommand)]
enum PageCommands {
    /// Create a new page
    #[command(alias = "add")]
    Create {
        /// Page title
        title: String,
        /// Page text, one paragraph per line
        #[arg(short, long)]
        body: Option<String>,
        /// Folder ID (full or prefix)
        #[arg(short, long)]
        folder: Option<String>,
        /// Tags to add
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// List pages
    #[command(alias = "ls")]
    List {
        /// Filter by tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Filter by folder ID (full or prefix)
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// Show a page
    Show {
        /// Page ID (full or prefix)
        id: String,
    },
    /// Change a page's title or text
    Edit {
        /// Page ID (full or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New text, one paragraph per line
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Delete a page
    #[command(alias = "rm")]
    Delete {
        /// Page ID (full or prefix)
        id: String,
    },
    /// Move a page into a folder, or to the top level
    #[command(alias = "mv")]
    Move {
        /// Page ID (full or prefix)
        id: String,
        /// Folder ID (full or prefix); omit to move to the top level
        folder: Option<String>,
    },
    /// Add a tag to a page
    Tag {
        /// Page ID (full or prefix)
        id: String,
        /// Tag name
        tag: String,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    /// Create a new folder
    #[command(alias = "add")]
    Create {
        /// Folder title
        title: String,
    },
    /// List folders
    #[command(alias = "ls")]
    List,
    /// Delete a folder, keeping its pages
    #[command(alias = "rm")]
    Delete {
        /// Folder ID (full or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List all tags
    #[command(alias = "ls")]
    List,
    /// Register a tag or change its color
    Set {
        /// Tag name
        name: String,
        /// Hex color, e.g. #3b82f6
        #[arg(short, long)]
        color: Option<String>,
    },
    /// Remove a tag from the registry and every page
    #[command(alias = "rm")]
    Delete {
        /// Tag name
        name: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, device_name, host_dir, discovery_port, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands don't need the store
    if let Some(Commands::Config { command }) = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    let store = Store::open(config).await?;

    let result = match cli.command {
        Some(Commands::Page { command }) => handle_page_command(command, &store, &output).await,
        Some(Commands::Folder { command }) => {
            handle_folder_command(command, &store, &output).await
        }
        Some(Commands::Tags { command }) => handle_tag_command(command, &store, &output).await,
        Some(Commands::Export { path, passphrase }) => {
            commands::bundle::export(&store, &path, &passphrase, &output).await
        }
        Some(Commands::Import { path, passphrase }) => {
            commands::bundle::import(&store, &path, &passphrase, &output).await
        }
        Some(Commands::Host { duration }) => commands::sync::host(&store, duration, &output).await,
        Some(Commands::Scan { timeout }) => commands::sync::scan(&store, timeout, &output).await,
        Some(Commands::Send { device, timeout }) => {
            commands::sync::send(&store, &device, timeout, &output).await
        }
        Some(Commands::Doctor { repair }) => commands::doctor::run(&store, repair, &output).await,
        Some(Commands::Status) | None => commands::status::show(&store, &output).await,
        Some(Commands::Config { .. }) => unreachable!(), // Handled above
    };

    // Pending writes must land even when the command failed halfway
    let closed = store.close().await;
    result.and(closed)
}

async fn handle_page_command(command: PageCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        PageCommands::Create {
            title,
            body,
            folder,
            tag,
        } => commands::page::create(store, title, body, folder, tag, output).await,
        PageCommands::List { tag, folder } => commands::page::list(store, tag, folder, output),
        PageCommands::Show { id } => commands::page::show(store, id, output),
        PageCommands::Edit { id, title, body } => {
            commands::page::edit(store, id, title, body, output).await
        }
        PageCommands::Delete { id } => commands::page::delete(store, id, output).await,
        PageCommands::Move { id, folder } => commands::page::move_to(store, id, folder, output).await,
        PageCommands::Tag { id, tag } => commands::page::tag(store, id, tag, output).await,
    }
}

async fn handle_folder_command(
    command: FolderCommands,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        FolderCommands::Create { title } => commands::folder::create(store, title, output).await,
        FolderCommands::List => commands::folder::list(store, output),
        FolderCommands::Delete { id } => commands::folder::delete(store, id, output).await,
    }
}

async fn handle_tag_command(
    command: Option<TagCommands>,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        Some(TagCommands::List) | None => commands::tag::list(store, output),
        Some(TagCommands::Set { name, color }) => {
            commands::tag::set(store, name, color, output).await
        }
        Some(TagCommands::Delete { name }) => commands::tag::delete(store, name, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Only initializes if FOLIO_LOG environment variable is set.
/// Logs to config.log_file when set, stderr otherwise.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("FOLIO_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!("folio_core={},folio_cli={}", log_level, log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore the error if a subscriber is already installed
    match config.log_file {
        Some(ref log_path) => match File::create(log_path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(file).try_init();
                info!("Logging to {:?}", log_path);
            }
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            }
        },
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
