use clap::{Parser, Subcommand};
use cursor_chat_export::automation::Automator;
use cursor_chat_export::exporter::{self, ExportFormat};
use cursor_chat_export::extract;
use cursor_chat_export::format::ChatFormatter;
use cursor_chat_export::importer::short_id;
use cursor_chat_export::project::{ProjectNamer, workspace_project};
use cursor_chat_export::server::{self, AppState, ServerConfig};
use cursor_chat_export::store::{Store, Table};
use cursor_chat_export::utils;
use cursor_chat_export::workspace::StorageLayout;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Browse and export Cursor AI chat history.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Cursor storage root (the directory containing `User/`).
    /// Auto-detected if omitted.
    #[arg(long, value_name = "PATH", global = true)]
    root: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/cursor-chat-export/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve {
        /// Address to bind. Defaults to 127.0.0.1.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind. Defaults to 5000.
        #[arg(long)]
        port: Option<u16>,

        /// Directory with a built frontend to serve for non-API paths.
        #[arg(long, value_name = "DIR")]
        frontend: Option<PathBuf>,
    },
    /// List chat sessions, most recent first.
    List {
        /// Print the formatted chats as JSON instead of one line each.
        #[arg(long)]
        json: bool,
    },
    /// Export one chat session to a file.
    Export {
        /// Session id (a unique prefix is enough).
        session_id: String,

        /// Directory to write into. Defaults to the current directory.
        #[arg(value_name = "TARGET_DIR")]
        target_dir: Option<PathBuf>,

        /// html, json or markdown.
        #[arg(long, default_value = "html")]
        format: ExportFormat,
    },
    /// Show what the storage databases contain.
    Diagnose,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    storage_root: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    frontend_dir: Option<PathBuf>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("cursor-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve storage root (CLI > Config > Auto-detect)
    let layout = cli
        .root
        .or(file_cfg.storage_root)
        .map(StorageLayout::new)
        .or_else(StorageLayout::detect)
        .ok_or_else(|| {
            eyre!("Could not determine the Cursor storage directory.\nUse --root to specify it manually, or set storage_root in config.toml.")
        })?;
    if !layout.root().exists() {
        tracing::warn!(root = %layout.root().display(), "Cursor storage directory does not exist");
    }
    let namer = ProjectNamer::from_env();

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        frontend: None,
    }) {
        Command::Serve {
            host,
            port,
            frontend,
        } => {
            // CLI > Config > Default
            let defaults = ServerConfig::default();
            let config = ServerConfig {
                host: host.or(file_cfg.host).unwrap_or(defaults.host),
                port: port.or(file_cfg.port).unwrap_or(defaults.port),
                frontend_dir: frontend.or(file_cfg.frontend_dir),
            };
            let state = AppState::new(layout.clone(), namer, Automator::system(layout));
            let runtime = tokio::runtime::Runtime::new().wrap_err("Failed to start runtime")?;
            runtime.block_on(server::serve(config, state))
        }
        Command::List { json } => list(&layout, &namer, json),
        Command::Export {
            session_id,
            target_dir,
            format,
        } => export(&layout, &namer, &session_id, target_dir, format),
        Command::Diagnose => diagnose(&layout, &namer),
    }
}

fn list(layout: &StorageLayout, namer: &ProjectNamer, json: bool) -> Result<()> {
    let chats = extract::extract_chats(layout, namer);
    let formatted = ChatFormatter::new(namer, layout).format_all(&chats);
    if json {
        let out = serde_json::to_string_pretty(&formatted).wrap_err("Failed to serialize chats")?;
        println!("{out}");
        return Ok(());
    }
    for chat in &formatted {
        println!(
            "{}  {}  {:<24}  {:>4} msgs  {}",
            short_id(&chat.session_id),
            utils::format_epoch_secs(chat.date),
            chat.project.name,
            chat.messages.len(),
            chat.title
        );
    }
    if formatted.is_empty() {
        println!("No chats found under {}", layout.root().display());
    }
    Ok(())
}

fn export(
    layout: &StorageLayout,
    namer: &ProjectNamer,
    session_id: &str,
    target_dir: Option<PathBuf>,
    format: ExportFormat,
) -> Result<()> {
    let chats = extract::extract_chats(layout, namer);
    let chat = extract::find_chat_by_prefix(&chats, session_id)?;

    let formatted = ChatFormatter::new(namer, layout).format(chat);
    let target_dir = target_dir.unwrap_or_else(|| PathBuf::from("."));
    let path = exporter::export_to_dir(&formatted, &target_dir, format)?;
    println!("{}", path.display());
    Ok(())
}

fn diagnose(layout: &StorageLayout, namer: &ProjectNamer) -> Result<()> {
    println!("Storage root: {}", layout.root().display());
    let workspaces = layout.workspaces();
    println!("Workspaces: {}", workspaces.len());

    let first = workspaces.first().map(|w| ("workspace", w.id.clone(), w.db_path.clone()));
    let global = layout.global_db().map(|p| ("global", "(global)".to_string(), p));

    for (kind, id, path) in first.into_iter().chain(global) {
        println!();
        println!("[{kind}] {id}");
        println!("  db: {}", path.display());
        let store = match Store::open(&path) {
            Ok(store) => store,
            Err(e) => {
                println!("  unreadable: {e:#}");
                continue;
            }
        };
        println!("  tables: {}", store.tables().join(", "));
        if kind == "workspace" {
            let project = workspace_project(&store, namer);
            println!("  project: {} ({})", project.name, project.root_path);
        }
        for table in [Table::ItemTable, Table::CursorDiskKv] {
            if !store.has_table(table) {
                continue;
            }
            let mut keys = store.keys_like(table, "%chat%");
            keys.extend(store.keys_like(table, "%composer%"));
            keys.extend(store.keys_like(table, "aiService.%"));
            keys.sort();
            keys.dedup();
            println!("  {} AI-related keys: {}", table.name(), keys.len());
            for key in keys.iter().take(20) {
                println!("    {key}");
            }
            if keys.len() > 20 {
                println!("    ... {} more", keys.len() - 20);
            }
        }
    }
    Ok(())
}
