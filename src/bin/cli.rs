//! jplearn-sync CLI
//!
//! Inspect and drive Google Drive sync for a local vocabulary library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jplearn::storage::{AppStore, FileStore};
use jplearn::sync::{
    AlwaysOnline, ConsentFlow, DriveConfig, GoogleDriveStore, GoogleTokenRevoker, NoConsentFlow,
    StaticTokenFlow, SyncEngine, TokenCredentials,
};
use jplearn::types::{NewWord, WordKind};
use jplearn::{Library, SyncSettings};

#[derive(Parser)]
#[command(name = "jplearn-sync")]
#[command(about = "Google Drive sync for the Japanese vocabulary library")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, env = "JPLEARN_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync status
    Status,
    /// Sync now
    Sync,
    /// Enable sync with an OAuth access token from the consent screen
    Enable {
        /// Access token with the drive.file scope
        #[arg(long, env = "JPLEARN_ACCESS_TOKEN")]
        token: String,
        /// Token lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: u64,
    },
    /// Disable sync and revoke the token
    Disable {
        /// Also delete the file from Drive
        #[arg(long)]
        delete_remote: bool,
    },
    /// Export a backup file
    Export {
        /// Output file (- for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,
    },
    /// Import a backup file, replacing local data
    Import {
        file: String,
    },
    /// Add a vocabulary entry
    Add {
        japanese: String,
        romanji: String,
        english: String,
        #[arg(short, long, default_value = "1")]
        day: u32,
        /// Store as a sentence
        #[arg(long)]
        sentence: bool,
    },
}

fn data_dir(arg: Option<String>) -> anyhow::Result<PathBuf> {
    match arg {
        Some(dir) => Ok(PathBuf::from(shellexpand::tilde(&dir).to_string())),
        None => dirs::data_dir()
            .map(|dir| dir.join("jplearn"))
            .context("no platform data directory; pass --data-dir"),
    }
}

fn build_engine(
    store: Arc<AppStore>,
    settings: &SyncSettings,
    flow: Arc<dyn ConsentFlow>,
) -> anyhow::Result<SyncEngine> {
    let revoker = GoogleTokenRevoker::new(settings.http_timeout)?;
    let credentials = Arc::new(
        TokenCredentials::new(flow, settings.token_safety_margin).with_revoker(Arc::new(revoker)),
    );
    let remote = GoogleDriveStore::new(DriveConfig::from_settings(settings), credentials.clone())?;

    Ok(SyncEngine::new(
        store,
        Arc::new(remote),
        credentials,
        Arc::new(AlwaysOnline),
        settings.clone(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dir = data_dir(cli.data_dir)?;
    let kv = FileStore::open(dir.clone())
        .with_context(|| format!("opening data directory {}", dir.display()))?;
    let store = Arc::new(AppStore::new(Arc::new(kv)));
    let settings = SyncSettings::from_env()?;

    let flow: Arc<dyn ConsentFlow> = match &cli.command {
        Commands::Enable { token, expires_in } => {
            Arc::new(StaticTokenFlow::new(token.clone(), *expires_in))
        }
        _ => Arc::new(NoConsentFlow),
    };
    let engine = build_engine(store.clone(), &settings, flow)?;
    let library = Library::new(store, engine.trigger_handle());

    match cli.command {
        Commands::Status => {
            engine.load()?;
            print_json(&engine.status()?)?;
        }

        Commands::Sync => {
            if !engine.load()? {
                anyhow::bail!("sync is not enabled; run `jplearn-sync enable` first");
            }
            let report = engine.manual_sync().await?;
            print_json(&report)?;
            print_json(&engine.retry_stats())?;
        }

        Commands::Enable { .. } => {
            let report = engine.enable_sync().await?;
            println!("Sync enabled");
            print_json(&report)?;
        }

        Commands::Disable { delete_remote } => {
            engine.load()?;
            engine.disable_sync(delete_remote).await?;
            println!("Sync disabled");
        }

        Commands::Export { output } => {
            let json = serde_json::to_string_pretty(&library.export_data()?)?;
            if output == "-" {
                println!("{json}");
            } else {
                let path = shellexpand::tilde(&output).to_string();
                std::fs::write(&path, json).with_context(|| format!("writing {path}"))?;
                println!("Exported to {path}");
            }
        }

        Commands::Import { file } => {
            let path = shellexpand::tilde(&file).to_string();
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            let export = library.import_data(&json)?;
            println!("Imported {} entries", export.data.words.len());
        }

        Commands::Add {
            japanese,
            romanji,
            english,
            day,
            sentence,
        } => {
            let word = library.add_word(NewWord {
                japanese,
                romanji,
                english,
                day,
                kind: if sentence {
                    WordKind::Sentence
                } else {
                    WordKind::Word
                },
            })?;
            println!("Added {}", word.id);
        }
    }

    let pending = engine.status()?.pending_count;
    if pending > 0 {
        eprintln!("{pending} change(s) queued for the next sync");
    }
    engine.shutdown();
    Ok(())
}
