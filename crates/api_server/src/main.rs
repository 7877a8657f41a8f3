use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use api_server::ApiState;
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigStore};
use i18n::I18n;
use kb_services::{ChatOptions, KnowledgeBase, LocalBlobStore};
use provider_openai::OpenAiCompatibleAdapter;
use storage_sqlite::SqliteStorage;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "quire", version, about = "Personal knowledge-base server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Overrides `server.bind` from the config file.
        #[arg(long, env = "QUIRE_BIND")]
        bind: Option<String>,
        #[arg(long, env = "QUIRE_CONFIG_DIR")]
        config_dir: Option<PathBuf>,
        /// Base for relative database, upload and log paths.
        #[arg(long, env = "QUIRE_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
    /// Write the default config file if none exists and print its path.
    InitConfig {
        #[arg(long, env = "QUIRE_CONFIG_DIR")]
        config_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve {
            bind,
            config_dir,
            data_dir,
        } => {
            let config = config_store(config_dir)?.load_or_init()?;
            let data_dir = match data_dir {
                Some(dir) => dir,
                None => default_data_dir()?,
            };
            let _guard = init_logging(&config.log_dir(&data_dir), &config.logging.filter);
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            serve(config, &data_dir, &bind).await
        }
        Command::InitConfig { config_dir } => {
            let store = config_store(config_dir)?;
            store.load_or_init()?;
            println!("{}", store.path().display());
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, data_dir: &Path, bind: &str) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let database_path = config.database_path(data_dir);
    if let Some(parent) = database_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let upload_dir = config.upload_dir(data_dir);
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .with_context(|| format!("failed to create {}", upload_dir.display()))?;

    let storage = SqliteStorage::connect(&database_path).await?;
    let provider = OpenAiCompatibleAdapter::new(Duration::from_secs(
        config.chat.request_timeout_secs,
    ))?;
    let kb = KnowledgeBase::new(
        storage,
        Arc::new(LocalBlobStore::new(&upload_dir)),
        Arc::new(provider),
    )
    .with_chat_options(ChatOptions {
        system_prompt: config.chat.system_prompt.clone(),
        knowledge_base_hint: config.chat.knowledge_base_hint.clone(),
    })
    .with_max_upload_bytes(config.uploads.max_bytes);

    tracing::info!(
        database = %database_path.display(),
        uploads = %upload_dir.display(),
        "knowledge base ready"
    );
    let state = ApiState::new(
        kb,
        I18n::new(config.language),
        config.identity.default_owner.clone(),
    );
    api_server::serve(Arc::new(state), bind).await
}

fn config_store(config_dir: Option<PathBuf>) -> Result<ConfigStore> {
    match config_dir {
        Some(dir) => Ok(ConfigStore::from_dir(dir)),
        None => ConfigStore::from_default_location(),
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let mut dir = dirs::data_local_dir().context("failed to resolve data_local_dir")?;
    dir.push("quire");
    Ok(dir)
}

/// JSON lines into a daily file, human-readable lines on stderr.
fn init_logging(log_dir: &Path, default_filter: &str) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "quire.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    guard
}
