//! ModelShare RPC Server - JSON-RPC backend for the presentation layer.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the modelshare-core
//! library. Settings come from the config file, then flags and environment.

mod handlers;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use modelshare_core::{ModelShareApi, ModelShareConfig, RuntimeId};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "modelshare-rpc")]
#[command(about = "JSON-RPC server for ModelShare")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Configuration file (defaults to <config dir>/modelshare/config.json)
    #[arg(long, env = "MODELSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Central store directory
    #[arg(long, env = "MODELSHARE_STORE")]
    central_store: Option<PathBuf>,

    /// Ollama API address
    #[arg(long, env = "OLLAMA_HOST")]
    ollama_host: Option<String>,

    /// Ollama models directory
    #[arg(long, env = "OLLAMA_MODELS")]
    ollama_models: Option<PathBuf>,

    /// LM Studio API address
    #[arg(long, env = "LMSTUDIO_HOST")]
    lmstudio_host: Option<String>,

    /// LM Studio models directory
    #[arg(long, env = "LMSTUDIO_MODELS")]
    lmstudio_models: Option<PathBuf>,

    /// Copy files into LM Studio instead of linking them
    #[arg(long)]
    copy_installs: bool,

    /// Register untracked files found in the central store at startup
    #[arg(long)]
    adopt_orphans: bool,
}

impl Args {
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join("modelshare").join("config.json")))
    }

    /// Layer command-line and environment settings over the file.
    fn apply(&self, config: &mut ModelShareConfig) {
        if let Some(store) = &self.central_store {
            config.central_store = Some(store.clone());
        }
        let overrides = [
            (RuntimeId::Ollama, &self.ollama_host, &self.ollama_models),
            (RuntimeId::LmStudio, &self.lmstudio_host, &self.lmstudio_models),
        ];
        for (runtime, host, models) in overrides {
            let runtime_config = config.runtime_mut(runtime);
            if let Some(host) = host {
                runtime_config.base_url = Some(with_scheme(host));
            }
            if let Some(models) = models {
                runtime_config.storage_root = Some(models.clone());
            }
        }
        if self.copy_installs {
            config.link_installs = false;
        }
    }
}

/// `OLLAMA_HOST` is commonly set as a bare `host:port`.
fn with_scheme(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG takes precedence over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting ModelShare RPC Server");

    let mut config = match args.config_path() {
        Some(path) => {
            info!("Config file: {}", path.display());
            ModelShareConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => ModelShareConfig::default(),
    };
    args.apply(&mut config);

    let api = ModelShareApi::builder(config)
        .create_store(true)
        .adopt_orphans(args.adopt_orphans)
        .build()
        .await
        .context("Failed to initialize ModelShare")?;

    let addr = server::start_server(api, &args.host, args.port).await?;

    // Print port for the parent process to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_scheme() {
        assert_eq!(with_scheme("0.0.0.0:11434"), "http://0.0.0.0:11434");
        assert_eq!(with_scheme("https://ollama.lan"), "https://ollama.lan");
    }

    #[test]
    fn test_flags_override_config_file() {
        let args = Args::parse_from([
            "modelshare-rpc",
            "--ollama-host",
            "10.0.0.2:11434",
            "--lmstudio-models",
            "/data/lms",
            "--copy-installs",
        ]);
        let mut config = ModelShareConfig {
            central_store: Some(PathBuf::from("/data/store")),
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.base_url(RuntimeId::Ollama), "http://10.0.0.2:11434");
        assert_eq!(
            config.lmstudio.storage_root.as_deref(),
            Some(std::path::Path::new("/data/lms"))
        );
        assert_eq!(config.central_store, Some(PathBuf::from("/data/store")));
        assert!(!config.link_installs);
        assert!(config.validate().is_ok());
    }
}
