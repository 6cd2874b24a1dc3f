mod config;
mod launcher;

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::HeadlessConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    // Simple argument parsing: --config <path> or <path>
    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                config_path = Some(PathBuf::from(path));
            }
        } else if !arg.starts_with('-') {
            config_path = Some(PathBuf::from(arg));
        }
    }

    if config_path.is_none() {
        if let Ok(env_path) = std::env::var("SHEETMIRROR_CONFIG") {
            config_path = Some(PathBuf::from(env_path));
        }
    }

    // Default to ~/.config/sheetmirror/config.yaml if it exists
    if config_path.is_none() {
        if let Some(home) = std::env::var_os("HOME") {
            let mut default_path = PathBuf::from(home);
            default_path.push(".config");
            default_path.push("sheetmirror");
            default_path.push("config.yaml");
            if default_path.exists() {
                config_path = Some(default_path);
            }
        }
    }

    let config = match &config_path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            HeadlessConfig::load_from_file(path)?
        }
        None => HeadlessConfig::default(),
    };

    launcher::run(config.finish()?).await
}
