use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_base_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image upload service for profiles and listings")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides IMAGE_SERVICE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL prepended to storage keys in responses
    /// (overrides IMAGE_SERVICE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("IMAGE_SERVICE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing IMAGE_SERVICE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading IMAGE_SERVICE_PORT"),
        };
        let env_storage =
            env::var("IMAGE_SERVICE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("IMAGE_SERVICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/image_service.db".into());
        let env_public_base = env::var("IMAGE_SERVICE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public_base),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Externally reachable URL for a storage key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}
