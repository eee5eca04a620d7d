use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use object_transfer::{Rate, TransferOptions};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub rate_limit: Option<String>,
    pub progress_interval_ms: u64,
    pub progress: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Transfer files to and from an object store")]
pub struct Args {
    /// Directory where objects are stored (overrides OBJECT_TRANSFER_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_TRANSFER_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Throughput cap such as 500k or 2M (overrides OBJECT_TRANSFER_RATE_LIMIT)
    #[arg(long, global = true)]
    pub rate_limit: Option<String>,

    /// Milliseconds between progress updates, 0 for final only
    /// (overrides OBJECT_TRANSFER_PROGRESS_INTERVAL_MS)
    #[arg(long, global = true)]
    pub progress_interval_ms: Option<u64>,

    /// Show a progress bar during transfers
    #[arg(long, global = true)]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a local file
    Upload { file: PathBuf, url: String },
    /// Download an object to a local file
    Download { url: String, file: PathBuf },
    /// List objects under a prefix
    Ls {
        url: String,
        /// Group keys by this delimiter
        #[arg(long)]
        delimiter: Option<String>,
        /// Keys per listing request
        #[arg(long)]
        max_keys: Option<usize>,
    },
    /// Show object metadata as JSON
    Stat { url: String },
    /// Delete an object
    Rm { url: String },
    /// Create a bucket
    Mb { bucket: String },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let cfg = Self::merge(&args)?;
        Ok((cfg, args.command))
    }

    fn merge(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_storage =
            env::var("OBJECT_TRANSFER_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_TRANSFER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_store.db".into());
        let env_rate = env::var("OBJECT_TRANSFER_RATE_LIMIT").ok();
        let env_interval = match env::var("OBJECT_TRANSFER_PROGRESS_INTERVAL_MS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!("parsing OBJECT_TRANSFER_PROGRESS_INTERVAL_MS value `{}`", value)
            })?,
            Err(env::VarError::NotPresent) => 1000,
            Err(err) => return Err(err).context("reading OBJECT_TRANSFER_PROGRESS_INTERVAL_MS"),
        };

        // --- Merge ---
        Ok(Self {
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            rate_limit: args.rate_limit.clone().or(env_rate),
            progress_interval_ms: args.progress_interval_ms.unwrap_or(env_interval),
            progress: args.progress,
        })
    }

    /// Options shared by every transfer, validated up front. The progress
    /// observer is attached by the caller.
    pub fn transfer_options(&self) -> Result<TransferOptions> {
        let mut options =
            TransferOptions::new().with_progress_interval_ms(self.progress_interval_ms);
        if let Some(raw) = self.rate_limit.as_deref().filter(|r| !r.is_empty()) {
            let rate: Rate = raw
                .parse()
                .with_context(|| format!("invalid rate limit `{}`", raw))?;
            options = options.with_rate_limit(rate);
        }
        Ok(options)
    }
}
