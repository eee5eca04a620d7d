use anyhow::{Context, Result};
use futures::{FutureExt, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use object_transfer::{
    ListEntry, LocalStore, ProgressEvent, ProgressObserver, RemoteStore, ScanOptions,
    StoreContext, TransferOptions, TransferReport, TransferService,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::{AppConfig, Command};

/// Renders progress events on an indicatif bar.
struct BarObserver(ProgressBar);

impl BarObserver {
    fn new(label: &str) -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message(label.to_string());
        Self(pb)
    }
}

impl ProgressObserver for BarObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(total) = event.total {
            self.0.set_length(total);
        }
        self.0.set_position(event.bytes_transferred);
        if event.is_done {
            self.0.finish();
        }
    }
}

fn with_bar(cfg: &AppConfig, options: TransferOptions, label: &str) -> TransferOptions {
    if cfg.progress {
        options.with_progress(BarObserver::new(label))
    } else {
        options
    }
}

fn print_report(report: &TransferReport) {
    let status = if report.verification.is_verified() {
        "verified"
    } else {
        "unverified"
    };
    println!(
        "{} -> {} ({} bytes, {:.0} B/s, {})",
        report.source,
        report.destination,
        report.bytes,
        report.bytes_per_second(),
        status
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting object-transfer with config: {:?}", cfg);

    // --- Store is only opened when a command needs it ---
    let local = {
        let db_url = cfg.database_url.clone();
        let storage_dir = cfg.storage_dir.clone();
        move || {
            let db_url = db_url.clone();
            let storage_dir = storage_dir.clone();
            async move { LocalStore::connect(&db_url, storage_dir).await }
        }
    };
    let connect = local.clone();
    let ctx = StoreContext::lazy(move || {
        connect()
            .map(|res| res.map(|store| Arc::new(store) as Arc<dyn RemoteStore>))
            .boxed()
    });
    let service = TransferService::new(ctx);

    match command {
        Command::Upload { file, url } => {
            let options = with_bar(&cfg, cfg.transfer_options()?, &url);
            let report = service
                .upload(&file, &url, &options)
                .await
                .with_context(|| format!("uploading {}", file.display()))?;
            print_report(&report);
        }
        Command::Download { url, file } => {
            let options = with_bar(&cfg, cfg.transfer_options()?, &url);
            let report = service
                .download(&url, &file, &options)
                .await
                .with_context(|| format!("downloading {}", url))?;
            print_report(&report);
        }
        Command::Ls {
            url,
            delimiter,
            max_keys,
        } => {
            let options = ScanOptions {
                delimiter: delimiter.filter(|d| !d.is_empty()),
                max_keys,
            };
            let mut entries = service.scan(&url, options).await?;
            while let Some(entry) = entries.next().await {
                match entry? {
                    ListEntry::Object(obj) => println!(
                        "{}  {:>12}  {}",
                        obj.last_modified.format("%Y-%m-%d %H:%M"),
                        obj.size,
                        obj.key
                    ),
                    ListEntry::CommonPrefix { prefix } => {
                        println!("{:>16}  {:>12}  {}", "", "DIR", prefix)
                    }
                }
            }
        }
        Command::Stat { url } => {
            let stat = service.stat(&url).await?;
            println!("{}", serde_json::to_string_pretty(&stat.merged())?);
        }
        Command::Rm { url } => {
            service.delete(&url).await?;
            println!("deleted {}", url);
        }
        Command::Mb { bucket } => {
            let store = local().await?;
            store.create_bucket(&bucket).await?;
            println!("created bucket {}", bucket);
        }
    }

    Ok(())
}
