//! Upload, download, stat, scan and delete over a [`StoreContext`].
//!
//! Transfers are single-shot and linear: one file, one remote object, one
//! pipeline. Nothing is retried and partial artifacts are left where they
//! are; callers decide what to clean up.

use super::{
    context::StoreContext,
    listing::{self, ScanOptions},
    local_file::{read_file_attributes, restore_mode, restore_times},
    store::{PutObjectRequest, StoreError},
};
use crate::{
    errors::{TransferError, TransferResult},
    models::{
        locator::StorageLocator,
        object::{ListEntry, RemoteObjectStat},
        options::TransferOptions,
    },
    pipeline::{Pipeline, StageFailure, hasher::ContentHasher},
};
use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::{fs, fs::File};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Outcome of the post-transfer integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// Content hash matched on both ends.
    Verified { md5: String },
    /// No content hash was available to compare against, typically because
    /// the object was stored in several parts.
    Unverifiable { entity_tag: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub source: String,
    pub destination: String,
    pub bytes: u64,
    pub entity_tag: String,
    pub verification: Verification,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Average throughput over the whole transfer.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return self.bytes as f64;
        }
        self.bytes as f64 / secs
    }
}

#[derive(Clone)]
pub struct TransferService {
    ctx: StoreContext,
}

impl TransferService {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    /// Upload `local_path` to `locator`. A locator naming the container root
    /// or ending in `/` gets the file name appended as the key.
    pub async fn upload(
        &self,
        local_path: &Path,
        locator: &str,
        options: &TransferOptions,
    ) -> TransferResult<TransferReport> {
        let locator = StorageLocator::parse(locator)?;
        let key = upload_key(&locator, local_path)?;
        let src = local_path.display().to_string();
        let dest = format!("{}://{}/{}", locator.scheme(), locator.container(), key);
        let started = Instant::now();

        let attrs = read_file_attributes(local_path, &options.owner)
            .await
            .map_err(|err| TransferError::io(&src, &dest, err))?;
        info!(%src, %dest, size = attrs.size, md5 = %attrs.md5, "upload starting");

        let file = File::open(local_path)
            .await
            .map_err(|err| TransferError::io(&src, &dest, err))?;
        let pipeline = Pipeline::from_source(ReaderStream::new(file))
            .throttle(options.rate_limit)
            .report_progress(options.progress_reporter(attrs.size, &dest));
        let (body, failure) = pipeline.into_body();

        let store = self.ctx.store().await?;
        let request = PutObjectRequest {
            bucket: locator.container().to_string(),
            key,
            body,
            content_length: attrs.size,
            content_type: attrs.content_type.clone(),
            content_md5: Some(attrs.content_md5.clone()),
            metadata: attrs.to_metadata(),
        };
        let output = store
            .put_object(request)
            .await
            .map_err(|err| stage_or_remote(&failure, &src, &dest, err))?;

        let expected = format!("\"{}\"", attrs.md5);
        let verification = if output.entity_tag.contains('-') {
            warn!(%dest, entity_tag = %output.entity_tag, "multipart entity tag, upload cannot be verified");
            Verification::Unverifiable {
                entity_tag: output.entity_tag.clone(),
            }
        } else if output.entity_tag != expected {
            return Err(TransferError::Integrity {
                src,
                dest,
                expected,
                actual: output.entity_tag,
            });
        } else {
            Verification::Verified {
                md5: attrs.md5.clone(),
            }
        };

        let report = TransferReport {
            source: src,
            destination: dest,
            bytes: attrs.size,
            entity_tag: output.entity_tag,
            verification,
            elapsed: started.elapsed(),
        };
        info!(
            src = %report.source,
            dest = %report.destination,
            bytes = report.bytes,
            verified = report.verification.is_verified(),
            "upload finished"
        );
        Ok(report)
    }

    /// Download `locator` to `dest_path`. An existing directory as
    /// destination receives a file named after the last key segment.
    ///
    /// On an integrity failure the written file stays in place.
    pub async fn download(
        &self,
        locator: &str,
        dest_path: &Path,
        options: &TransferOptions,
    ) -> TransferResult<TransferReport> {
        let parsed = object_locator(locator)?;
        let src = parsed.to_string();
        let dest_path = download_path(&parsed, dest_path).await;
        let dest = dest_path.display().to_string();
        let started = Instant::now();

        let stat = self.stat_object(&parsed).await?;
        let expected = stat.expected_md5();
        if expected.is_none() {
            warn!(
                %src,
                entity_tag = stat.entity_tag(),
                "no content hash recorded for object, download cannot be verified"
            );
        }
        info!(%src, %dest, size = stat.content_length(), "download starting");

        let store = self.ctx.store().await?;
        let body = store.get_object(parsed.container(), parsed.key()).await?;

        let hasher = ContentHasher::new();
        let pipeline = Pipeline::from_source(body)
            .hash(&hasher)
            .throttle(options.rate_limit)
            .report_progress(options.progress_reporter(stat.content_length(), &src));
        debug!(stages = ?pipeline.stages(), "download pipeline");

        let io_err = |err: io::Error| TransferError::io(&src, &dest, err);
        let mut file = File::create(&dest_path).await.map_err(io_err)?;
        let written = pipeline.drain_into(&mut file).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        let actual = hasher
            .hex()
            .ok_or_else(|| io_err(io::Error::other("download stream ended without a digest")))?;

        let verification = match expected {
            Some(expected) if expected != actual => {
                return Err(TransferError::Integrity {
                    src,
                    dest,
                    expected,
                    actual,
                });
            }
            Some(_) => Verification::Verified { md5: actual },
            None => Verification::Unverifiable {
                entity_tag: stat.entity_tag().to_string(),
            },
        };

        if let Some(mode) = stat.mode() {
            restore_mode(&dest_path, mode).await.map_err(io_err)?;
        }
        if let (Some(atime), Some(mtime)) = (stat.atime(), stat.mtime()) {
            restore_times(&dest_path, atime, mtime)
                .await
                .map_err(io_err)?;
        }

        let report = TransferReport {
            source: src,
            destination: dest,
            bytes: written,
            entity_tag: stat.entity_tag().to_string(),
            verification,
            elapsed: started.elapsed(),
        };
        info!(
            src = %report.source,
            dest = %report.destination,
            bytes = report.bytes,
            verified = report.verification.is_verified(),
            "download finished"
        );
        Ok(report)
    }

    /// Head the object and unpack its attributes.
    pub async fn stat(&self, locator: &str) -> TransferResult<RemoteObjectStat> {
        let parsed = object_locator(locator)?;
        self.stat_object(&parsed).await
    }

    async fn stat_object(&self, locator: &StorageLocator) -> TransferResult<RemoteObjectStat> {
        let store = self.ctx.store().await?;
        let head = store.head_object(locator.container(), locator.key()).await?;
        Ok(RemoteObjectStat::from_head(head))
    }

    /// Lazily list everything under `locator`. See [`listing::scan`].
    pub async fn scan(
        &self,
        locator: &str,
        options: ScanOptions,
    ) -> TransferResult<BoxStream<'static, TransferResult<ListEntry>>> {
        let parsed = StorageLocator::parse(locator)?;
        let store = self.ctx.store().await?;
        Ok(listing::scan(store, parsed, options).boxed())
    }

    /// Delete the object. Whatever the store reports is returned as is.
    pub async fn delete(&self, locator: &str) -> TransferResult<()> {
        let parsed = object_locator(locator)?;
        let store = self.ctx.store().await?;
        store.delete_object(parsed.container(), parsed.key()).await?;
        info!(object = %parsed, "deleted");
        Ok(())
    }
}

/// Parse a locator that must name an object, not a container.
fn object_locator(input: &str) -> TransferResult<StorageLocator> {
    let parsed = StorageLocator::parse(input)?;
    if parsed.is_root() {
        return Err(TransferError::InvalidAddress(input.to_string()));
    }
    Ok(parsed)
}

fn upload_key(locator: &StorageLocator, local_path: &Path) -> TransferResult<String> {
    let key = locator.key();
    if !key.is_empty() && !key.ends_with('/') {
        return Ok(key.to_string());
    }
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::InvalidAddress(locator.to_string()))?;
    Ok(format!("{key}{name}"))
}

async fn download_path(locator: &StorageLocator, dest: &Path) -> PathBuf {
    let is_dir = fs::metadata(dest).await.is_ok_and(|m| m.is_dir());
    let name = locator.key().rsplit('/').next().unwrap_or(locator.key());
    if is_dir && !name.is_empty() {
        dest.join(name)
    } else {
        dest.to_path_buf()
    }
}

/// Prefer the pipeline's own failure over the store's view of it.
fn stage_or_remote(failure: &StageFailure, src: &str, dest: &str, err: StoreError) -> TransferError {
    match failure.take() {
        Some(cause) => TransferError::io(src, dest, cause),
        None => TransferError::Remote(err),
    }
}
