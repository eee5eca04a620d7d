//! Inspecting local files before upload and restoring their attributes after
//! download.

use crate::{
    models::attributes::{FileAttributes, OwnerIdentity},
    pipeline::hasher::hash_file,
};
use filetime::FileTime;
use std::{
    fs::Metadata,
    io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::fs;
use tracing::debug;

/// Stat and hash `path`. The file is read once in full.
pub async fn read_file_attributes(path: &Path, owner: &OwnerIdentity) -> io::Result<FileAttributes> {
    let meta = fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    let digest = hash_file(path).await?;

    Ok(FileAttributes {
        uid: owner.uid,
        uname: owner.uname.clone(),
        gid: owner.gid,
        gname: owner.gname.clone(),
        atime: epoch_millis(meta.accessed().ok()),
        mtime: epoch_millis(meta.modified().ok()),
        ctime: change_time_millis(&meta),
        size: meta.len(),
        mode: file_mode(&meta),
        md5: digest.hex(),
        content_md5: digest.base64(),
        content_type: guess_content_type(path),
    })
}

/// MIME type from the file extension; `None` when it is not recognised.
pub fn guess_content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

fn epoch_millis(time: Option<SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn change_time_millis(meta: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000
}

#[cfg(not(unix))]
fn change_time_millis(meta: &Metadata) -> i64 {
    epoch_millis(meta.modified().ok())
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() { 0o100444 } else { 0o100644 }
}

/// Apply permission bits (file type bits are masked off).
pub async fn restore_mode(path: &Path, mode: u32) -> io::Result<()> {
    let bits = mode & 0o777;
    debug!(path = %path.display(), mode = %format!("{bits:o}"), "restoring mode");
    set_permission_bits(path, bits).await
}

#[cfg(unix)]
async fn set_permission_bits(path: &Path, bits: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(bits)).await
}

#[cfg(not(unix))]
async fn set_permission_bits(path: &Path, bits: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path).await?.permissions();
    perms.set_readonly(bits & 0o200 == 0);
    fs::set_permissions(path, perms).await
}

/// Set access and modify times, both given in epoch milliseconds.
pub async fn restore_times(path: &Path, atime_ms: i64, mtime_ms: i64) -> io::Result<()> {
    debug!(path = %path.display(), atime_ms, mtime_ms, "restoring times");
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_times(&path, file_time(atime_ms), file_time(mtime_ms))
    })
    .await
    .map_err(io::Error::other)?
}

fn file_time(ms: i64) -> FileTime {
    FileTime::from_unix_time(ms.div_euclid(1000), (ms.rem_euclid(1000) * 1_000_000) as u32)
}
