//! src/services/local_store.rs
//!
//! LocalStore: an object store backed by SQLite for metadata and local disk
//! for payloads, sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! It speaks the same [`RemoteStore`] contract as a cloud provider would,
//! including quoted-MD5 entity tags and ListObjectsV2-style pagination.

use crate::models::{
    bucket::Bucket,
    metadata::ObjectMetadata,
    object::{Object, ObjectEntry, ObjectHead},
};
use crate::pipeline::hasher::ContentHasher;
use crate::services::store::{
    ByteStream, ListObjectsPage, ListObjectsParams, PutObjectOutput, PutObjectRequest,
    RemoteStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use futures::StreamExt;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalStore {
    /// Create a store over an existing pool. The schema must already exist;
    /// see [`connect`](Self::connect).
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open (creating if needed) the metadata database and payload directory,
    /// then apply the embedded schema.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            info!("Created storage directory at {}", base_path.display());
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }
        debug!("Connecting metadata database {}", database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::new(Arc::new(pool), base_path);
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidObjectKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Bucket names: 3–63 characters of `[A-Za-z0-9_-]`, starting and ending
    /// with a letter or digit.
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "allowed characters are letters, digits, hyphens and underscores",
            ));
        }
        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid("must start and end with a letter or digit"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), to keep directory
    /// sizes bounded.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
             FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    async fn fetch_metadata(&self, object: &Object) -> StoreResult<HashMap<String, String>> {
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|m| (m.key, m.value)).collect())
    }

    /// Live objects after `after` (exclusive), in key order.
    async fn fetch_object_batch(
        &self,
        bucket: &Bucket,
        prefix: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Object>> {
        let prefix = prefix.unwrap_or("");
        let rows = sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
             FROM objects
             WHERE bucket_id = ? AND is_deleted = 0
               AND substr(key, 1, ?) = ?
               AND key > ?
             ORDER BY key ASC
             LIMIT ?",
        )
        .bind(bucket.id)
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(after.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Create a bucket and its directory.
    pub async fn create_bucket(&self, name: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => {
                info!("created bucket {}", name);
                Ok(bucket)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// Stream `body` into `tmp_path`, returning its size and MD5 as hex and
    /// base64. The temp file is removed if the body fails.
    async fn write_payload(
        &self,
        tmp_path: &Path,
        mut body: ByteStream,
    ) -> StoreResult<(u64, String, String)> {
        let mut file = File::create(tmp_path).await?;
        let hasher = ContentHasher::new();
        let mut size_bytes = 0u64;

        let result: io::Result<()> = async {
            let mut tapped = Box::pin(hasher.tap(&mut body));
            while let Some(chunk) = tapped.next().await {
                let chunk = chunk?;
                size_bytes += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StoreError::Io(err));
        }
        let digest = hasher
            .digest()
            .ok_or_else(|| io::Error::other("payload digest unavailable"))?;
        Ok((size_bytes, digest.hex(), digest.base64()))
    }

    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    /// ListObjectsV2 semantics: keys in lexicographic order, grouped by
    /// `delimiter` after `prefix`. A common prefix is reported once across
    /// the whole listing, never repeated on a later page.
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.unwrap_or(DEFAULT_MAX_KEYS).clamp(1, 1000);
        let prefix = params.prefix.as_deref().filter(|p| !p.is_empty());
        let delimiter = params.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut cursor = params
            .continuation_token
            .as_deref()
            .map(decode_continuation_token);
        let mut page = ListObjectsPage::default();
        let mut last_prefix: Option<String> = None;
        let mut last_consumed: Option<String> = None;

        'scan: loop {
            let rows = self
                .fetch_object_batch(&bucket_rec, prefix, cursor.as_deref(), max_keys + 1)
                .await?;
            let exhausted = rows.len() <= max_keys;

            for obj in rows {
                let grouped = delimiter.and_then(|d| compute_common_prefix(&obj.key, prefix, d));
                if grouped.is_some() && grouped == last_prefix {
                    last_consumed = Some(obj.key);
                    continue;
                }
                if page.objects.len() + page.common_prefixes.len() == max_keys {
                    page.is_truncated = true;
                    page.next_continuation_token =
                        last_consumed.as_deref().map(encode_continuation_token);
                    break 'scan;
                }
                match grouped {
                    Some(cp) => {
                        page.common_prefixes.push(cp.clone());
                        last_prefix = Some(cp);
                    }
                    None => page.objects.push(ObjectEntry::from(&obj)),
                }
                last_consumed = Some(obj.key);
            }

            if exhausted {
                break;
            }
            cursor = last_consumed.clone();
        }

        debug!(
            bucket,
            objects = page.objects.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "listed objects"
        );
        Ok(page)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;
        let metadata = self.fetch_metadata(&object).await?;

        Ok(ObjectHead {
            entity_tag: object.quoted_etag(),
            content_length: object.size_bytes.max(0) as u64,
            content_type: object.content_type,
            last_modified: object.last_modified,
            metadata,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(Box::pin(ReaderStream::new(file)))
    }

    /// Stream the body to disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file while hashing.
    /// - Rejects bodies whose length or MD5 differ from what was declared.
    /// - fsyncs, then renames into the final location.
    /// - Replaces the object row and its metadata in one transaction.
    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        let PutObjectRequest {
            bucket,
            key,
            body,
            content_length,
            content_type,
            content_md5,
            metadata,
        } = request;
        self.ensure_key_safe(&key)?;
        let bucket_rec = self.fetch_bucket(&bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, &key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, etag, computed_md5) = self.write_payload(&tmp_path, body).await?;

        if size_bytes != content_length {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::IncompleteBody {
                declared: content_length,
                actual: size_bytes,
            });
        }
        if let Some(declared) = content_md5 {
            if declared != computed_md5 {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::BadDigest {
                    declared,
                    computed: computed_md5,
                });
            }
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        let mut tx = self.db.begin().await?;
        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(&key)
        .bind(content_type)
        .bind(size_bytes as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (meta_key, value) in &metadata {
            sqlx::query("INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)")
                .bind(Uuid::new_v4())
                .bind(object.id)
                .bind(meta_key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(bucket = %bucket, key = %key, size_bytes, "stored object");
        Ok(PutObjectOutput {
            entity_tag: object.quoted_etag(),
        })
    }

    /// Soft-delete an object and remove its payload, pruning empty shard
    /// directories. A missing object is reported as `ObjectNotFound`.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;

        let result =
            sqlx::query("UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ?")
                .bind(key)
                .bind(bucket_rec.id)
                .execute(&*self.db)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// The common prefix `key` rolls up into, if any: the requested prefix plus
/// everything up to and including the first delimiter after it.
fn compute_common_prefix(key: &str, requested_prefix: Option<&str>, delimiter: &str) -> Option<String> {
    let prefix = requested_prefix.unwrap_or("");
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!("{}{}", prefix, &after_prefix[..pos + delimiter.len()]))
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
