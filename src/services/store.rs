//! The remote object store as seen by the transfer layer.

use crate::models::object::{ObjectEntry, ObjectHead};
pub use crate::pipeline::ByteStream;
use async_trait::async_trait;
use std::{collections::HashMap, fmt, io};
use thiserror::Error;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// A single-shot object upload.
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: ByteStream,
    pub content_length: u64,
    pub content_type: Option<String>,
    /// Base64 of the raw MD5 of the body.
    pub content_md5: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl fmt::Debug for PutObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjectRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("content_md5", &self.content_md5)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOutput {
    /// Entity tag as returned by the store, quotes included.
    pub entity_tag: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("content MD5 mismatch: declared {declared}, computed {computed}")]
    BadDigest { declared: String, computed: String },
    #[error("body length {actual} does not match declared length {declared}")]
    IncompleteBody { declared: u64, actual: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("remote store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the transfer layer needs from an object store.
///
/// Implementations report failures as they are; nothing in the transfer
/// layer retries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_objects(&self, bucket: &str, params: ListObjectsParams)
    -> StoreResult<ListObjectsPage>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ByteStream>;

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;
}
