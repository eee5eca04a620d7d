#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use object_transfer::{
    LocalStore, ObjectHead, RemoteStore, StoreContext, TransferService,
    services::store::{
        ByteStream, ListObjectsPage, ListObjectsParams, PutObjectOutput, PutObjectRequest,
        StoreResult,
    },
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

pub const BUCKET: &str = "test-bucket";

/// A local store in a scratch directory with one bucket, plus a place for
/// local files.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<LocalStore>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/store.db").display());
        let store = LocalStore::connect(&url, dir.path().join("objects"))
            .await
            .unwrap();
        store.create_bucket(BUCKET).await.unwrap();
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        Self {
            dir,
            store: Arc::new(store),
        }
    }

    pub fn service(&self) -> TransferService {
        TransferService::new(StoreContext::new(self.store.clone()))
    }

    /// A service whose store is `wrap` applied to the local store.
    pub fn service_over<S, F>(&self, wrap: F) -> TransferService
    where
        S: RemoteStore + 'static,
        F: FnOnce(Arc<LocalStore>) -> S,
    {
        TransferService::new(StoreContext::new(Arc::new(wrap(self.store.clone()))))
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join("files").join(name)
    }

    pub fn write_file(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, data).unwrap();
        path
    }
}

pub fn url(key: &str) -> String {
    format!("s3://{BUCKET}/{key}")
}

/// Deterministic non-repeating-ish payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub fn file_md5(path: &Path) -> String {
    md5_hex(&std::fs::read(path).unwrap())
}

/// Stores uploads but answers with an entity tag that matches nothing.
pub struct TamperedTags(pub Arc<LocalStore>);

#[async_trait]
impl RemoteStore for TamperedTags {
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        self.0.list_objects(bucket, params).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.0.head_object(bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        self.0.get_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.0.delete_object(bucket, key).await
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        self.0.put_object(request).await?;
        Ok(PutObjectOutput {
            entity_tag: "\"00000000000000000000000000000000\"".into(),
        })
    }
}

/// Reports objects the way a multi-part upload would: a part-count suffix on
/// the entity tag and no recorded content hash.
pub struct MultipartTags(pub Arc<LocalStore>);

#[async_trait]
impl RemoteStore for MultipartTags {
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        self.0.list_objects(bucket, params).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        self.0.get_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.0.delete_object(bucket, key).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        let mut head = self.0.head_object(bucket, key).await?;
        head.entity_tag = format!("\"{}-2\"", head.entity_tag.trim_matches('"'));
        head.metadata.clear();
        Ok(head)
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        let out = self.0.put_object(request).await?;
        Ok(PutObjectOutput {
            entity_tag: format!("\"{}-2\"", out.entity_tag.trim_matches('"')),
        })
    }
}

/// Serves bytes other than the ones stored.
pub struct CorruptReads(pub Arc<LocalStore>);

#[async_trait]
impl RemoteStore for CorruptReads {
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        self.0.list_objects(bucket, params).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.0.head_object(bucket, key).await
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        self.0.put_object(request).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.0.delete_object(bucket, key).await
    }

    async fn get_object(&self, _bucket: &str, _key: &str) -> StoreResult<ByteStream> {
        Ok(Box::pin(stream::iter(vec![Ok(Bytes::from_static(
            b"not what was uploaded",
        ))])))
    }
}

/// Delivers the first few bytes of an object, then drops the connection.
pub struct BrokenReads(pub Arc<LocalStore>);

#[async_trait]
impl RemoteStore for BrokenReads {
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        self.0.list_objects(bucket, params).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.0.head_object(bucket, key).await
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        self.0.put_object(request).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.0.delete_object(bucket, key).await
    }

    async fn get_object(&self, _bucket: &str, _key: &str) -> StoreResult<ByteStream> {
        Ok(Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ])))
    }
}

/// Forwards uploads and remembers the `Content-MD5` each one declared.
pub struct RecordingPuts(pub Arc<LocalStore>, pub Arc<Mutex<Vec<Option<String>>>>);

#[async_trait]
impl RemoteStore for RecordingPuts {
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StoreResult<ListObjectsPage> {
        self.0.list_objects(bucket, params).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.0.head_object(bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        self.0.get_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.0.delete_object(bucket, key).await
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectOutput> {
        self.1.lock().unwrap().push(request.content_md5.clone());
        self.0.put_object(request).await
    }
}
