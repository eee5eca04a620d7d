//! Incremental MD5 over a byte stream.

use async_stream::try_stream;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// A finished MD5 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentDigest(md5::Digest);

impl ContentDigest {
    /// Lowercase hex, the form entity tags use.
    pub fn hex(&self) -> String {
        format!("{:x}", self.0)
    }

    /// Base64 of the raw 16 bytes, the form `Content-MD5` uses.
    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0.0)
    }
}

struct HasherState {
    context: Option<Context>,
    digest: Option<ContentDigest>,
    bytes: u64,
}

/// Handle to a digest fed by [`ContentHasher::tap`].
///
/// The digest becomes available once the tapped stream has been drained to
/// its end; a stream that failed or was dropped early never produces one.
#[derive(Clone)]
pub struct ContentHasher {
    state: Arc<Mutex<HasherState>>,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HasherState {
                context: Some(Context::new()),
                digest: None,
                bytes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HasherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pass `inner` through unchanged while hashing every byte in order.
    pub fn tap<S>(&self, inner: S) -> impl Stream<Item = io::Result<Bytes>> + Send + use<S>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let hasher = self.clone();
        try_stream! {
            pin_mut!(inner);
            while let Some(chunk) = inner.next().await {
                let chunk = chunk?;
                hasher.consume(&chunk);
                yield chunk;
            }
            hasher.finish();
        }
    }

    fn consume(&self, data: &[u8]) {
        let mut state = self.lock();
        state.bytes += data.len() as u64;
        if let Some(ctx) = state.context.as_mut() {
            ctx.consume(data);
        }
    }

    fn finish(&self) {
        let mut state = self.lock();
        if let Some(ctx) = state.context.take() {
            state.digest = Some(ContentDigest(ctx.compute()));
        }
    }

    /// The digest, once the stream has fully drained.
    pub fn digest(&self) -> Option<ContentDigest> {
        self.lock().digest
    }

    /// Shorthand for the hex digest.
    pub fn hex(&self) -> Option<String> {
        self.digest().map(|d| d.hex())
    }

    /// Bytes observed so far.
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }
}

/// Hash a local file by streaming it once.
pub async fn hash_file(path: &Path) -> io::Result<ContentDigest> {
    let file = File::open(path).await?;
    let hasher = ContentHasher::new();
    let tapped = hasher.tap(ReaderStream::new(file));
    pin_mut!(tapped);
    while let Some(chunk) = tapped.next().await {
        chunk?;
    }
    hasher
        .digest()
        .ok_or_else(|| io::Error::other("hash stream ended without a digest"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const QUICK_FOX_MD5: &str = "9e107d9d372bb6826bd81d3542a419d6";

    #[tokio::test]
    async fn digest_is_independent_of_chunking() {
        let text = b"The quick brown fox jumps over the lazy dog";
        for size in [1, 3, 7, text.len()] {
            let chunks: Vec<io::Result<Bytes>> = text
                .chunks(size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let hasher = ContentHasher::new();
            let out: Vec<Bytes> = hasher
                .tap(stream::iter(chunks))
                .map(|r| r.unwrap())
                .collect()
                .await;
            assert_eq!(out.concat(), text);
            assert_eq!(hasher.hex().as_deref(), Some(QUICK_FOX_MD5));
            assert_eq!(hasher.bytes(), text.len() as u64);
        }
    }

    #[tokio::test]
    async fn no_digest_before_stream_drains() {
        let hasher = ContentHasher::new();
        let tapped = hasher.tap(stream::iter(vec![
            Ok(Bytes::from_static(b"one")),
            Ok(Bytes::from_static(b"two")),
        ]));
        pin_mut!(tapped);
        tapped.next().await.unwrap().unwrap();
        assert!(hasher.digest().is_none());
        while tapped.next().await.is_some() {}
        assert!(hasher.digest().is_some());
    }

    #[tokio::test]
    async fn failed_stream_never_yields_digest() {
        let hasher = ContentHasher::new();
        let out: Vec<io::Result<Bytes>> = hasher
            .tap(stream::iter(vec![
                Ok(Bytes::from_static(b"one")),
                Err(io::Error::other("boom")),
            ]))
            .collect()
            .await;
        assert!(out[1].is_err());
        assert!(hasher.digest().is_none());
    }

    #[test]
    fn base64_of_empty_digest() {
        let digest = ContentDigest(md5::compute(b""));
        assert_eq!(digest.hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digest.base64(), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[tokio::test]
    async fn hashes_a_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"The quick brown fox jumps over the lazy dog")
            .unwrap();
        let digest = hash_file(file.path()).await.unwrap();
        assert_eq!(digest.hex(), QUICK_FOX_MD5);
    }
}
