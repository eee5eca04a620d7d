//! Lazy, page-at-a-time listing of objects under a locator.

use crate::{
    errors::TransferResult,
    models::{locator::StorageLocator, object::ListEntry},
    services::store::{ListObjectsParams, RemoteStore},
};
use async_stream::try_stream;
use futures::Stream;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Groups keys into one entry per directory level; empty means none.
    pub delimiter: Option<String>,
    /// Page size hint passed to the store.
    pub max_keys: Option<usize>,
}

impl ScanOptions {
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into()).filter(|d: &String| !d.is_empty());
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

/// Every entry under `locator`, fetching the next page only once the
/// consumer has taken all entries of the previous one. Within a page,
/// objects come before common prefixes. The sequence ends after a page
/// that carries no continuation token.
pub fn scan(
    store: Arc<dyn RemoteStore>,
    locator: StorageLocator,
    options: ScanOptions,
) -> impl Stream<Item = TransferResult<ListEntry>> + Send {
    try_stream! {
        let prefix = (!locator.is_root()).then(|| locator.key().to_string());
        let delimiter = options.delimiter.filter(|d| !d.is_empty());
        let mut token: Option<String> = None;
        let mut page_no = 0usize;

        loop {
            let page = store
                .list_objects(
                    locator.container(),
                    ListObjectsParams {
                        prefix: prefix.clone(),
                        delimiter: delimiter.clone(),
                        continuation_token: token.take(),
                        max_keys: options.max_keys,
                    },
                )
                .await?;
            page_no += 1;
            debug!(
                container = locator.container(),
                page = page_no,
                objects = page.objects.len(),
                prefixes = page.common_prefixes.len(),
                truncated = page.is_truncated,
                "fetched listing page"
            );

            for object in page.objects {
                yield ListEntry::Object(object);
            }
            for prefix in page.common_prefixes {
                yield ListEntry::CommonPrefix { prefix };
            }

            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
    }
}
