//! Objects as the store records them and as the client sees them.

use super::attributes::{AttrMap, AttrValue, unpack_metadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// A stored object row in the local store's metadata database.
///
/// The row describes the payload; the bytes themselves live on disk.
#[derive(Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Lowercase hex MD5 of the payload, unquoted.
    pub etag: String,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,

    /// Whether the object is marked as deleted (soft delete).
    pub is_deleted: bool,
}

impl Object {
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

/// One object in a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Entity tag exactly as the store reports it (quoted).
    pub entity_tag: String,
    pub last_modified: DateTime<Utc>,
}

impl From<&Object> for ObjectEntry {
    fn from(obj: &Object) -> Self {
        Self {
            key: obj.key.clone(),
            size: obj.size_bytes.max(0) as u64,
            entity_tag: obj.quoted_etag(),
            last_modified: obj.last_modified,
        }
    }
}

/// An item produced by a listing: either an object or, when a delimiter is
/// in effect, one grouped directory level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListEntry {
    Object(ObjectEntry),
    CommonPrefix { prefix: String },
}

impl ListEntry {
    /// The key or prefix this entry stands for.
    pub fn name(&self) -> &str {
        match self {
            Self::Object(obj) => &obj.key,
            Self::CommonPrefix { prefix } => prefix,
        }
    }
}

/// Native response of a head request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectHead {
    pub entity_tag: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Head response merged with the packed file attributes it carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteObjectStat {
    #[serde(flatten)]
    pub head: ObjectHead,
    pub attributes: AttrMap,
}

impl RemoteObjectStat {
    pub fn from_head(head: ObjectHead) -> Self {
        let attributes = unpack_metadata(&head.metadata);
        Self { head, attributes }
    }

    fn attr_int(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(AttrValue::as_int)
    }

    pub fn entity_tag(&self) -> &str {
        &self.head.entity_tag
    }

    /// Entity tag without surrounding quotes.
    pub fn bare_entity_tag(&self) -> &str {
        self.head.entity_tag.trim_matches('"')
    }

    /// True when the entity tag comes from a multi-part upload and is not a
    /// content hash.
    pub fn is_multipart(&self) -> bool {
        self.head.entity_tag.contains('-')
    }

    pub fn content_length(&self) -> u64 {
        self.head.content_length
    }

    pub fn mode(&self) -> Option<u32> {
        self.attr_int("mode").and_then(|m| u32::try_from(m).ok())
    }

    /// Access time in epoch milliseconds.
    pub fn atime(&self) -> Option<i64> {
        self.attr_int("atime")
    }

    /// Modify time in epoch milliseconds.
    pub fn mtime(&self) -> Option<i64> {
        self.attr_int("mtime")
    }

    /// MD5 recorded at upload time, when the object carries one.
    pub fn md5(&self) -> Option<&str> {
        self.attributes.get("md5").and_then(AttrValue::as_text)
    }

    /// The content hash a download should match: the recorded MD5, else the
    /// entity tag when it is a single-part tag, else nothing.
    pub fn expected_md5(&self) -> Option<String> {
        if let Some(md5) = self.md5() {
            return Some(md5.to_string());
        }
        if self.is_multipart() {
            return None;
        }
        Some(self.bare_entity_tag().to_string())
    }

    /// One flat view of native fields overlaid by unpacked attributes.
    pub fn merged(&self) -> BTreeMap<String, AttrValue> {
        let mut merged = BTreeMap::new();
        merged.insert("etag".into(), AttrValue::from(self.head.entity_tag.as_str()));
        merged.insert(
            "content_length".into(),
            AttrValue::Int(self.head.content_length as i64),
        );
        if let Some(ct) = &self.head.content_type {
            merged.insert("content_type".into(), AttrValue::from(ct.as_str()));
        }
        merged.insert(
            "last_modified".into(),
            AttrValue::Text(self.head.last_modified.to_rfc3339()),
        );
        for (k, v) in &self.head.metadata {
            merged.insert(k.clone(), AttrValue::from(v.as_str()));
        }
        for (k, v) in &self.attributes {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}
