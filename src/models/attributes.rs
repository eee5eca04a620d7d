//! File attributes and their packed single-string encoding.
//!
//! Object stores give each object one free-form string map. POSIX-ish file
//! attributes travel in a single entry of that map, keyed by [`ATTRS_KEY`],
//! rendered as `key:value` pairs sorted by key and joined with `/`.

use serde::Serialize;
use std::{collections::BTreeMap, collections::HashMap, fmt};

/// Metadata entry carrying the packed attributes.
pub const ATTRS_KEY: &str = "s3cmd-attrs";

/// A packed attribute value. Integers survive a pack/unpack round trip as
/// integers; everything else comes back as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Text(String),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// Coerce raw text the way the unpacker does: canonical base-10 integers
    /// become `Int`, anything else (`+5`, `007`, `-0`, `1.5`) stays `Text`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) if n.to_string() == raw => Self::Int(n),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u32> for AttrValue {
    fn from(n: u32) -> Self {
        Self::Int(n.into())
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Pack fields into the wire string. Keys are sorted; `None` values are
/// dropped.
pub fn pack<K, V, I>(fields: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Option<AttrValue>>,
{
    let sorted: BTreeMap<String, AttrValue> = fields
        .into_iter()
        .filter_map(|(k, v)| v.into().map(|v| (k.as_ref().to_string(), v)))
        .collect();

    sorted
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`pack`]. Each segment is split on its first `:`; segments
/// without one are ignored.
pub fn unpack(packed: &str) -> AttrMap {
    packed
        .split('/')
        .filter_map(|segment| segment.split_once(':'))
        .map(|(k, raw)| (k.to_string(), AttrValue::from_raw(raw)))
        .collect()
}

/// Build the remote metadata map holding the packed fields.
pub fn pack_metadata<K, V, I>(fields: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Option<AttrValue>>,
{
    HashMap::from([(ATTRS_KEY.to_string(), pack(fields))])
}

/// Read the packed fields out of a remote metadata map. A missing or empty
/// entry yields an empty map.
pub fn unpack_metadata(metadata: &HashMap<String, String>) -> AttrMap {
    metadata
        .get(ATTRS_KEY)
        .filter(|s| !s.is_empty())
        .map(|s| unpack(s))
        .unwrap_or_default()
}

/// Placeholder owner/group identity recorded with uploads.
///
/// The values are not read from the OS; callers that care about real
/// ownership set them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub uid: u32,
    pub uname: String,
    pub gid: u32,
    pub gname: String,
}

impl Default for OwnerIdentity {
    fn default() -> Self {
        Self {
            uid: 1000,
            uname: "user".into(),
            gid: 1000,
            gname: "user".into(),
        }
    }
}

/// Attributes of a local file captured right before upload.
///
/// Timestamps are epoch milliseconds. `mode` is the full `st_mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttributes {
    pub uid: u32,
    pub uname: String,
    pub gid: u32,
    pub gname: String,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
    pub mode: u32,
    /// Lowercase hex MD5 of the file contents.
    pub md5: String,
    /// Base64 of the raw digest bytes, as sent in `Content-MD5`.
    pub content_md5: String,
    pub content_type: Option<String>,
}

impl FileAttributes {
    /// Fields stored in the packed attribute entry. Size, content type and
    /// `Content-MD5` are carried by the store's native headers instead.
    pub fn packed_fields(&self) -> Vec<(&'static str, Option<AttrValue>)> {
        vec![
            ("atime", Some(self.atime.into())),
            ("ctime", Some(self.ctime.into())),
            ("gid", Some(self.gid.into())),
            ("gname", Some(self.gname.as_str().into())),
            ("md5", Some(self.md5.as_str().into())),
            ("mode", Some(self.mode.into())),
            ("mtime", Some(self.mtime.into())),
            ("uid", Some(self.uid.into())),
            ("uname", Some(self.uname.as_str().into())),
        ]
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        pack_metadata(self.packed_fields())
    }
}
