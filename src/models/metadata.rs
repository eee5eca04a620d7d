//! Free-form string metadata attached to stored objects.

use sqlx::FromRow;
use uuid::Uuid;

/// One key-value metadata entry of an object in the local store.
///
/// Packed file attributes arrive here as a single entry.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectMetadata {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    /// Metadata key (e.g., "s3cmd-attrs").
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
