//! Represents a logical bucket, the top-level container for objects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket in the local store. Buckets act as namespaces for objects.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name, unique within the store.
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
