//! Core data models.
//!
//! Locators and attributes describe what is being transferred; objects and
//! buckets are how the store records it. Store-side rows map to database
//! tables via `sqlx::FromRow`; client-facing types serialize via `serde`.

pub mod attributes;
pub mod bucket;
pub mod locator;
pub mod metadata;
pub mod object;
pub mod options;
