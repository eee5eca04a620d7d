//! Service layer: the transfer operations and the stores they run against.

pub mod context;
pub mod listing;
pub mod local_file;
pub mod local_store;
pub mod store;
pub mod transfer_service;
