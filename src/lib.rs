//! Client-side transfers between local files and an object store, with
//! MD5 integrity checks, optional throttling and progress reporting.

pub mod errors;
pub mod models;
pub mod pipeline;
pub mod services;

pub use errors::{TransferError, TransferResult};
pub use models::{
    attributes::{AttrMap, AttrValue, FileAttributes, OwnerIdentity},
    locator::StorageLocator,
    object::{ListEntry, ObjectEntry, ObjectHead, RemoteObjectStat},
    options::TransferOptions,
};
pub use pipeline::{
    progress::{ChannelObserver, ProgressEvent, ProgressObserver},
    throttle::Rate,
};
pub use services::{
    context::StoreContext,
    listing::ScanOptions,
    local_store::LocalStore,
    store::{RemoteStore, StoreError},
    transfer_service::{TransferReport, TransferService, Verification},
};
