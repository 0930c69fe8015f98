//! The four concrete [`crate::Backend`] implementations named in spec
//! §4.1.

pub mod blob_lease;
pub mod local;
pub mod object_store_lock_table;
pub mod versioned_object_store;

pub use blob_lease::BlobLeaseBackend;
pub use local::LocalBackend;
pub use object_store_lock_table::ObjectStoreLockTableBackend;
pub use versioned_object_store::VersionedObjectStoreBackend;
