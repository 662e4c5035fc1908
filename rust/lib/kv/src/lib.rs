//! Namespaced key-value storage for bot plugins.
//!
//! Every plugin that persists state gets one [`Silo`]: a handle scoped to the
//! plugin's namespace. [`open_silo`] picks the backend from [`StoreConfig`]:
//!
//! - no remote project configured: a [`RedbStore`] under `{storage_path}/{silo}/`;
//! - a Google Cloud project configured: a [`DatastoreStore`] behind a
//!   [`WriteThroughCache`].
//!
//! All backends implement [`KVStore`], so plugins never see the difference and
//! tests can inject a [`MemoryStore`].

pub mod cache;
pub mod credentials;
pub mod datastore;
pub mod error;
pub mod memory;
pub mod namespace;
pub mod redb;
pub mod selector;
pub mod silo;
pub mod traits;

pub use cache::WriteThroughCache;
pub use datastore::{DatastoreConfig, DatastoreStore};
pub use error::KVError;
pub use memory::MemoryStore;
pub use crate::redb::RedbStore;
pub use selector::{BackendKind, StoreConfig, open_silo};
pub use silo::{Silo, Silos};
pub use traits::KVStore;
