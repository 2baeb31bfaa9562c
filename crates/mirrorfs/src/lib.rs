//! MirrorFS: a persistent cache of delegate file systems.
//!
//! The core keeps an in-memory file-system view consistent with a record
//! store of file metadata and content, while that store mirrors one or more
//! real ("delegate") file systems that can be mutated outside the process.
//! Queries are answered from the store, lazily populated from the delegate;
//! mutations go to the delegate first and then flow through an ordered
//! before/after event-application protocol that updates the store, the
//! in-memory tree, and any subscribed observers.
//!
//! The two external collaborators are traits: [`RecordStore`] (persistent,
//! per-record-atomic metadata and attribute storage) and
//! [`DelegateFileSystem`] (the authoritative file system, addressed by
//! path). In-memory reference implementations of both live in [`memory`];
//! [`localdisk::LocalDisk`] mirrors a host directory tree.

mod children;
mod content;
pub mod delegate;
mod error;
pub mod events;
mod fs;
pub mod localdisk;
pub mod memory;
mod node;
pub mod record;
mod roots;
mod sink;
pub mod store;

pub use delegate::{DelegateFileSystem, names_equal};
pub use error::{Error, Result};
pub use events::{ChangeListener, Property, RefreshQueue, VfsEvent};
pub use fs::{MirrorFs, MirrorOptions};
pub use node::NodeRef;
pub use record::{Attribute, FILE_CONTENT, FileId, LENGTH_UNKNOWN, RecordFlags};
pub use sink::BufferedSink;
pub use store::{AttrReader, AttrWriter, RecordStore};

#[cfg(test)]
mod tests;
