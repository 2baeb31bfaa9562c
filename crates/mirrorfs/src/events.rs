//! Change events and observer contracts.
//!
//! Events form a closed set dispatched by exhaustive match; adding a kind is
//! a compile-time-checked change. A batch is an ordered slice applied under
//! one before/after notification pair.

use async_trait::async_trait;

use crate::node::NodeRef;

/// A changed property carried by [`VfsEvent::PropertyChange`].
#[derive(Debug, Clone)]
pub enum Property {
    Name { old: String, new: String },
    Writable { old: bool, new: bool },
}

/// One confirmed delegate-side change.
#[derive(Debug, Clone)]
pub enum VfsEvent {
    /// A child named `name` appeared under `parent`.
    Create {
        parent: NodeRef,
        name: String,
        directory: bool,
    },
    /// The file and its subtree are gone.
    Delete { file: NodeRef },
    /// The file's content changed. `from_refresh` marks changes discovered
    /// by an external refresh rather than an in-process write, in which
    /// case the cached content must be reloaded.
    ContentChange {
        file: NodeRef,
        old_stamp: i64,
        new_stamp: i64,
        from_refresh: bool,
    },
    /// The file was copied to `new_name` under `new_parent`.
    Copy {
        file: NodeRef,
        new_parent: NodeRef,
        new_name: String,
    },
    /// The file moved under `new_parent`, keeping its name.
    Move { file: NodeRef, new_parent: NodeRef },
    /// A scalar property changed.
    PropertyChange { file: NodeRef, property: Property },
}

impl VfsEvent {
    /// Whether every subject handle still refers to a live record. Stale
    /// events are dropped before notification.
    pub async fn is_valid(&self) -> bool {
        match self {
            VfsEvent::Create { parent, .. } => parent.exists().await,
            VfsEvent::Delete { file } => file.exists().await,
            VfsEvent::ContentChange { file, .. } => file.exists().await,
            VfsEvent::Copy {
                file, new_parent, ..
            } => file.exists().await && new_parent.exists().await,
            VfsEvent::Move { file, new_parent } => {
                file.exists().await && new_parent.exists().await
            }
            VfsEvent::PropertyChange { file, .. } => file.exists().await,
        }
    }
}

/// Observer of applied change batches.
///
/// `before` fires after validation and ahead of any record mutation; `after`
/// fires once the whole batch has been applied. Both carry the same batch
/// and run inline on the applying task.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn before(&self, events: &[VfsEvent]);
    async fn after(&self, events: &[VfsEvent]);
}

/// External collaborator that scans roots for delegate-side changes and
/// eventually feeds the discovered events back through
/// [`crate::MirrorFs::process_events`].
#[async_trait]
pub trait RefreshQueue: Send + Sync {
    async fn refresh(&self, asynchronous: bool, recursive: bool, roots: Vec<NodeRef>);
}
