// Error types for MirrorFS operations
use std::path::PathBuf;

use crate::record::FileId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record {0} not found in store")]
    RecordNotFound(FileId),

    #[error("record store is not connected")]
    StoreDisconnected,

    #[error("delegate path does not exist: {0}")]
    DelegateNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("entry already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("cannot create child '{name}' at {path}")]
    CreateFailed { name: String, path: PathBuf },

    #[error("store error: {message}")]
    Store { message: String },

    #[error("delegate error: {message}")]
    Delegate { message: String },
}

impl Error {
    pub fn store<S: Into<String>>(message: S) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    pub fn delegate<S: Into<String>>(message: S) -> Self {
        Error::Delegate {
            message: message.into(),
        }
    }

    pub fn delegate_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Error::DelegateNotFound(path.into())
    }

    pub fn not_a_directory<P: Into<PathBuf>>(path: P) -> Self {
        Error::NotADirectory(path.into())
    }

    pub fn already_exists<P: Into<PathBuf>>(path: P) -> Self {
        Error::AlreadyExists(path.into())
    }
}
