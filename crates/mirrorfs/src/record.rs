//! Record identity, flag bits, and attribute addressing.

use bitflags::bitflags;

/// Identifier of a persisted file record.
///
/// Ids are store-assigned, positive, and never reused within a store's
/// lifetime. The raw value 0 means "no record yet" and is representable only
/// as `Option<FileId>`; constructing a `FileId` from 0 is a contract
/// violation and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub fn new(raw: u32) -> Self {
        assert!(raw > 0, "file record ids are positive");
        Self(raw)
    }

    /// Interpret a raw stored value, mapping 0 to "no record".
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Per-record state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordFlags: u32 {
        /// The stored child-id list matches the delegate listing as of the
        /// last synchronization.
        const CHILDREN_CACHED = 0x01;
        /// The record describes a directory.
        const IS_DIRECTORY = 0x02;
        /// The delegate reported the file as not writable.
        const IS_READ_ONLY = 0x04;
        /// The cached content attribute is suspect; the next read must go
        /// back to the delegate.
        const MUST_RELOAD_CONTENT = 0x08;
    }
}

/// Stored length meaning "unknown, ask the delegate and cache the answer".
pub const LENGTH_UNKNOWN: i64 = -1;

/// Descriptor for a named per-record byte blob.
///
/// Attributes live independently of a record's scalar fields and are
/// addressed by `(FileId, key)`, where the key folds in a version so a
/// format change invalidates older blobs by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    name: &'static str,
    version: u32,
}

impl Attribute {
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version }
    }

    pub fn key(&self) -> String {
        format!("{}.v{}", self.name, self.version)
    }
}

/// Attribute holding the cached copy of a file's content.
pub const FILE_CONTENT: Attribute = Attribute::new("mirrorfs.file.contents", 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_from_raw() {
        assert_eq!(FileId::from_raw(0), None);
        assert_eq!(FileId::from_raw(7), Some(FileId::new(7)));
    }

    #[test]
    #[should_panic(expected = "file record ids are positive")]
    fn test_file_id_zero_panics() {
        let _ = FileId::new(0);
    }

    #[test]
    fn test_attribute_key_folds_version() {
        let attr = Attribute::new("mirrorfs.file.contents", 1);
        assert_eq!(attr.key(), "mirrorfs.file.contents.v1");
        assert_ne!(Attribute::new("x", 1).key(), Attribute::new("x", 2).key());
    }

    #[test]
    fn test_flags_are_independent_bits() {
        let mut flags = RecordFlags::IS_DIRECTORY | RecordFlags::CHILDREN_CACHED;
        assert!(flags.contains(RecordFlags::IS_DIRECTORY));
        flags.remove(RecordFlags::CHILDREN_CACHED);
        assert!(flags.contains(RecordFlags::IS_DIRECTORY));
        assert!(!flags.contains(RecordFlags::MUST_RELOAD_CONTENT));
    }
}
