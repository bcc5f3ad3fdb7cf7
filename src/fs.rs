//! Stand-in for the filesystem layer (inodes, paths, the transaction log).
//!
//! On-disk layout, directory lookup and the write-ahead log are all out of scope here — this
//! core's job stops at the file-descriptor table and the process lifecycle built on top of it.
//! `Inode`/`Path`/`begin_op`/`end_op` exist only so `proc::exit`'s "close cwd" step and
//! `file::File`'s `FileType::Inode` variant have something concrete to call, the same way the
//! teacher's `log.rs`/`fs.rs` back `file.rs`.

use alloc::string::String;
use alloc::sync::Arc;

use crate::spinlock::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    TooManyInodes,
}

impl core::fmt::Display for FsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::NotADirectory => write!(f, "not a directory"),
            FsError::TooManyInodes => write!(f, "too many active inodes"),
        }
    }
}

/// A path string, wrapped so call sites read the same as the teacher's `Path` newtype.
#[derive(Debug, Clone)]
pub struct Path(String);

impl Path {
    pub fn new(s: &str) -> Self {
        Self(String::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct InodeInner {
    ref_count: usize,
    path: String,
}

/// An in-memory stand-in for an inode. Real lookups, directory entries and on-disk blocks are
/// out of scope; this only tracks the reference count `idup`/`iput` need to manage correctly.
#[derive(Debug, Clone)]
pub struct Inode(Arc<SpinLock<InodeInner>>);

impl Inode {
    fn new(path: &str) -> Self {
        Self(Arc::new(SpinLock::new(
            InodeInner { ref_count: 1, path: String::from(path) },
            "inode",
        )))
    }

    /// Bumps the reference count and returns a new handle to the same inode, mirroring `idup`.
    pub fn dup(&self) -> Self {
        self.0.lock().ref_count += 1;
        Self(self.0.clone())
    }

    /// Drops a reference, mirroring `iput`. The last reference simply lets the `Arc` drop.
    pub fn put(self) {
        self.0.lock().ref_count -= 1;
    }

    pub fn path(&self) -> String {
        self.0.lock().path.clone()
    }
}

/// Looks up `path`, mirroring `namei`. Every path resolves to a freshly-minted inode: there is no
/// real directory tree to walk.
pub fn namei(path: &Path) -> Result<Inode, FsError> {
    if path.as_str().is_empty() {
        return Err(FsError::NotFound);
    }
    Ok(Inode::new(path.as_str()))
}

/// Begins a filesystem transaction. A real write to the log must be wrapped in
/// `begin_op()`/`end_op()` so a crash mid-write leaves the log, not the filesystem, inconsistent;
/// there is no disk here, so this just marks the RAII scope.
pub struct Operation;

impl Operation {
    pub fn begin() -> Self {
        Operation
    }
}

impl Drop for Operation {
    fn drop(&mut self) {}
}

/// One-time filesystem initialization, called once by the first process to run.
pub fn init() {}
