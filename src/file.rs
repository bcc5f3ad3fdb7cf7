//! The open-file table.
//!
//! Grounded on the teacher's `file.rs`: a fixed-size table of reference-counted file slots, each
//! either closed, backed by a pipe, or backed by an inode. Device files are out of scope (no
//! console major/minor table here) — the two variants this crate's process lifecycle actually
//! needs are `Pipe` and `Inode`.

use alloc::sync::Arc;
use core::cell::UnsafeCell;

use crate::error::KernelError;
use crate::fs::{FsError, Inode};
use crate::param::NFILE;
use crate::pipe::Pipe;
use crate::spinlock::SpinLock;

#[derive(Debug, Clone)]
pub enum FileType {
    None,
    Pipe(Arc<Pipe>),
    Inode(Inode),
}

#[derive(Debug)]
struct FileMeta {
    ref_count: usize,
}

#[derive(Debug)]
struct FileInner {
    readable: bool,
    writeable: bool,
    r#type: FileType,
    offset: usize,
}

impl Default for FileInner {
    fn default() -> Self {
        Self { readable: false, writeable: false, r#type: FileType::None, offset: 0 }
    }
}

pub struct FileTable {
    meta: SpinLock<[FileMeta; NFILE]>,
    inner: [UnsafeCell<FileInner>; NFILE],
}

// Safety: every slot's `inner` is only touched while holding that slot's conceptual ownership,
// established by `ref_count` bookkeeping under `meta`'s lock, matching the teacher's own table.
unsafe impl Sync for FileTable {}

impl FileTable {
    pub const fn new() -> Self {
        const EMPTY_META: FileMeta = FileMeta { ref_count: 0 };
        const EMPTY_INNER: UnsafeCell<FileInner> = UnsafeCell::new(FileInner {
            readable: false,
            writeable: false,
            r#type: FileType::None,
            offset: 0,
        });
        Self { meta: SpinLock::new([EMPTY_META; NFILE], "filetable"), inner: [EMPTY_INNER; NFILE] }
    }

    /// Allocates a fresh slot for `r#type`, returning a [`File`] handle. Mirrors `File::alloc`.
    pub fn alloc(&'static self, r#type: FileType, readable: bool, writeable: bool) -> Option<File> {
        let mut meta = self.meta.lock();
        for (id, slot) in meta.iter_mut().enumerate() {
            if slot.ref_count == 0 {
                slot.ref_count = 1;
                unsafe {
                    *self.inner[id].get() = FileInner { readable, writeable, r#type, offset: 0 };
                }
                return Some(File { id, table: self });
            }
        }
        None
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The system-wide open-file table. Every `File` handle any process holds is a reference into
/// this one table, exactly as the teacher's own `kernel::file::FILE_TABLE` is the single instance
/// `pipe.rs`/`sysfile.rs` allocate out of.
pub static FILE_TABLE: FileTable = FileTable::new();

/// A process's handle onto one slot of the system-wide open-file table.
#[derive(Debug)]
pub struct File {
    id: usize,
    table: &'static FileTable,
}

impl File {
    /// Bumps the slot's reference count and returns a new handle to it. Mirrors `File::dup`.
    pub fn dup(&self) -> File {
        self.table.meta.lock()[self.id].ref_count += 1;
        File { id: self.id, table: self.table }
    }

    /// Drops this handle, closing the underlying pipe/inode when it was the last one. Mirrors
    /// `File::close`.
    pub fn close(self) {
        let mut meta = self.table.meta.lock();
        meta[self.id].ref_count -= 1;
        if meta[self.id].ref_count == 0 {
            let r#type = core::mem::replace(
                unsafe { &mut (*self.table.inner[self.id].get()).r#type },
                FileType::None,
            );
            drop(meta);
            if let FileType::Pipe(pipe) = r#type {
                let writable = unsafe { (*self.table.inner[self.id].get()).writeable };
                pipe.close(writable);
            }
        }
    }

    pub fn readable(&self) -> bool {
        unsafe { (*self.table.inner[self.id].get()).readable }
    }

    pub fn writeable(&self) -> bool {
        unsafe { (*self.table.inner[self.id].get()).writeable }
    }

    /// Reads up to `dst.len()` bytes into `dst`. Mirrors `File::read`.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, KernelError> {
        if !self.readable() {
            err!(KernelError::InvalidArgument);
        }
        match unsafe { &(*self.table.inner[self.id].get()).r#type } {
            FileType::Pipe(pipe) => pipe.read(dst),
            FileType::Inode(_) => err!(FsError::NotFound),
            FileType::None => err!(KernelError::InvalidArgument),
        }
    }

    /// Writes `src` in full or fails. Mirrors `File::write`.
    pub fn write(&self, src: &[u8]) -> Result<usize, KernelError> {
        if !self.writeable() {
            err!(KernelError::InvalidArgument);
        }
        match unsafe { &(*self.table.inner[self.id].get()).r#type } {
            FileType::Pipe(pipe) => pipe.write(src),
            FileType::Inode(_) => err!(FsError::NotFound),
            FileType::None => err!(KernelError::InvalidArgument),
        }
    }
}
