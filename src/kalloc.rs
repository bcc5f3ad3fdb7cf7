//! Physical page allocation.
//!
//! The real kernel carves free RAM into `PGSIZE` pages and threads them onto a free list
//! (`kalloc.c`'s classic design). This crate leans on [`buddy_alloc`] for the same job instead of
//! hand-rolling a free list: it is the teacher's own dependency, and a buddy allocator gives page-
//! granular allocation with coalescing for free. `kalloc`/`kfree` here are themselves just the
//! `#[global_allocator]`'s `alloc`/`dealloc`, wrapped so the rest of the kernel can ask for whole
//! pages by count rather than by byte size.

use core::alloc::{GlobalAlloc, Layout};

use buddy_alloc::{BuddyAllocParam, FastAllocParam, NonThreadsafeAlloc};

use crate::riscv::PGSIZE;

const HEAP_SIZE: usize = 2 * 1024 * 1024;
const FAST_HEAP_SIZE: usize = 64 * 1024;

#[repr(align(4096))]
struct Heap([u8; HEAP_SIZE]);

#[repr(align(4096))]
struct FastHeap([u8; FAST_HEAP_SIZE]);

static mut HEAP: Heap = Heap([0; HEAP_SIZE]);
static mut FAST_HEAP: FastHeap = FastHeap([0; FAST_HEAP_SIZE]);

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: NonThreadsafeAlloc = unsafe {
    NonThreadsafeAlloc::new(
        FastAllocParam::new(core::ptr::addr_of!(FAST_HEAP) as usize, FAST_HEAP_SIZE),
        BuddyAllocParam::new(core::ptr::addr_of!(HEAP) as usize, HEAP_SIZE, PGSIZE),
    )
};

/// Allocates `count` contiguous physical pages, zeroed, as the kernel's own heap would.
pub fn allocate_pages(count: usize) -> Option<*mut u8> {
    let layout = Layout::from_size_align(count * PGSIZE, PGSIZE).ok()?;
    let ptr = unsafe { alloc_impl().alloc_zeroed(layout) };
    if ptr.is_null() { None } else { Some(ptr) }
}

/// # Safety
/// `ptr` must have come from [`allocate_pages`] with the same `count`, and must not be used again.
pub unsafe fn free_pages(ptr: *mut u8, count: usize) {
    if let Ok(layout) = Layout::from_size_align(count * PGSIZE, PGSIZE) {
        unsafe { alloc_impl().dealloc(ptr, layout) };
    }
}

#[cfg(not(test))]
fn alloc_impl() -> &'static NonThreadsafeAlloc {
    &ALLOCATOR
}

#[cfg(test)]
fn alloc_impl() -> &'static std::alloc::System {
    &std::alloc::System
}
