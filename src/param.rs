//! Compile-time kernel configuration.
//!
//! A `no_std` kernel has no runtime config file; every knob here is a `const`, exactly as the
//! teacher crate does it.

/// maximum number of CPUs
pub const NCPU: usize = 8;
/// maximum number of processes
pub const NPROC: usize = 64;
/// open files per process
pub const NOFILE: usize = 16;
/// open files per system
pub const NFILE: usize = 100;
/// maximum number of active inodes
pub const NINODE: usize = 50;
/// size of a pipe's ring buffer, in bytes
pub const PIPESIZE: usize = 512;
/// kernel stack pages per process
#[cfg(debug_assertions)]
pub const NKSTACK_PAGES: usize = 8;
#[cfg(not(debug_assertions))]
pub const NKSTACK_PAGES: usize = 1;

static_assertions::const_assert!(NPROC > 0);
static_assertions::const_assert!(NCPU > 0);
static_assertions::const_assert!(NOFILE > 0);
static_assertions::const_assert!(PIPESIZE > 0);
