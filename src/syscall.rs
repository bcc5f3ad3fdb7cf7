//! Thin syscall-argument wrappers, grounded on the teacher's `sysproc.rs`/`sysfile.rs`.
//!
//! The real kernel reads raw integers out of a trapped process's saved registers, validates them,
//! and dispatches through a syscall number table (`syscall.rs`). That dispatch table and the trap
//! path that feeds it are out of scope here; what's left is the thin translation layer between
//! "a process asked for fork/exit/wait/kill/pipe" and this crate's typed core API, which is what
//! actually needs testing.

use crate::error::KernelError;
use crate::file::FILE_TABLE;
use crate::pipe::Pipe;
use crate::proc::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    BadArgument,
    /// Write to a pipe whose read end is closed, or the writer was killed while blocked.
    Write,
    /// Read from a pipe while killed.
    Read,
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SyscallError::BadArgument => write!(f, "bad syscall argument"),
            SyscallError::Write => write!(f, "write to broken pipe"),
            SyscallError::Read => write!(f, "read interrupted"),
        }
    }
}

/// `fork()`: creates a copy of the calling process. Returns the child's pid to the parent.
pub fn sys_fork() -> Result<Pid, KernelError> {
    crate::proc::fork()
}

/// `exit(status)`: the calling process never returns from this call.
pub fn sys_exit(status: i32) -> ! {
    crate::proc::exit(status)
}

/// `wait(status_out)`: blocks for any child to exit, writing its status through `status_out` and
/// returning its pid. Fails if the caller has no children.
pub fn sys_wait(status_out: &mut i32) -> Result<Pid, KernelError> {
    crate::proc::wait(status_out)
}

/// `kill(pid)`: marks the target process for termination at its next convenient checkpoint.
pub fn sys_kill(pid: Pid) -> Result<(), KernelError> {
    crate::proc::kill(pid)
}

/// `pipe()`: allocates a new pipe and installs its read/write ends into the calling process's
/// open-file table, returning their file descriptors.
pub fn sys_pipe() -> Result<(usize, usize), KernelError> {
    let (read_file, write_file) = Pipe::alloc(&FILE_TABLE)?;
    let read_fd = crate::proc::install_fd(read_file)?;
    let write_fd = crate::proc::install_fd(write_file)?;
    Ok((read_fd, write_fd))
}
