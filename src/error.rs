//! Kernel-wide error type and logging macros.
//!
//! Mirrors the teacher crate's `error.rs`: one closed enum, composed via `From` out of the
//! stand-in external collaborators' own error types, plus `err!`/`log!`/`try_log!` macros that
//! attach `file!()`/`line!()` provenance in debug builds. Invariant violations (lock ordering,
//! illegal state transitions) are not represented here; those are `assert!`/`panic!`, because they
//! indicate a kernel bug rather than a recoverable condition.

use core::fmt::Display;

use crate::fs::FsError;
use crate::syscall::SyscallError;
use crate::vm::VmError;

/// Kernel error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    Alloc,
    InvalidArgument,
    OutOfProc,
    Vm(VmError),
    Syscall(SyscallError),
    Fs(FsError),
}

impl From<VmError> for KernelError {
    fn from(value: VmError) -> Self {
        Self::Vm(value)
    }
}

impl From<SyscallError> for KernelError {
    fn from(value: SyscallError) -> Self {
        Self::Syscall(value)
    }
}

impl From<FsError> for KernelError {
    fn from(value: FsError) -> Self {
        Self::Fs(value)
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::Alloc => write!(f, "alloc error"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::OutOfProc => write!(f, "out of proc"),
            KernelError::Vm(e) => write!(f, "vm error: {}", e),
            KernelError::Syscall(e) => write!(f, "syscall error: {}", e),
            KernelError::Fs(e) => write!(f, "filesystem error: {}", e),
        }
    }
}

/// Return an error, logging file:line. Use instead of `return Err(...)`.
#[macro_export]
macro_rules! err {
    ($e:expr) => {{
        #[cfg(debug_assertions)]
        {
            $crate::println!("! errored at {}:{}: {}", file!(), line!(), $e);
        }
        return Err($e.into());
    }};
}

/// Log error, passing it through unchanged.
#[macro_export]
macro_rules! log {
    ($e:expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => {
                #[cfg(debug_assertions)]
                $crate::println!("  at {}:{}", file!(), line!());
                Err(e)
            }
        }
    };
}

/// Propagate error with location logging. Use instead of `?`.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                #[cfg(debug_assertions)]
                $crate::println!("  at {}:{}", file!(), line!());
                return Err(e.into());
            }
        }
    };
}
