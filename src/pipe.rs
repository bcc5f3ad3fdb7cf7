//! Bounded-buffer pipe IPC, grounded on the teacher's `pipe.rs`.
//!
//! A pipe is a fixed-size ring buffer guarded by a single spinlock, with writers blocking on a
//! full ring and readers blocking on an empty-but-still-open one. Closing either end wakes the
//! other so it can notice and unblock. `num_read`/`num_write` are unbounded monotonic counters,
//! not indices — `% PIPESIZE` turns them into a ring offset, and `num_write - num_read` is always
//! the number of bytes currently buffered.

use alloc::sync::Arc;

use crate::error::KernelError;
use crate::file::{File, FileTable, FileType};
use crate::param::PIPESIZE;
use crate::proc::{self, Channel};
use crate::spinlock::SpinLock;
use crate::syscall::SyscallError;

struct PipeInner {
    data: [u8; PIPESIZE],
    num_read: usize,
    num_write: usize,
    read_open: bool,
    write_open: bool,
}

/// A bounded-buffer pipe. Readable/writable ends are separate [`File`] handles sharing this
/// structure; its own address doubles as the rendezvous channel for sleep/wakeup.
pub struct Pipe {
    inner: SpinLock<PipeInner>,
}

impl Pipe {
    fn channel_read(&self) -> Channel {
        Channel::PipeRead(self as *const Pipe as usize)
    }

    fn channel_write(&self) -> Channel {
        Channel::PipeWrite(self as *const Pipe as usize)
    }

    /// Allocates a pipe and the pair of file-table slots for its read and write ends.
    pub fn alloc(table: &'static FileTable) -> Result<(File, File), KernelError> {
        let pipe = Arc::new(Pipe {
            inner: SpinLock::new(
                PipeInner {
                    data: [0; PIPESIZE],
                    num_read: 0,
                    num_write: 0,
                    read_open: true,
                    write_open: true,
                },
                "pipe",
            ),
        });

        let read_file = try_log!(
            table.alloc(FileType::Pipe(pipe.clone()), true, false).ok_or(KernelError::OutOfProc)
        );

        let write_file = match log!(
            table.alloc(FileType::Pipe(pipe), false, true).ok_or(KernelError::OutOfProc)
        ) {
            Ok(file) => file,
            Err(err) => {
                read_file.close();
                return Err(err);
            }
        };

        Ok((read_file, write_file))
    }

    /// Closes the read or write end. Wakes whoever is blocked on the other end so it can observe
    /// the closed flag and give up.
    pub fn close(&self, writable: bool) {
        let mut inner = self.inner.lock();
        if writable {
            inner.write_open = false;
            proc::wakeup(self.channel_read());
        } else {
            inner.read_open = false;
            proc::wakeup(self.channel_write());
        }
    }

    /// Writes `src` in full, blocking while the ring is full. Checked on every iteration, not
    /// just before blocking: if the read end hangs up or the caller is killed at any point, the
    /// whole call fails — bytes already buffered this call are not reported back as a partial
    /// write, matching the teacher's own `err!` on every loop pass rather than only at the point
    /// of going to sleep.
    pub fn write(&self, src: &[u8]) -> Result<usize, KernelError> {
        let mut inner = self.inner.lock();
        let mut written = 0;

        while written < src.len() {
            if !inner.read_open || proc::current_killed() {
                err!(SyscallError::Write);
            }

            if inner.num_write == inner.num_read + PIPESIZE {
                proc::wakeup(self.channel_read());
                inner = proc::sleep(self.channel_write(), inner);
                continue;
            }

            let idx = inner.num_write % PIPESIZE;
            inner.data[idx] = src[written];
            inner.num_write += 1;
            written += 1;
        }

        proc::wakeup(self.channel_read());
        Ok(written)
    }

    /// Reads up to `dst.len()` bytes, blocking while the ring is empty and the write end is still
    /// open. Returns `Ok(0)` once the ring is empty and the write end has closed (EOF).
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, KernelError> {
        let mut inner = self.inner.lock();

        while inner.num_read == inner.num_write && inner.write_open {
            if proc::current_killed() {
                err!(SyscallError::Read);
            }
            inner = proc::sleep(self.channel_read(), inner);
        }

        let mut n = 0;
        while n < dst.len() && inner.num_read < inner.num_write {
            let idx = inner.num_read % PIPESIZE;
            dst[n] = inner.data[idx];
            inner.num_read += 1;
            n += 1;
        }

        proc::wakeup(self.channel_write());
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FILE_TABLE;
    use crate::proc::test_support;
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    // Every `Pipe::read`/`write` call checks `proc::current_killed()` on each loop pass, which
    // panics outside of a dispatched process. So even the non-blocking cases here run their
    // bodies through `test_support::spawn_test_process`, the same park-based `swtch` stand-in the
    // concurrent `proc.rs` tests use, rather than calling into the pipe directly from the test
    // thread.

    #[test]
    fn write_blocks_past_capacity_and_reader_drains_bytes_in_order() {
        let _guard = test_support::TEST_LOCK.lock().unwrap();

        let (read_file, write_file) = Pipe::alloc(&FILE_TABLE).expect("alloc pipe");

        // One byte past a full ring, so the writer is guaranteed to block at least once and
        // resume only after the reader has drained some of what's buffered.
        let payload: Vec<u8> = (0..(PIPESIZE as u32 + 1)).map(|i| (i % 256) as u8).collect();
        let payload_for_writer = payload.clone();

        let (_writer_pid, write_rx) =
            test_support::spawn_test_process(move || write_file.write(&payload_for_writer));

        let (_reader_pid, read_rx) = test_support::spawn_test_process(move || {
            let mut buf = vec![0u8; PIPESIZE + 1];
            let mut total = 0;
            while total < buf.len() {
                let n = read_file.read(&mut buf[total..]).expect("read should succeed");
                assert!(n > 0, "read returned 0 before the write end ever closed");
                total += n;
            }
            buf
        });

        let written = write_rx.recv_timeout(RECV_TIMEOUT).expect("writer did not finish in time");
        let read_back = read_rx.recv_timeout(RECV_TIMEOUT).expect("reader did not finish in time");

        assert_eq!(written, PIPESIZE + 1);
        assert_eq!(read_back, payload);
    }

    #[test]
    fn read_returns_zero_once_drained_and_write_end_closed() {
        let _guard = test_support::TEST_LOCK.lock().unwrap();

        let (read_file, write_file) = Pipe::alloc(&FILE_TABLE).expect("alloc pipe");

        let (_writer_pid, write_rx) = test_support::spawn_test_process(move || {
            write_file.write(b"hi").expect("write should succeed");
            write_file.close();
        });
        write_rx.recv_timeout(RECV_TIMEOUT).expect("writer did not finish in time");

        let (_reader_pid, read_rx) = test_support::spawn_test_process(move || {
            let mut buf = [0u8; 16];
            let first = read_file.read(&mut buf).expect("first read should succeed");
            let second = read_file.read(&mut buf).expect("second read should succeed");
            (first, buf[..first].to_vec(), second)
        });
        let (first_n, first_bytes, second_n) =
            read_rx.recv_timeout(RECV_TIMEOUT).expect("reader did not finish in time");

        assert_eq!(first_n, 2);
        assert_eq!(first_bytes, b"hi".to_vec());
        assert_eq!(second_n, 0, "read past EOF on a closed write end must return 0, not block");
    }

    #[test]
    fn write_fails_once_read_end_closes_even_after_buffering_past_capacity() {
        let _guard = test_support::TEST_LOCK.lock().unwrap();

        let (read_file, write_file) = Pipe::alloc(&FILE_TABLE).expect("alloc pipe");
        let payload: Vec<u8> = (0..(PIPESIZE as u32 + 1)).map(|i| (i % 256) as u8).collect();

        // Allocated (and so dispatched) strictly before the closer below, the writer always gets
        // the scheduler's attention first: it fills the ring, blocks on the full condition, and
        // only then does the closer get a turn. There is no real parallelism here — exactly one
        // of these two processes is ever actually running — so this ordering is deterministic.
        let (_writer_pid, write_rx) = test_support::spawn_test_process(move || write_file.write(&payload));
        let (_closer_pid, close_rx) = test_support::spawn_test_process(move || read_file.close());

        close_rx.recv_timeout(RECV_TIMEOUT).expect("closer did not finish in time");
        let result = write_rx.recv_timeout(RECV_TIMEOUT).expect("writer did not finish in time");

        assert!(
            result.is_err(),
            "write must fail once the read end closes, even though PIPESIZE bytes were already buffered"
        );
    }
}
