//! The process table, scheduler, and sleep/wakeup rendezvous — the heart of this crate.
//!
//! Grounded throughout on the teacher's `proc.rs`. A few design choices carried over deliberately
//! rather than simplified away:
//!
//! - Parent tracking lives in one array (`ProcTable::parents`) guarded by a single lock, not as a
//!   `parent` field on each `Proc`. Reparenting and `wait` both need to scan "all of some
//!   process's children" without taking every child's individual lock, and a single lock over a
//!   flat array does that without risking lock-ordering deadlocks between parent and child slots.
//! - A process's rendezvous point when it sleeps is an opaque [`Channel`], not a raw pointer —
//!   `wakeup` only ever needs to compare channels for equality, never dereference one.
//! - `ProcInner` (state/channel/killed/xstate/pid) sits behind its own per-slot [`SpinLock`];
//!   everything else about a process (`ProcData`) is touched only by whichever CPU currently
//!   "owns" that process (either because it's the one running it, or because it's the one
//!   currently holding the slot lock during setup/teardown), so it lives in a bare `UnsafeCell`.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::KernelError;
use crate::file::File;
use crate::fs::{self, Inode};
use crate::param::{NCPU, NOFILE, NPROC};
use crate::riscv::{self, PGSIZE};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::sync::OnceLock;
use crate::swtch::swtch;
use crate::vm::Uvm;

/// Per-CPU state: which process (if any) this hart is currently running, the context to switch
/// back into the scheduler loop, and the spinlock nesting bookkeeping described in
/// [`crate::spinlock`].
pub struct Cpu {
    proc: Option<&'static Proc>,
    scheduler_context: Context,
    num_off: isize,
    interrupts_enabled: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self { proc: None, scheduler_context: Context::zeroed(), num_off: 0, interrupts_enabled: false }
    }
}

pub struct CpuTable([UnsafeCell<Cpu>; NCPU]);

unsafe impl Sync for CpuTable {}

static CPU_TABLE: CpuTable = CpuTable::new();

impl CpuTable {
    const fn new() -> Self {
        const ONE: UnsafeCell<Cpu> = UnsafeCell::new(Cpu::new());
        Self([ONE; NCPU])
    }

    /// Returns a raw pointer to the calling hart's `Cpu`, keyed by `tp`.
    ///
    /// # Safety
    /// The caller must already hold an [`InterruptLock`] (or otherwise have interrupts disabled)
    /// so the calling thread cannot migrate harts between reading `tp` and using the pointer.
    pub unsafe fn current() -> *mut Cpu {
        let id = unsafe { riscv::registers::tp::read() };
        CPU_TABLE.0[id].get()
    }

    /// `push_off`: disables interrupts and bumps the nesting counter, remembering whether
    /// interrupts were enabled before the first (outermost) call in this nest.
    pub fn lock_current() -> InterruptLock {
        let was_enabled = riscv::interrupts::get();
        riscv::interrupts::disable();

        let cpu = unsafe { &mut *Self::current() };
        if cpu.num_off == 0 {
            cpu.interrupts_enabled = was_enabled;
        }
        cpu.num_off += 1;

        InterruptLock
    }

    /// `pop_off`: the inverse of [`Self::lock_current`].
    ///
    /// # Safety
    /// Must be balanced with a prior `lock_current` on the same hart; must be called with
    /// interrupts still disabled.
    pub unsafe fn unlock_current() {
        assert!(!riscv::interrupts::get(), "unlock_current: interrupts are enabled");
        let cpu = unsafe { &mut *Self::current() };
        assert!(cpu.num_off >= 1, "unlock_current: unbalanced with lock_current");
        cpu.num_off -= 1;
        if cpu.num_off == 0 && cpu.interrupts_enabled {
            riscv::interrupts::enable();
        }
    }
}

/// An interrupt-disabling token. Dropping it runs `pop_off`; the token itself carries no data, it
/// only exists to tie the disabled period to a scope.
pub struct InterruptLock;

impl Drop for InterruptLock {
    fn drop(&mut self) {
        unsafe { CpuTable::unlock_current() };
    }
}

/// Callee-saved registers and stack pointer, swapped by [`crate::swtch::swtch`]. Field order and
/// presence mirror exactly what the real `swtch.S` saves and restores.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    ra: usize,
    sp: usize,
    s0: usize,
    s1: usize,
    s2: usize,
    s3: usize,
    s4: usize,
    s5: usize,
    s6: usize,
    s7: usize,
    s8: usize,
    s9: usize,
    s10: usize,
    s11: usize,
}

impl Context {
    const fn zeroed() -> Self {
        Self { ra: 0, sp: 0, s0: 0, s1: 0, s2: 0, s3: 0, s4: 0, s5: 0, s6: 0, s7: 0, s8: 0, s9: 0, s10: 0, s11: 0 }
    }
}

/// The page of state shared between user and kernel mode across a trap, normally mapped at a
/// fixed user virtual address by the trampoline. The trampoline and the trap path that populates
/// the rest of this page are out of scope; `a0` alone is kept because `fork` needs somewhere to
/// stash the child's return value of `0`.
#[repr(C, align(4096))]
pub struct TrapFrame {
    pub a0: usize,
    _reserved: [u8; PGSIZE - core::mem::size_of::<usize>()],
}

impl TrapFrame {
    fn boxed_zeroed() -> Box<TrapFrame> {
        unsafe {
            let layout = core::alloc::Layout::new::<TrapFrame>();
            let ptr = alloc::alloc::alloc_zeroed(layout) as *mut TrapFrame;
            assert!(!ptr.is_null(), "boxed_zeroed: allocation failed");
            Box::from_raw(ptr)
        }
    }
}

/// Resumes user-mode execution through the trampoline page. Defined by the trap path, which is
/// out of scope for this core — on the real target it is provided by `trap.rs`/`trampoline.S`,
/// neither of which this crate implements.
#[cfg(not(test))]
unsafe extern "C" {
    fn usertrapret() -> !;
}

/// A process id. The only way to get one is [`Pid::alloc`], so a `Pid` in hand is always one
/// this kernel itself minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(usize);

static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

impl Pid {
    fn alloc() -> Self {
        Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// An opaque rendezvous point for [`sleep`]/[`wakeup`]. Never dereferenced, only compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Proc(usize),
    PipeRead(usize),
    PipeWrite(usize),
    Lock(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// The part of a process guarded by its own slot lock: small enough to scan cheaply from the
/// scheduler and from `wakeup`/`kill`, which must look at every process in the table.
pub struct ProcInner {
    pub state: ProcState,
    channel: Option<Channel>,
    killed: bool,
    xstate: i32,
    pid: Pid,
}

/// Everything about a process that only its owner (the CPU currently running it, or the CPU
/// currently holding its slot lock during setup/teardown) ever touches.
pub struct ProcData {
    pub pagetable: Uvm,
    pub size: usize,
    trapframe: Box<TrapFrame>,
    context: Context,
    pub open_files: [Option<File>; NOFILE],
    pub cwd: Option<Inode>,
    pub name: [u8; 16],
}

pub struct Proc {
    pub index: usize,
    inner: SpinLock<ProcInner>,
    /// `None` whenever the slot is `Unused`; populated by [`ProcTable::alloc`] and cleared by
    /// [`ProcTable::free`].
    data: UnsafeCell<Option<ProcData>>,
}

unsafe impl Sync for Proc {}

impl Proc {
    /// # Safety
    /// The caller must be the process's owner: either the CPU currently running it, or a CPU
    /// holding its slot lock while the state is `Used` (mid fork/exit) and no other CPU can be
    /// running it yet. The slot must not be `Unused`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data(&self) -> &mut ProcData {
        unsafe { (*self.data.get()).as_mut().expect("proc data accessed while slot is unused") }
    }
}

pub struct ProcTable {
    table: [UnsafeCell<Proc>; NPROC],
    /// `parents[i]` is the table index of process `i`'s parent, if it has one. Guarded by one
    /// lock shared across the whole table rather than a per-process field, see module doc.
    parents: SpinLock<[Option<usize>; NPROC]>,
}

unsafe impl Sync for ProcTable {}

pub static PROC_TABLE: ProcTable = ProcTable::new();
static INIT_PROC: OnceLock<usize> = OnceLock::new();

impl ProcTable {
    const fn new() -> Self {
        // `Proc` is not `Copy`, so a fixed-size array of them can't be built with `[x; N]`
        // directly. Build it element-by-element into an uninitialized array instead.
        let mut table: [MaybeUninit<UnsafeCell<Proc>>; NPROC] =
            unsafe { MaybeUninit::uninit().assume_init() };

        let mut i = 0;
        while i < NPROC {
            table[i] = MaybeUninit::new(UnsafeCell::new(Proc {
                index: i,
                inner: SpinLock::new(
                    ProcInner { state: ProcState::Unused, channel: None, killed: false, xstate: 0, pid: Pid(0) },
                    "proc",
                ),
                data: UnsafeCell::new(None),
            }));
            i += 1;
        }

        // Safety: every element was just initialized above, and `MaybeUninit<T>` has the same
        // layout as `T`.
        let table: [UnsafeCell<Proc>; NPROC] = unsafe { core::mem::transmute(table) };

        Self { table, parents: SpinLock::new([None; NPROC], "parents") }
    }

    fn proc(&self, index: usize) -> &'static Proc {
        unsafe { &*self.table[index].get() }
    }

    pub fn get(&self, index: usize) -> &'static Proc {
        self.proc(index)
    }

    /// Finds an `Unused` slot, gives it a fresh pid, and fills in a fresh address space and
    /// trapframe and a zeroed context whose `ra` points at [`fork_ret`], so that this process's
    /// first scheduling runs it there.
    fn alloc(&'static self) -> Result<&'static Proc, KernelError> {
        for index in 0..NPROC {
            let proc = self.proc(index);
            let mut inner = proc.inner.lock();
            if inner.state != ProcState::Unused {
                continue;
            }
            inner.pid = Pid::alloc();
            inner.state = ProcState::Used;
            inner.killed = false;
            inner.xstate = 0;
            inner.channel = None;
            drop(inner);

            let pagetable = Uvm::try_new()?;
            let mut context = Context::zeroed();
            context.ra = fork_ret as usize;

            unsafe {
                *proc.data.get() = Some(ProcData {
                    pagetable,
                    size: 0,
                    trapframe: TrapFrame::boxed_zeroed(),
                    context,
                    open_files: core::array::from_fn(|_| None),
                    cwd: None,
                    name: [0; 16],
                });
            }

            return Ok(proc);
        }
        Err(KernelError::OutOfProc)
    }

    /// Frees a process's slot, dropping its address space, open files and trapframe and marking
    /// it `Unused` again. Called once a parent has reaped a zombie in [`wait`].
    fn free(&self, proc: &'static Proc) {
        unsafe { *proc.data.get() = None };

        let mut inner = proc.inner.lock();
        inner.state = ProcState::Unused;
        inner.pid = Pid(0);
        inner.channel = None;
        inner.killed = false;
        inner.xstate = 0;
    }

    /// Debug dump of every non-`Unused` process's state, pid and name. Reads without locking, so
    /// it may race with the table changing underneath it — acceptable for a debug aid that must
    /// never itself deadlock, same tradeoff as the teacher's own dumper.
    pub fn dump(&self) {
        crate::println!("process table:");
        for index in 0..NPROC {
            let proc = self.proc(index);
            let inner = unsafe { proc.inner.get_mut_unchecked() };
            if inner.state == ProcState::Unused {
                continue;
            }
            let Some(data) = (unsafe { &*proc.data.get() }).as_ref() else { continue };
            let name_len = data.name.iter().position(|&b| b == 0).unwrap_or(data.name.len());
            let name = core::str::from_utf8(&data.name[..name_len]).unwrap_or("?");
            crate::println!("{:>5} {:>9?} {}", inner.pid.as_usize(), inner.state, name);
        }
    }
}

/// Returns the process currently running on this hart, if any.
pub fn current() -> Option<&'static Proc> {
    let _lock = CpuTable::lock_current();
    unsafe { (*CpuTable::current()).proc }
}

/// Whether the calling process has been marked for termination. Checked at points a process can
/// safely give up, such as while blocked in a pipe read/write.
pub fn current_killed() -> bool {
    let proc = current().expect("current_killed: no current process");
    proc.inner.lock().killed
}

/// Installs `file` into the calling process's open-file table, returning its descriptor.
pub fn install_fd(file: File) -> Result<usize, KernelError> {
    let proc = current().expect("install_fd: no current process");
    let data = unsafe { proc.data() };
    for (fd, slot) in data.open_files.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(file);
            return Ok(fd);
        }
    }
    Err(KernelError::OutOfProc)
}

/// Sets up the very first process. Called exactly once, before the scheduler ever runs.
pub fn user_init() {
    let proc = PROC_TABLE.alloc().expect("user_init: process table exhausted");
    let data = unsafe { proc.data() };
    data.size = PGSIZE;
    data.pagetable.alloc(0, PGSIZE).expect("user_init: failed to allocate initial memory");
    data.cwd = fs::namei(&fs::Path::new("/")).ok();
    data.name[.."initcode".len()].copy_from_slice(b"initcode");

    proc.inner.lock().state = ProcState::Runnable;
    INIT_PROC.initialize(|| Ok::<_, ()>(proc.index));
}

/// Grows or shrinks the calling process's memory by `delta` bytes (negative shrinks).
pub fn grow(delta: isize) -> Result<(), KernelError> {
    let proc = current().expect("grow: no current process");
    let data = unsafe { proc.data() };
    let old_size = data.size;

    let new_size = if delta >= 0 {
        data.pagetable.alloc(old_size, old_size + delta as usize)?
    } else {
        let shrink = (-delta) as usize;
        data.pagetable.dealloc(old_size, old_size.saturating_sub(shrink))
    };

    data.size = new_size;
    Ok(())
}

/// Creates a child of the calling process: a fresh slot with a copy of its memory, duplicated
/// file descriptors and cwd, and its trapframe's `a0` zeroed so the child observes `fork()`
/// returning `0`. Returns the child's pid to the caller (the parent).
pub fn fork() -> Result<Pid, KernelError> {
    let parent = current().expect("fork: no current process");
    let parent_data = unsafe { parent.data() };

    let child = try_log!(PROC_TABLE.alloc());
    let child_data = unsafe { child.data() };

    if let Err(err) = log!(parent_data.pagetable.copy(&mut child_data.pagetable, parent_data.size)) {
        PROC_TABLE.free(child);
        return Err(err.into());
    }
    child_data.size = parent_data.size;
    child_data.trapframe.a0 = 0;

    for (fd, file) in parent_data.open_files.iter().enumerate() {
        child_data.open_files[fd] = file.as_ref().map(File::dup);
    }
    child_data.cwd = parent_data.cwd.clone().map(Inode::dup);
    child_data.name = parent_data.name;

    {
        let mut parents = PROC_TABLE.parents.lock();
        parents[child.index] = Some(parent.index);
    }

    let child_pid = child.inner.lock().pid;
    child.inner.lock().state = ProcState::Runnable;
    Ok(child_pid)
}

/// Gives every orphaned child of `parent_index` to the init process, and wakes init in case it's
/// already blocked in `wait`. Takes `parents` already locked so the caller (`exit`) can keep
/// holding it straight through the parent-lookup and wakeup that follow.
fn reparent(parent_index: usize, parents: &mut [Option<usize>; NPROC]) {
    let Some(&init_index) = INIT_PROC.get() else { return };

    for slot in parents.iter_mut() {
        if *slot == Some(parent_index) {
            *slot = Some(init_index);
            wakeup(Channel::Proc(init_index));
        }
    }
}

/// Terminates the calling process with `status`. Closes its files, reparents its children,
/// wakes its own parent (who may be blocked in `wait`), and yields the CPU for good — this
/// function does not return.
pub fn exit(status: i32) -> ! {
    let proc = current().expect("exit: no current process");
    assert_ne!(Some(proc.index), INIT_PROC.get().copied(), "init process exiting");

    let data = unsafe { proc.data() };
    for file in data.open_files.iter_mut() {
        if let Some(file) = file.take() {
            file.close();
        }
    }
    if let Some(cwd) = data.cwd.take() {
        let _op = fs::Operation::begin();
        cwd.put();
    }

    // Held continuously from reparenting through waking our own parent: a parent blocked in
    // `wait` re-locks `parents` on its way back to sleep, so as long as we never let go of it in
    // between, it either hasn't looked yet (and will see our update once we release it) or is
    // already asleep on `Channel::Proc(parent_index)` for `wakeup` to find.
    let mut parents = PROC_TABLE.parents.lock();
    reparent(proc.index, &mut parents);
    let parent_index = parents[proc.index];
    if let Some(parent_index) = parent_index {
        wakeup(Channel::Proc(parent_index));
    }
    drop(parents);

    let mut inner = proc.inner.lock();
    inner.xstate = status;
    inner.state = ProcState::Zombie;

    sched(inner);
    unreachable!("exited process was scheduled again");
}

/// Blocks until some child of the calling process exits, reaps it, and writes its exit status
/// through `status_out`. Fails immediately if the caller has no children at all.
pub fn wait(status_out: &mut i32) -> Result<Pid, KernelError> {
    let proc = current().expect("wait: no current process");

    // Held across the whole scan-and-maybe-sleep cycle, not just the scan: a child's `exit` takes
    // this same lock to reparent and to find us before calling `wakeup`, so as long as we hold it
    // continuously there is no window where it could decide we're done waiting without us finding
    // out — we only ever let go of it by handing it to `sleep`, which re-locks it for us on return.
    let mut parents = PROC_TABLE.parents.lock();

    loop {
        let mut has_children = false;
        let mut reaped = None;

        for (index, parent) in parents.iter().enumerate() {
            if *parent != Some(proc.index) {
                continue;
            }
            has_children = true;

            let child = PROC_TABLE.get(index);
            let child_inner = child.inner.lock();
            if child_inner.state == ProcState::Zombie {
                reaped = Some((index, child_inner.pid, child_inner.xstate));
                break;
            }
        }

        if let Some((index, pid, xstate)) = reaped {
            let child = PROC_TABLE.get(index);
            PROC_TABLE.free(child);
            parents[index] = None;
            *status_out = xstate;
            return Ok(pid);
        }

        if !has_children || proc.inner.lock().killed {
            return Err(KernelError::OutOfProc);
        }

        parents = sleep(Channel::Proc(proc.index), parents);
    }
}

/// Blocks the calling process on `channel`, releasing `guard`'s lock for the duration and
/// reacquiring it before returning. The condition the caller is waiting on must be re-checked
/// after `sleep` returns, exactly as with a condvar.
pub fn sleep<'a, T>(channel: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
    let proc = current().expect("sleep: no current process");

    // Acquire our own lock before releasing the condition lock, never the other way around:
    // once we hold `proc.inner`, `wakeup` (which also locks it) cannot resolve the condition
    // without first seeing us, so it's only safe to let the condition lock go after this point.
    let mut inner = proc.inner.lock();
    let condition_lock = SpinLock::unlock(guard);

    inner.channel = Some(channel);
    inner.state = ProcState::Sleeping;
    sched(inner);

    condition_lock.lock()
}

/// Wakes every process sleeping on `channel`, except the caller itself (a process never needs to
/// wake itself).
pub fn wakeup(channel: Channel) {
    let calling = current();
    for index in 0..NPROC {
        if calling.is_some_and(|c| c.index == index) {
            continue;
        }
        let proc = PROC_TABLE.get(index);
        let mut inner = proc.inner.lock();
        if inner.state == ProcState::Sleeping && inner.channel == Some(channel) {
            inner.state = ProcState::Runnable;
        }
    }
}

/// Marks the process with `pid` for termination. If it is currently sleeping it is made runnable
/// immediately so it can notice `killed` and unwind; a running or already-runnable process
/// notices at its own next convenient checkpoint.
pub fn kill(pid: Pid) -> Result<(), KernelError> {
    for index in 0..NPROC {
        let proc = PROC_TABLE.get(index);
        let mut inner = proc.inner.lock();
        if inner.pid == pid && inner.state != ProcState::Unused {
            inner.killed = true;
            if inner.state == ProcState::Sleeping {
                inner.state = ProcState::Runnable;
            }
            return Ok(());
        }
    }
    Err(KernelError::OutOfProc)
}

/// Gives up the CPU for one scheduling round, re-entering `Runnable` instead of `Sleeping`.
pub fn r#yield() {
    let proc = current().expect("yield: no current process");
    let mut inner = proc.inner.lock();
    inner.state = ProcState::Runnable;
    sched(inner);
}

/// Switches out of the calling process and back into the scheduler loop on this hart. The caller
/// must hold its own process's slot lock and have already set a non-`Running` state.
///
/// The lock is not dropped here: it is handed off across the switch rather than released,
/// exactly as the teacher's own `sched`/`scheduler` pair does, because the process's stack (and
/// everything on it, including a live `SpinLockGuard`) stays suspended — not unwound — for as
/// long as it sits `Sleeping`/`Runnable` in the table. Releasing it normally would mean running
/// the guard's `Drop` on a stack that is not going to execute again until this very function
/// returns, which only happens once the scheduler dispatches this process again; by then the
/// "release" needs to already have happened, on a *different* call stack (the scheduler's). So
/// the guard is forgotten here, and [`force_unlock`](crate::spinlock::SpinLock::force_unlock)
/// performs the matching release once this call resumes — at that point the scheduler has just
/// done the same forget-before-`swtch` in its own loop body, handing the lock back to us.
fn sched(inner: SpinLockGuard<'_, ProcInner>) {
    assert_ne!(inner.state, ProcState::Running, "sched: process still marked running");
    assert!(!riscv::interrupts::get(), "sched: interrupts enabled");

    let proc = current().expect("sched: no current process");
    let cpu = unsafe { &mut *CpuTable::current() };
    let was_enabled = cpu.interrupts_enabled;

    core::mem::forget(inner);

    let proc_context = &mut unsafe { proc.data() }.context as *mut Context;
    let scheduler_context = &cpu.scheduler_context as *const Context;
    unsafe { swtch(proc_context, scheduler_context) };

    // We have been dispatched again: the scheduler forgot its own guard on this same lock right
    // before switching into us, just as we did above before switching into it.
    unsafe { proc.inner.force_unlock() };
    cpu.interrupts_enabled = was_enabled;
}

/// Entry point for a freshly forked process the very first time it is scheduled. Releases the
/// lock inherited from whichever CPU called `sched()` to get here, performs one-time
/// filesystem initialization if this happens to be the very first process to run, and falls
/// through to the trap return path that resumes user-mode execution (out of scope here).
///
/// # Safety
/// Must only ever be reached via [`swtch`] switching into a context whose `ra` this module set
/// to this function, with the process's own slot lock held (and no other lock) by the inherited
/// calling convention.
pub unsafe extern "C" fn fork_ret() {
    static FIRST: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(true);

    let proc = current().expect("fork_ret: no current process");
    unsafe { proc.inner.force_unlock() };

    if FIRST.swap(false, Ordering::AcqRel) {
        fs::init();
    }

    #[cfg(not(test))]
    unsafe {
        usertrapret();
    }
}

/// The per-CPU scheduler loop: repeatedly scans the process table for a `Runnable` process,
/// switches into it, and waits for it to switch back (on block, yield, or exit). Enables
/// interrupts while idle so a timer or device interrupt can eventually make something runnable.
///
/// # Safety
/// Must run on its own dedicated thread of control per hart and never return.
pub unsafe fn scheduler() -> ! {
    let cpu = unsafe { &mut *CpuTable::current() };

    loop {
        riscv::interrupts::enable();

        let mut found = false;
        for index in 0..NPROC {
            let proc = PROC_TABLE.get(index);
            let mut inner = proc.inner.lock();
            if inner.state != ProcState::Runnable {
                continue;
            }
            inner.state = ProcState::Running;
            cpu.proc = Some(proc);
            found = true;

            // Hand this process's slot lock off across the switch instead of dropping it here;
            // `force_unlock` below releases it once the process has yielded, slept, or exited and
            // `swtch`'d back (or, the very first time, once `fork_ret`/`spawn_proc_thread`
            // releases the lock this same `forget` handed it).
            core::mem::forget(inner);

            let scheduler_context = &mut cpu.scheduler_context as *mut Context;
            let proc_context = &unsafe { proc.data() }.context as *const Context;
            unsafe { swtch(scheduler_context, proc_context) };
            unsafe { proc.inner.force_unlock() };
            cpu.proc = None;
        }

        if !found {
            #[cfg(not(test))]
            unsafe {
                core::arch::asm!("wfi");
            }
            #[cfg(test)]
            std::thread::yield_now();
        }
    }
}

/// Test-only harness for driving the scheduler and process dispatch with real OS threads,
/// standing in for `swtch`'s bare-metal register switch. See [`crate::swtch::test_support`].
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;
    use std::thread::JoinHandle;

    /// Serializes tests that touch `PROC_TABLE`/`CPU_TABLE`, which are process-wide singletons
    /// and would otherwise race across `cargo test`'s default parallel test execution.
    pub static TEST_LOCK: Mutex<()> = Mutex::new(());

    /// Spawns the OS thread that will run as a given process's body once the scheduler first
    /// dispatches it, mirroring the real kernel reaching `fork_ret` for the first time.
    pub fn spawn_proc_thread(proc: &'static Proc, body: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
        let context_addr = &unsafe { proc.data() }.context as *const Context as usize;
        std::thread::spawn(move || {
            crate::swtch::test_support::park_until_runnable(context_addr);
            unsafe { proc.inner.force_unlock() };
            body();
        })
    }

    /// Spawns a scheduler loop for one simulated hart.
    pub fn spawn_scheduler() -> JoinHandle<()> {
        std::thread::spawn(|| unsafe { scheduler() })
    }

    /// Spawns exactly one scheduler thread for the lifetime of the test binary. Every test that
    /// needs real dispatch shares it rather than starting its own: `scheduler()` never returns
    /// and scans the whole (process-wide) `PROC_TABLE`, so a second one would race the first to
    /// dispatch processes meant for a different test.
    pub fn ensure_scheduler_running() {
        static STARTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        STARTED.get_or_init(|| {
            spawn_scheduler();
        });
    }

    /// Scans the table for the process currently holding `pid`. Used by tests that need to reach
    /// a just-forked child to spawn its own OS thread, the way the real scheduler would dispatch
    /// it rather than the parent having a reference handed to it.
    pub fn find_by_pid(pid: Pid) -> &'static Proc {
        for index in 0..NPROC {
            let proc = PROC_TABLE.get(index);
            if proc.inner.lock().pid == pid {
                return proc;
            }
        }
        panic!("find_by_pid: no process with pid {}", pid.as_usize());
    }

    /// Allocates a fresh `Runnable` process, spawns its OS thread to run `body`, and reports
    /// `body`'s return value back to the caller once it completes. `body` should not call
    /// `proc::exit` itself (unless it means to diverge and never report back); this wrapper
    /// always calls it afterward so the process's slot lock and scheduler dispatch for it are
    /// properly retired instead of leaving the simulated hart parked forever.
    pub fn spawn_test_process<F, T>(body: F) -> (Pid, std::sync::mpsc::Receiver<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        ensure_scheduler_running();

        let proc = PROC_TABLE.alloc().expect("alloc process for test");
        let pid = proc.inner.lock().pid;
        proc.inner.lock().state = ProcState::Runnable;

        let (done_tx, done_rx) = std::sync::mpsc::channel::<T>();
        spawn_proc_thread(proc, move || {
            let result = body();
            let _ = done_tx.send(result);
            exit(0);
        });
        (pid, done_rx)
    }

    /// Whoever is currently interested in init's reap loop, registered by
    /// `register_init_listener`. `TEST_LOCK` guarantees only one test cares at a time.
    static INIT_LISTENER: Mutex<Option<std::sync::mpsc::Sender<(Pid, i32)>>> = Mutex::new(None);

    /// Ensures a live init process exists: a process whose OS thread loops `wait`ing forever,
    /// reaping whatever orphan shows up and reporting it to the current listener, mirroring the
    /// real `initcode`'s reap loop. Reuses whatever `INIT_PROC` already names if an earlier test
    /// (e.g. the pure-`reparent` unit test) already set one.
    pub fn ensure_init_process() {
        static STARTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        STARTED.get_or_init(|| {
            let proc = match INIT_PROC.get() {
                Some(&index) => PROC_TABLE.get(index),
                None => {
                    let proc = PROC_TABLE.alloc().expect("alloc init process for test");
                    INIT_PROC.initialize(|| Ok::<_, ()>(proc.index));
                    proc
                }
            };
            proc.inner.lock().state = ProcState::Runnable;

            ensure_scheduler_running();
            spawn_proc_thread(proc, || loop {
                let mut status = 0;
                match wait(&mut status) {
                    Ok(pid) => {
                        if let Some(tx) = INIT_LISTENER.lock().unwrap().as_ref() {
                            let _ = tx.send((pid, status));
                        }
                    }
                    // No children waiting on init at all right now; it has nothing to sleep on,
                    // so poll instead of busy-spinning the scheduler.
                    Err(_) => r#yield(),
                }
            });
        });
    }

    /// Registers the caller as the listener for init's next reaped children.
    pub fn register_init_listener() -> std::sync::mpsc::Receiver<(Pid, i32)> {
        let (tx, rx) = std::sync::mpsc::channel();
        *INIT_LISTENER.lock().unwrap() = Some(tx);
        rx
    }
}
