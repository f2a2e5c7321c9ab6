// Suspend/revive manager.
//
// A call that cannot complete parks in its process's blocked-state slot,
// taking the whole job (arguments and reply slot) with it so nothing about
// the call survives anywhere else. Pipe, lock and select revival re-inject
// the original job at the head of the worker queue and it runs again from
// the top; device completion carries a result and finishes the call in
// place. Each blocked state that holds a grant revokes it exactly once, on
// completion or on cancellation, enforced by moving the Grant handle out of
// the state.
//
// The decision to block and the act of parking are not one atomic step: the
// call observes "no progress possible" inside execute, returns, and only
// then does the dispatcher store the blocked state. An event landing in
// that window must not be lost. WAKE_SEQ counts revival sweeps; the
// dispatcher samples it before execute and park re-checks it under
// SUSPEND_SYNC, replaying the call instead of parking past an event.
// Device completions are matched by transaction id rather than by sweep, so
// one that arrives early is stashed and consumed when the park lands.

use crate::interface::{
    revoke_grant, syscall_error, Errno, Grant, RustAtomicOrdering, RustAtomicU64, RustHashMap,
    RustLazyGlobal, RustMutex, RustRfc,
};
use crate::vfs::filedesc::Filp;
use crate::vfs::message::{DevReply, Pid, Tid};
use crate::vfs::process::{proctable_getref, FsProcess, PROC_TABLE};
use crate::vfs::worker::{Job, POOL};

// Bumped (under SUSPEND_SYNC) by every revival sweep.
static WAKE_SEQ: RustAtomicU64 = RustAtomicU64::new(0);

// Serializes parking against the revival sweeps and deferred device
// completions. Held only around state transitions, never across a reply.
static SUSPEND_SYNC: RustMutex<()> = RustMutex::new(());

// Device completions that arrived before their caller finished parking.
static STRAY_NOTIFIES: RustLazyGlobal<RustHashMap<Tid, DevReply>> =
    RustLazyGlobal::new(RustHashMap::new);

/// Sampled by the dispatcher before a call executes; passed back to `park`.
pub fn wake_seq() -> u64 {
    WAKE_SEQ.load(RustAtomicOrdering::SeqCst)
}

/// Finalize/test helper; a stray completion must not leak into the next run.
pub fn clear_stray_notifies() {
    STRAY_NOTIFIES.clear();
}

pub enum BlockedState {
    Running,
    /// Pipe had no data (read) or no room (write); any pipe activity revives.
    Pipe { job: Job },
    /// A lock acquisition was refused without blocking; any unlock revives.
    Lock { job: Job },
    Select { job: Job },
    /// A driver accepted the operation and will complete it later under the
    /// same transaction id.
    Device {
        job: Job,
        tid: Tid,
        major: u32,
        minor: u32,
        grant: Option<Grant>,
        filp: Option<RustRfc<Filp>>,
        advance_offset: bool,
    },
    /// A driver asked for the open to be replayed once it is ready.
    OpenRetry { job: Job, tid: Tid, major: u32 },
}

impl BlockedState {
    pub fn tag(&self) -> &'static str {
        match self {
            BlockedState::Running => "running",
            BlockedState::Pipe { .. } => "pipe",
            BlockedState::Lock { .. } => "lock",
            BlockedState::Select { .. } => "select",
            BlockedState::Device { .. } => "device",
            BlockedState::OpenRetry { .. } => "open-retry",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BlockedState::Running)
    }
}

/// What a call implementation reports upward when it must block; the
/// dispatcher marries it with the job to form the blocked state.
pub enum SuspendKind {
    Pipe,
    Lock,
    Select,
    Device {
        tid: Tid,
        major: u32,
        minor: u32,
        grant: Option<Grant>,
        filp: Option<RustRfc<Filp>>,
        advance_offset: bool,
    },
    OpenRetry { tid: Tid, major: u32 },
}

/// Parks a job in its process's blocked-state slot. `seq` is the wake
/// sequence the dispatcher sampled before the call ran: if it moved, a
/// revival sweep fired while the call was deciding to block, so the job is
/// replayed instead of parked. Device and open-retry parks are matched by
/// transaction id instead and consume a completion that raced ahead.
pub fn park(proc_obj: &FsProcess, job: Job, kind: SuspendKind, seq: u64) {
    let sync = SUSPEND_SYNC.lock();
    let dev_tid = match &kind {
        SuspendKind::Device { tid, .. } | SuspendKind::OpenRetry { tid, .. } => Some(*tid),
        _ => None,
    };
    if dev_tid.is_none() && WAKE_SEQ.load(RustAtomicOrdering::SeqCst) != seq {
        drop(sync);
        log::debug!("pid {}: event during suspend window, replaying", proc_obj.pid);
        reinject(job);
        return;
    }
    {
        let mut blocked = proc_obj.blocked.lock();
        assert!(blocked.is_running(), "process suspended twice");
        log::debug!("pid {} parks: {}", proc_obj.pid, match kind {
            SuspendKind::Pipe => "pipe",
            SuspendKind::Lock => "lock",
            SuspendKind::Select => "select",
            SuspendKind::Device { .. } => "device",
            SuspendKind::OpenRetry { .. } => "open-retry",
        });
        *blocked = match kind {
            SuspendKind::Pipe => BlockedState::Pipe { job },
            SuspendKind::Lock => BlockedState::Lock { job },
            SuspendKind::Select => BlockedState::Select { job },
            SuspendKind::Device {
                tid,
                major,
                minor,
                grant,
                filp,
                advance_offset,
            } => BlockedState::Device {
                job,
                tid,
                major,
                minor,
                grant,
                filp,
                advance_offset,
            },
            SuspendKind::OpenRetry { tid, major } => BlockedState::OpenRetry { job, tid, major },
        };
    }
    if let Some(tid) = dev_tid {
        if let Some((_, reply)) = STRAY_NOTIFIES.remove(&tid) {
            drop(sync);
            dev_notify(tid, reply);
        }
    }
}

fn reinject(job: Job) {
    POOL.submit_front(job);
}

/// Pipe activity (write, read making room, close) wakes every pipe-blocked
/// call; each re-checks its own pipe from the top and may park again. The
/// sweep bumps WAKE_SEQ under SUSPEND_SYNC so a call between its would-block
/// check and its park cannot sleep through the event.
pub fn revive_pipe_waiters() {
    let _sync = SUSPEND_SYNC.lock();
    WAKE_SEQ.fetch_add(1, RustAtomicOrdering::SeqCst);
    for entry in PROC_TABLE.iter() {
        let p = entry.value();
        let mut blocked = p.blocked.lock();
        if matches!(*blocked, BlockedState::Pipe { .. }) {
            if let BlockedState::Pipe { job } = std::mem::replace(&mut *blocked, BlockedState::Running) {
                reinject(job);
            }
        }
    }
}

/// Any lock release may unblock a lock-refused call; replay is verbatim so
/// re-checking is free.
pub fn revive_lock_waiters() {
    let _sync = SUSPEND_SYNC.lock();
    WAKE_SEQ.fetch_add(1, RustAtomicOrdering::SeqCst);
    for entry in PROC_TABLE.iter() {
        let p = entry.value();
        let mut blocked = p.blocked.lock();
        if matches!(*blocked, BlockedState::Lock { .. }) {
            if let BlockedState::Lock { job } = std::mem::replace(&mut *blocked, BlockedState::Running) {
                reinject(job);
            }
        }
    }
}

pub fn revive_select_waiters() {
    let _sync = SUSPEND_SYNC.lock();
    WAKE_SEQ.fetch_add(1, RustAtomicOrdering::SeqCst);
    for entry in PROC_TABLE.iter() {
        let p = entry.value();
        let mut blocked = p.blocked.lock();
        if matches!(*blocked, BlockedState::Select { .. }) {
            if let BlockedState::Select { job } = std::mem::replace(&mut *blocked, BlockedState::Running) {
                reinject(job);
            }
        }
    }
}

/// Deferred completion from a device driver, matched by transaction id. A
/// device-blocked call finishes in place with the driver's result; an
/// open-retry call is replayed from the top. A notify whose caller has not
/// finished parking yet is stashed and consumed by the park itself.
pub fn dev_notify(tid: Tid, reply: DevReply) {
    let sync = SUSPEND_SYNC.lock();
    for entry in PROC_TABLE.iter() {
        let p = entry.value();
        let mut blocked = p.blocked.lock();
        let matches_tid = match &*blocked {
            BlockedState::Device { tid: t, .. } => *t == tid,
            BlockedState::OpenRetry { tid: t, .. } => *t == tid,
            _ => false,
        };
        if !matches_tid {
            continue;
        }
        match std::mem::replace(&mut *blocked, BlockedState::Running) {
            BlockedState::Device {
                job,
                tid,
                major,
                minor,
                grant,
                filp,
                advance_offset,
            } => {
                if matches!(reply, DevReply::Suspended | DevReply::RetryOpen) {
                    log::warn!("driver re-suspended tid {}; notify dropped", tid);
                    *blocked = BlockedState::Device {
                        job,
                        tid,
                        major,
                        minor,
                        grant,
                        filp,
                        advance_offset,
                    };
                    return;
                }
                if let Some(g) = grant {
                    revoke_grant(g);
                }
                let code = match reply {
                    DevReply::Done(n) => {
                        if advance_offset && n > 0 {
                            if let Some(f) = filp {
                                *f.offset.lock() += n as u64;
                            }
                        }
                        n
                    }
                    DevReply::Err(e) => syscall_error(e, "dev_notify", "driver failed the operation"),
                    DevReply::Suspended | DevReply::RetryOpen => unreachable!(),
                };
                drop(blocked);
                drop(sync);
                job.reply.complete(code);
                crate::vfs::dispatcher::call_finished(&p);
            }
            BlockedState::OpenRetry { job, .. } => {
                drop(blocked);
                drop(sync);
                reinject(job);
            }
            _ => unreachable!(),
        }
        return;
    }
    // The caller is still between the driver's first reply and its park;
    // hold the completion until the park looks for it.
    log::debug!("device notify for tid {} arrived before its park; held", tid);
    STRAY_NOTIFIES.insert(tid, reply);
}

/// Signal-triggered cancellation. Pipe, lock and select waits abort at once
/// with EINTR. A device wait first tells the driver to cancel and finishes
/// whenever the driver's notify arrives. An open-retry sequence is never
/// aborted mid-flight; the cancel is remembered and honored when the open
/// completes.
pub fn cancel(pid: Pid) -> i32 {
    let p = match proctable_getref(pid) {
        Some(p) => p,
        None => return syscall_error(Errno::EINVAL, "unpause", "no such process"),
    };
    let mut blocked = p.blocked.lock();
    match &*blocked {
        BlockedState::Running => 0,
        BlockedState::Pipe { .. } | BlockedState::Lock { .. } | BlockedState::Select { .. } => {
            let st = std::mem::replace(&mut *blocked, BlockedState::Running);
            let job = match st {
                BlockedState::Pipe { job }
                | BlockedState::Lock { job }
                | BlockedState::Select { job } => job,
                _ => unreachable!(),
            };
            drop(blocked);
            job.reply
                .complete(syscall_error(Errno::EINTR, "unpause", "blocked call interrupted"));
            crate::vfs::dispatcher::call_finished(&p);
            0
        }
        BlockedState::Device { tid, major, minor, .. } => {
            let (tid, major, minor) = (*tid, *major, *minor);
            drop(blocked);
            crate::vfs::transport::dev_cancel(major, minor, tid);
            0
        }
        BlockedState::OpenRetry { .. } => {
            p.cancel_pending.store(true, RustAtomicOrdering::SeqCst);
            0
        }
    }
}
