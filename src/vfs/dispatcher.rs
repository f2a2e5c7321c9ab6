// Dispatcher: entry points, job routing, and the reply guarantee.
//
// Every accepted call either completes with a result code or parks in a
// well-defined blocked state; there is no third outcome. One call runs per
// client at a time: a second call parks in the client's pending slot and is
// re-dispatched when the first finishes, a third is refused with EAGAIN.
// Calls arriving from a mounted file-system server are back-calls: while no
// ordinary worker is free they are admitted only to the reserved deadlock
// breaker, and refused with EAGAIN when it is busy too.

use crate::interface::{syscall_error, Errno, RustAtomicOrdering, RustLock, RustRfc, VERBOSE};
use crate::vfs::message::{CtlCall, CtlResult, Endpoint, Origin, Pid, VfsCall};
use crate::vfs::process::{proctable_getref, FsProcess};
use crate::vfs::suspend::{self, SuspendKind};
use crate::vfs::worker::{fresh_call_id, Job, ReplySlot, SysJob, SysReplySlot, POOL};
use crate::vfs::{calls, mount, process, transport, vnode};

#[derive(Debug, Clone, Copy)]
pub struct VfsConfig {
    pub nthreads: usize,
    pub max_symlink_hops: u32,
    pub verbosity: isize,
}

impl VfsConfig {
    pub const fn new() -> VfsConfig {
        VfsConfig {
            nthreads: crate::vfs::worker::NR_WTHREADS,
            max_symlink_hops: 16,
            verbosity: 0,
        }
    }
}

impl Default for VfsConfig {
    fn default() -> VfsConfig {
        VfsConfig::new()
    }
}

static CONFIG: RustLock<VfsConfig> = RustLock::new(VfsConfig::new());

pub fn config() -> VfsConfig {
    *CONFIG.read()
}

/// Brings the dispatch core up: worker pool, reserved workers, verbosity.
/// Tables start empty; the first mount call populates them.
pub fn vfsinit(cfg: VfsConfig) {
    let _ = VERBOSE.set(cfg.verbosity);
    *CONFIG.write() = cfg;
    POOL.start(cfg.nthreads);
    log::info!(
        "vfs dispatch core up: {} workers + system + deadlock-breaker",
        cfg.nthreads
    );
}

/// Tears everything down: stops the workers and empties every table. Meant
/// for tests and orderly shutdown; outstanding calls must be done first.
pub fn vfsfinalize() {
    POOL.shutdown();
    process::proctable_clear();
    transport::clear_registry();
    suspend::clear_stray_notifies();
    vnode::clear_vnode_table();
    mount::clear_vmnt_table();
}

/// What one executed call produced.
pub enum CallResult {
    Done(i32),
    /// Park the job; the reply comes later through revival.
    Suspend(SuspendKind),
    /// Replay the whole call from the reserved deadlock worker.
    Reroute,
}

/// Client entry point: blocks the calling thread until the call's reply.
pub fn vfs_call(pid: Pid, call: VfsCall) -> i32 {
    submit_call(pid, Origin::Client(pid), call)
}

/// Entry point for calls issued by a mounted file-system server on its own
/// behalf. Subject to the deadlock-breaker admission rule.
pub fn server_call(pid: Pid, fs_e: Endpoint, call: VfsCall) -> i32 {
    submit_call(pid, Origin::Server(fs_e), call)
}

fn submit_call(pid: Pid, origin: Origin, call: VfsCall) -> i32 {
    let proc_obj = match proctable_getref(pid) {
        Some(p) => p,
        None => return syscall_error(Errno::ESRCH, "dispatch", "unknown process"),
    };
    let reply = RustRfc::new(ReplySlot::new());
    let job = Job {
        call_id: fresh_call_id(),
        pid,
        origin,
        call,
        reply: reply.clone(),
        reserved: false,
    };

    if proc_obj.in_flight.swap(true, RustAtomicOrdering::SeqCst) {
        // Second concurrent call from this client parks; a third is refused.
        let mut pending = proc_obj.pending.lock();
        if pending.is_some() {
            return syscall_error(Errno::EAGAIN, "dispatch", "client already has a parked call");
        }
        *pending = Some(job);
        drop(pending);
        // The first call may have finished between the swap above and the
        // store: its call_finished saw an empty slot and cleared in_flight,
        // leaving nobody to drain what was just parked. Claim the client
        // back; whoever wins the swap dispatches the slot.
        if !proc_obj.in_flight.swap(true, RustAtomicOrdering::SeqCst) {
            match proc_obj.pending.lock().take() {
                Some(job) => POOL.submit(job),
                None => proc_obj.in_flight.store(false, RustAtomicOrdering::SeqCst),
            }
        }
        return reply.wait();
    }

    let backcall = match origin {
        Origin::Server(e) => mount::is_mounted_server(e),
        Origin::Client(_) => false,
    };
    if backcall && POOL.free_workers() == 0 {
        let mut job = job;
        job.reserved = true;
        if let Err(refused) = POOL.submit_deadlock(job) {
            drop(refused);
            proc_obj.in_flight.store(false, RustAtomicOrdering::SeqCst);
            return syscall_error(
                Errno::EAGAIN,
                "dispatch",
                "deadlock-breaker busy; retry the request",
            );
        }
    } else {
        POOL.submit(job);
    }
    reply.wait()
}

/// Runs one job on the current worker thread. Called from the pool only.
pub fn run_job(job: Job) {
    let proc_obj = match proctable_getref(job.pid) {
        Some(p) => p,
        None => {
            job.reply
                .complete(syscall_error(Errno::ESRCH, "dispatch", "process vanished"));
            return;
        }
    };

    // While a back-call from a mounted server runs, that server gets no new
    // requests from us; its mount's admission queue stalls.
    let back_mount = match job.origin {
        Origin::Server(e) => mount::find_vmnt_by_endpoint(e),
        Origin::Client(_) => None,
    };
    if let Some(m) = back_mount {
        mount::vmnt(m).set_backcall(true);
    }

    let ctx = job.ctx();
    // Sampled before the call runs: if a revival sweep fires between the
    // call's would-block check and its park, the sequence moves and the park
    // replays the job instead of sleeping through the event.
    let seq = suspend::wake_seq();
    let result = calls::execute(&ctx, &proc_obj, &job.call);

    if let Some(m) = back_mount {
        mount::vmnt(m).set_backcall(false);
    }

    match result {
        CallResult::Done(mut code) => {
            // A cancel that arrived during an open-retry sequence is honored
            // only now that the open ran to completion.
            if proc_obj.cancel_pending.swap(false, RustAtomicOrdering::SeqCst) {
                if let VfsCall::Open { .. } = job.call {
                    if code >= 0 {
                        proc_obj.close_fd_quiet(code);
                        code = syscall_error(Errno::EINTR, "open", "interrupted after retry");
                    }
                }
            }
            job.reply.complete(code);
            call_finished(&proc_obj);
        }
        CallResult::Suspend(kind) => {
            suspend::park(&proc_obj, job, kind, seq);
        }
        CallResult::Reroute => {
            if job.reserved {
                // already on the reserved worker; give up rather than loop
                job.reply.complete(syscall_error(
                    Errno::EAGAIN,
                    "dispatch",
                    "server backpressure persisted on reserved worker",
                ));
                call_finished(&proc_obj);
                return;
            }
            let mut job = job;
            job.reserved = true;
            if let Err(refused) = POOL.submit_deadlock(job) {
                refused.reply.complete(syscall_error(
                    Errno::EAGAIN,
                    "dispatch",
                    "deadlock-breaker busy; retry the request",
                ));
                call_finished(&proc_obj);
            }
        }
    }
}

/// Closes out one call's occupancy of its client: re-dispatches a parked
/// call if there is one, otherwise the client goes idle.
pub fn call_finished(proc_obj: &FsProcess) {
    let parked = proc_obj.pending.lock().take();
    match parked {
        Some(job) => POOL.submit(job),
        None => proc_obj.in_flight.store(false, RustAtomicOrdering::SeqCst),
    }
}

/// Process-manager entry point; serviced only by the reserved system worker.
pub fn ctl_call(call: CtlCall) -> CtlResult {
    let reply = RustRfc::new(SysReplySlot::new());
    POOL.submit_system(SysJob {
        call,
        reply: reply.clone(),
    });
    reply.wait()
}

pub fn run_ctl_job(job: SysJob) {
    let result = match job.call {
        CtlCall::Fork { parent, child } => CtlResult::Code(calls::sys_calls::fork_syscall(parent, child)),
        CtlCall::Exec { pid } => CtlResult::Code(calls::sys_calls::exec_syscall(pid)),
        CtlCall::Exit { pid } => CtlResult::Code(calls::sys_calls::exit_syscall(pid)),
        CtlCall::Setcred { pid, uid, gid } => {
            CtlResult::Code(calls::sys_calls::setcred_syscall(pid, uid, gid))
        }
        CtlCall::Unpause { pid } => CtlResult::Code(suspend::cancel(pid)),
        CtlCall::Snapshot => CtlResult::Snapshot(calls::sys_calls::snapshot_json()),
    };
    job.reply.complete(result);
}
