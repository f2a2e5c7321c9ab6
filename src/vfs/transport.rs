// RPC transport to file-system servers and device drivers.
//
// Servers run as threads behind mpsc channels. Every request carries a fresh
// transaction id; the sending worker parks on a reply slot keyed by that id
// and the server's response thread completes it. A response whose id matches
// no slot is logged and dropped. Requests routed through a mount entry pass
// its admission gate first, so a volume never sees more than its configured
// number of in-flight requests and queued senders go in FIFO order.

use crate::interface::{
    revoke_grant, set_grant, Errno, GrantAccess, GrantKind, MemSpace, RustAtomicOrdering,
    RustAtomicU64, RustCondvar, RustHashMap, RustLazyGlobal, RustLock, RustMutex, RustRfc,
};
use crate::vfs::message::{
    DevOp, DevReply, DevRequest, DevResponse, Endpoint, FsOp, FsReply, FsRequest, FsResponse,
    InodeNr, Pid, Tid,
};
use crate::vfs::mount;
use crate::vfs::worker::CallCtx;
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server's channel is gone; the caller sees an I/O error.
    #[error("server endpoint is dead")]
    Dead,
    /// The server is dodging a deadlock and wants the request re-issued from
    /// the reserved worker.
    #[error("server asked for deadlock-avoidance rerouting")]
    Backpressure,
    /// Server answered the operation with an error code.
    #[error("server returned errno {0:?}")]
    Fail(Errno),
    /// Reply shape did not match the request.
    #[error("malformed reply")]
    Protocol,
}

struct ReplyWait<T> {
    st: RustMutex<Option<T>>,
    cv: RustCondvar,
}

impl<T> ReplyWait<T> {
    fn new() -> ReplyWait<T> {
        ReplyWait {
            st: RustMutex::new(None),
            cv: RustCondvar::new(),
        }
    }

    fn complete(&self, v: T) {
        let mut st = self.st.lock();
        *st = Some(v);
        self.cv.notify_all();
    }

    fn wait(&self) -> T {
        let mut st = self.st.lock();
        while st.is_none() {
            self.cv.wait(&mut st);
        }
        st.take().unwrap()
    }
}

static FS_SERVERS: RustLazyGlobal<RustHashMap<u32, Sender<FsRequest>>> =
    RustLazyGlobal::new(RustHashMap::new);
static DRIVERS: RustLazyGlobal<RustHashMap<u32, Sender<DevRequest>>> =
    RustLazyGlobal::new(RustHashMap::new);

static FS_SLOTS: RustLazyGlobal<RustHashMap<Tid, RustRfc<ReplyWait<FsReply>>>> =
    RustLazyGlobal::new(RustHashMap::new);
static DEV_SLOTS: RustLazyGlobal<RustHashMap<Tid, RustRfc<ReplyWait<DevReply>>>> =
    RustLazyGlobal::new(RustHashMap::new);

static NEXT_TID: RustAtomicU64 = RustAtomicU64::new(1);

pub fn alloc_tid() -> Tid {
    NEXT_TID.fetch_add(1, RustAtomicOrdering::Relaxed)
}

pub fn register_fs_server(e: Endpoint, tx: Sender<FsRequest>) {
    FS_SERVERS.insert(e.0, tx);
}

pub fn unregister_fs_server(e: Endpoint) {
    FS_SERVERS.remove(&e.0);
}

pub fn register_driver(major: u32, tx: Sender<DevRequest>) {
    DRIVERS.insert(major, tx);
}

pub fn unregister_driver(major: u32) {
    DRIVERS.remove(&major);
}

pub fn clear_registry() {
    FS_SERVERS.clear();
    DRIVERS.clear();
    FS_SLOTS.clear();
    DEV_SLOTS.clear();
}

/// Response path for file-system servers.
pub fn deliver_fs_response(resp: FsResponse) {
    match FS_SLOTS.remove(&resp.tid) {
        Some((_, slot)) => slot.complete(resp.reply),
        None => log::warn!("unmatched fs reply for tid {}; dropped", resp.tid),
    }
}

/// Response path for drivers. The first response to a transaction completes
/// the waiting sender; a later one (deferred completion after Suspended or
/// RetryOpen) is handed to the suspend manager.
pub fn deliver_dev_response(resp: DevResponse) {
    match DEV_SLOTS.remove(&resp.tid) {
        Some((_, slot)) => slot.complete(resp.reply),
        None => crate::vfs::suspend::dev_notify(resp.tid, resp.reply),
    }
}

/// One request/reply round trip to a file-system server, no admission.
pub fn request(fs_e: Endpoint, op: FsOp) -> Result<FsReply, TransportError> {
    let tx = match FS_SERVERS.get(&fs_e.0) {
        Some(entry) => entry.value().clone(),
        None => return Err(TransportError::Dead),
    };
    let tid = alloc_tid();
    let slot = RustRfc::new(ReplyWait::new());
    FS_SLOTS.insert(tid, slot.clone());
    if tx.send(FsRequest { tid, op }).is_err() {
        FS_SLOTS.remove(&tid);
        return Err(TransportError::Dead);
    }
    let reply = slot.wait();
    match reply {
        FsReply::Backpressure => Err(TransportError::Backpressure),
        FsReply::Err(e) => Err(TransportError::Fail(e)),
        other => Ok(other),
    }
}

/// Round trip through a mount entry's admission gate. The ceiling and FIFO
/// hold here; `ctx` is only used for tracing.
pub fn request_via_mount(
    ctx: &CallCtx,
    vmnt_idx: usize,
    op: FsOp,
) -> Result<FsReply, TransportError> {
    let mp = mount::vmnt(vmnt_idx);
    let fs_e = match mp.inner.read().as_ref() {
        Some(v) => v.fs_e,
        None => return Err(TransportError::Dead),
    };
    mp.acquire_send_slot();
    log::trace!("call {:?} -> fs {:?}: {:?}", ctx.call, fs_e, op);
    let res = request(fs_e, op);
    mp.release_send_slot();
    res
}

/// Tells the owning server the last local reference to an inode went away.
/// Fire-and-forget from the caller's point of view; a dead server just means
/// there is nothing left to drop.
pub fn put_node(fs_e: Endpoint, ino: InodeNr) {
    if let Err(e) = request(fs_e, FsOp::PutNode { ino }) {
        log::debug!("put_node({:?}, {}) failed: {}", fs_e, ino, e);
    }
}

enum GrantDir {
    /// Server fills client memory (read call).
    In,
    /// Server consumes client memory (write call).
    Out,
}

// The speculative-then-direct dance: try a grant that skips the page-in
// handshake; if the server faults on it, page the range in, issue a direct
// grant and retry exactly once. Grants are revoked on every exit path.
fn grant_round_trip(
    ctx: &CallCtx,
    vmnt_idx: usize,
    mem: &RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
    dir: GrantDir,
    build: impl Fn(crate::interface::GrantId) -> FsOp,
) -> Result<(usize, u64), TransportError> {
    let access = match dir {
        GrantDir::In => GrantAccess::Write,
        GrantDir::Out => GrantAccess::Read,
    };
    let mut kind = GrantKind::Speculative;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let grant = match set_grant(mem, start, len, access, kind) {
            Ok(g) => g,
            // the client named a buffer outside its own memory image
            Err(_) => return Err(TransportError::Fail(Errno::EFAULT)),
        };
        let reply = request_via_mount(ctx, vmnt_idx, build(grant.id()));
        revoke_grant(grant);
        match reply {
            Ok(FsReply::Bytes { count, new_size }) => return Ok((count, new_size)),
            Ok(FsReply::GrantFault) => {
                if attempts >= 2 {
                    // the direct grant was paged in before issue; a second
                    // fault is the server misbehaving
                    return Err(TransportError::Fail(Errno::EFAULT));
                }
                log::debug!("call {:?}: grant fault, retrying with direct grant", ctx.call);
                mem.write().page_in(start, len);
                kind = GrantKind::Direct;
            }
            Ok(FsReply::Ok) => return Ok((0, 0)),
            Ok(_) => return Err(TransportError::Protocol),
            Err(e) => return Err(e),
        }
    }
}

/// Grant-based file read: the server writes up to `len` bytes of the file at
/// `pos` into client memory at `start`.
pub fn fs_read(
    ctx: &CallCtx,
    vmnt_idx: usize,
    ino: InodeNr,
    pos: u64,
    mem: &RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
) -> Result<(usize, u64), TransportError> {
    grant_round_trip(ctx, vmnt_idx, mem, start, len, GrantDir::In, |grant| {
        FsOp::Read { ino, pos, grant, len }
    })
}

/// Grant-based file write, mirroring fs_read.
pub fn fs_write(
    ctx: &CallCtx,
    vmnt_idx: usize,
    ino: InodeNr,
    pos: u64,
    mem: &RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
) -> Result<(usize, u64), TransportError> {
    grant_round_trip(ctx, vmnt_idx, mem, start, len, GrantDir::Out, |grant| {
        FsOp::Write { ino, pos, grant, len }
    })
}

/// Readlink needs a grant for the target buffer but no mount admission
/// bypass; it reuses the same retry discipline.
pub fn fs_rdlink(
    ctx: &CallCtx,
    vmnt_idx: usize,
    ino: InodeNr,
    mem: &RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
) -> Result<(usize, u64), TransportError> {
    grant_round_trip(ctx, vmnt_idx, mem, start, len, GrantDir::In, |grant| {
        FsOp::Rdlink { ino, grant, len }
    })
}

/// First round trip to a driver. Done/Err complete here; Suspended and
/// RetryOpen come back to the caller, which parks the client under this
/// transaction id and finishes through deliver_dev_response.
pub fn dev_request(pid: Pid, major: u32, op: DevOp) -> Result<(Tid, DevReply), TransportError> {
    let tx = match DRIVERS.get(&major) {
        Some(entry) => entry.value().clone(),
        None => return Err(TransportError::Dead),
    };
    let tid = alloc_tid();
    let slot = RustRfc::new(ReplyWait::new());
    DEV_SLOTS.insert(tid, slot.clone());
    if tx.send(DevRequest { tid, pid, op }).is_err() {
        DEV_SLOTS.remove(&tid);
        return Err(TransportError::Dead);
    }
    Ok((tid, slot.wait()))
}

/// Cancels a suspended device operation. The driver still answers the
/// original transaction id, with its result or EINTR.
pub fn dev_cancel(major: u32, minor: u32, tid: Tid) {
    let tx = match DRIVERS.get(&major) {
        Some(entry) => entry.value().clone(),
        None => {
            log::warn!("cancel for dead driver major {}", major);
            return;
        }
    };
    let cancel_tid = alloc_tid();
    if tx
        .send(DevRequest {
            tid: cancel_tid,
            pid: 0,
            op: DevOp::Cancel { minor, tid },
        })
        .is_err()
    {
        log::warn!("cancel for dead driver major {}", major);
    }
}

/// Maps a transport failure to the errno a client sees. Backpressure never
/// reaches this: the dispatcher reroutes it instead.
pub fn transport_errno(e: TransportError) -> Errno {
    match e {
        TransportError::Dead => Errno::EIO,
        TransportError::Protocol => Errno::EIO,
        TransportError::Fail(errno) => errno,
        TransportError::Backpressure => Errno::EAGAIN,
    }
}
