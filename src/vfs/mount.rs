// Mount table: one entry per mounted volume.
//
// Each entry carries its own tri-state lock plus an admission gate bounding
// how many requests are in flight to the owning server at once; workers past
// the ceiling wait on a FIFO ticket queue. Exactly one entry may exist per
// device number; the root vnode of a volume always points back at its own
// entry.

use crate::interface;
use crate::interface::{
    LockError, LockStrength, RustCondvar, RustLazyGlobal, RustLock, RustMutex, RustRfc, TriLock,
};
use crate::vfs::message::{Endpoint, Origin};
use crate::vfs::worker::CallCtx;

pub const NR_MNTS: usize = 16;
pub const DEFAULT_MAX_CONCURRENT: u16 = 8;

#[derive(Debug, Clone)]
pub struct VmntInner {
    pub fs_e: Endpoint,
    pub dev: u64,
    pub readonly: bool,
    /// Vnode index of the directory this volume covers; None for the root
    /// volume.
    pub mounted_on: Option<usize>,
    /// Vnode index of this volume's root.
    pub root_node: Option<usize>,
    pub label: String,
    pub max_concurrent: u16,
}

struct AdmState {
    in_flight: u16,
    head: u64,
    tail: u64,
    backcall: bool,
}

// FIFO admission: a sender takes a ticket and waits for its turn and a free
// slot. An outstanding back-call from the mounted server stalls the queue so
// the server is never handed new work while it waits on us.
struct Admission {
    st: RustMutex<AdmState>,
    cv: RustCondvar,
}

pub struct Vmnt {
    pub lock: TriLock,
    pub inner: RustLock<Option<VmntInner>>,
    admission: Admission,
}

impl Vmnt {
    fn new() -> Vmnt {
        Vmnt {
            lock: TriLock::new(),
            inner: RustLock::new(None),
            admission: Admission {
                st: RustMutex::new(AdmState {
                    in_flight: 0,
                    head: 0,
                    tail: 0,
                    backcall: false,
                }),
                cv: RustCondvar::new(),
            },
        }
    }

    /// Blocks until this sender may issue one request to the mount's server.
    pub fn acquire_send_slot(&self) {
        let max = self
            .inner
            .read()
            .as_ref()
            .map(|v| v.max_concurrent)
            .unwrap_or(DEFAULT_MAX_CONCURRENT)
            .max(1);
        let mut st = self.admission.st.lock();
        let ticket = st.tail;
        st.tail += 1;
        while st.head != ticket || st.in_flight >= max || st.backcall {
            self.admission.cv.wait(&mut st);
        }
        st.head += 1;
        st.in_flight += 1;
    }

    pub fn release_send_slot(&self) {
        let mut st = self.admission.st.lock();
        assert!(st.in_flight > 0, "mount in-flight count went negative");
        st.in_flight -= 1;
        self.admission.cv.notify_all();
    }

    /// True when a request can be sent without queueing.
    pub fn has_spare_capacity(&self) -> bool {
        let max = self
            .inner
            .read()
            .as_ref()
            .map(|v| v.max_concurrent)
            .unwrap_or(DEFAULT_MAX_CONCURRENT)
            .max(1);
        let st = self.admission.st.lock();
        !st.backcall && st.in_flight < max && st.head == st.tail
    }

    pub fn set_backcall(&self, active: bool) {
        let mut st = self.admission.st.lock();
        st.backcall = active;
        if !active {
            self.admission.cv.notify_all();
        }
    }

    pub fn in_flight(&self) -> u16 {
        self.admission.st.lock().in_flight
    }
}

pub static VMNT_TABLE: RustLazyGlobal<Vec<RustRfc<Vmnt>>> =
    RustLazyGlobal::new(|| (0..NR_MNTS).map(|_| RustRfc::new(Vmnt::new())).collect());

pub fn vmnt(idx: usize) -> &'static RustRfc<Vmnt> {
    &VMNT_TABLE[idx]
}

/// Locks a mount entry for the calling logical call. Acquisition is rejected
/// with Deadlock when the caller originates from the very server that owns
/// the mount; sending that server a message while holding (or waiting on)
/// its mount lock would wedge both sides.
pub fn lock_vmnt(ctx: &CallCtx, idx: usize, strength: LockStrength) -> Result<(), LockError> {
    if let Origin::Server(e) = ctx.origin {
        let inner = VMNT_TABLE[idx].inner.read();
        if let Some(v) = inner.as_ref() {
            if v.fs_e == e {
                return Err(LockError::Deadlock);
            }
        }
    }
    VMNT_TABLE[idx].lock.lock(ctx.call, strength);
    Ok(())
}

pub fn try_lock_vmnt(ctx: &CallCtx, idx: usize, strength: LockStrength) -> Result<(), LockError> {
    if let Origin::Server(e) = ctx.origin {
        let inner = VMNT_TABLE[idx].inner.read();
        if let Some(v) = inner.as_ref() {
            if v.fs_e == e {
                return Err(LockError::Deadlock);
            }
        }
    }
    VMNT_TABLE[idx].lock.try_lock(ctx.call, strength)
}

pub fn unlock_vmnt(ctx: &CallCtx, idx: usize) {
    VMNT_TABLE[idx].lock.unlock(ctx.call);
    // a released mount lock is one of the events lock-blocked calls wait on
    crate::vfs::suspend::revive_lock_waiters();
}

/// Reserves a free mount slot; one entry per device number.
pub fn alloc_vmnt(dev: u64) -> Result<usize, interface::Errno> {
    if find_vmnt_by_dev(dev).is_some() {
        return Err(interface::Errno::EBUSY);
    }
    for (idx, mp) in VMNT_TABLE.iter().enumerate() {
        let mut inner = mp.inner.write();
        if inner.is_none() {
            *inner = Some(VmntInner {
                fs_e: Endpoint(0),
                dev,
                readonly: false,
                mounted_on: None,
                root_node: None,
                label: String::new(),
                max_concurrent: DEFAULT_MAX_CONCURRENT,
            });
            return Ok(idx);
        }
    }
    Err(interface::Errno::ENFILE)
}

pub fn free_vmnt(idx: usize) {
    *VMNT_TABLE[idx].inner.write() = None;
}

pub fn find_vmnt_by_dev(dev: u64) -> Option<usize> {
    for (idx, mp) in VMNT_TABLE.iter().enumerate() {
        if let Some(v) = mp.inner.read().as_ref() {
            if v.dev == dev {
                return Some(idx);
            }
        }
    }
    None
}

/// Finds the mount whose covered directory is the given vnode.
pub fn find_vmnt_covering(vnode_idx: usize) -> Option<usize> {
    for (idx, mp) in VMNT_TABLE.iter().enumerate() {
        if let Some(v) = mp.inner.read().as_ref() {
            if v.mounted_on == Some(vnode_idx) {
                return Some(idx);
            }
        }
    }
    None
}

pub fn find_vmnt_by_endpoint(fs_e: Endpoint) -> Option<usize> {
    for (idx, mp) in VMNT_TABLE.iter().enumerate() {
        if let Some(v) = mp.inner.read().as_ref() {
            if v.fs_e == fs_e {
                return Some(idx);
            }
        }
    }
    None
}

/// True when the endpoint is a mounted file-system server; such an endpoint
/// issuing a request is a back-call and may need the deadlock-breaker.
pub fn is_mounted_server(e: Endpoint) -> bool {
    find_vmnt_by_endpoint(e).is_some()
}

#[derive(serde::Serialize)]
pub struct VmntSnap {
    pub slot: usize,
    pub fs_e: Endpoint,
    pub dev: u64,
    pub readonly: bool,
    pub mounted_on: Option<usize>,
    pub root_node: Option<usize>,
    pub label: String,
    pub in_flight: u16,
}

pub fn snapshot_mounts() -> Vec<VmntSnap> {
    let mut out = Vec::new();
    for (idx, mp) in VMNT_TABLE.iter().enumerate() {
        if let Some(v) = mp.inner.read().as_ref() {
            out.push(VmntSnap {
                slot: idx,
                fs_e: v.fs_e,
                dev: v.dev,
                readonly: v.readonly,
                mounted_on: v.mounted_on,
                root_node: v.root_node,
                label: v.label.clone(),
                in_flight: mp.in_flight(),
            });
        }
    }
    out
}

pub fn clear_vmnt_table() {
    for mp in VMNT_TABLE.iter() {
        *mp.inner.write() = None;
        let mut st = mp.admission.st.lock();
        st.in_flight = 0;
        st.head = 0;
        st.tail = 0;
        st.backcall = false;
    }
}
