// Vnode table: one slot per open remote inode.
//
// Fixed-capacity arena with stable indices. A slot is free exactly when its
// local reference count is zero; identity (server endpoint, inode number) is
// immutable while any reference exists. Allocation and identity search are
// serialized by one table mutex so a concurrent free cannot race a merge.

use crate::interface;
use crate::interface::{
    RustAtomicI32, RustAtomicOrdering, RustLazyGlobal, RustLock, RustMutex, RustRfc, TriLock,
};
use crate::vfs::message::{Endpoint, InodeNr, NodeDetails};

pub const NR_VNODES: usize = 512;

#[derive(Debug, Clone)]
pub struct VnodeInner {
    pub fs_e: Endpoint,
    pub inode_nr: InodeNr,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub dev: u64,
    /// Index of the mount entry this vnode lives on.
    pub vmnt: usize,
}

pub struct Vnode {
    pub lock: TriLock,
    /// Client-side references (filps, cwd/root slots, mount points).
    ref_count: RustAtomicI32,
    /// FS-side references; the owning server is told to drop the inode when
    /// the last local reference goes away.
    fs_count: RustAtomicI32,
    pub inner: RustLock<Option<VnodeInner>>,
}

impl Vnode {
    fn new() -> Vnode {
        Vnode {
            lock: TriLock::new(),
            ref_count: RustAtomicI32::new(0),
            fs_count: RustAtomicI32::new(0),
            inner: RustLock::new(None),
        }
    }

    pub fn refs(&self) -> i32 {
        self.ref_count.load(RustAtomicOrdering::SeqCst)
    }

    pub fn fs_refs(&self) -> i32 {
        self.fs_count.load(RustAtomicOrdering::SeqCst)
    }

    pub fn details(&self) -> NodeDetails {
        let inner = self.inner.read();
        let v = inner.as_ref().expect("details of a free vnode");
        NodeDetails {
            ino: v.inode_nr,
            mode: v.mode,
            uid: v.uid,
            gid: v.gid,
            size: v.size,
            dev: v.dev,
        }
    }
}

pub static VNODE_TABLE: RustLazyGlobal<Vec<RustRfc<Vnode>>> =
    RustLazyGlobal::new(|| (0..NR_VNODES).map(|_| RustRfc::new(Vnode::new())).collect());

// Guards allocation and identity search together.
static VNODE_ALLOC: RustMutex<()> = RustMutex::new(());

pub fn vnode(idx: usize) -> &'static RustRfc<Vnode> {
    &VNODE_TABLE[idx]
}

/// Reserves a free slot with one local reference and no identity yet. The
/// caller locks it exclusively and fills it in (or releases it on failure).
pub fn get_free_vnode() -> Result<usize, interface::Errno> {
    let _g = VNODE_ALLOC.lock();
    for (idx, vp) in VNODE_TABLE.iter().enumerate() {
        if vp.ref_count.load(RustAtomicOrdering::SeqCst) == 0 {
            assert!(vp.lock.is_free(), "free vnode slot was locked");
            vp.ref_count.store(1, RustAtomicOrdering::SeqCst);
            *vp.inner.write() = None;
            return Ok(idx);
        }
    }
    Err(interface::Errno::ENFILE)
}

/// Finds a live vnode by identity and takes a reference to it, in one step
/// under the table mutex so a slot being freed concurrently is never merged.
pub fn find_and_ref_vnode(fs_e: Endpoint, inode_nr: InodeNr) -> Option<usize> {
    let _g = VNODE_ALLOC.lock();
    for (idx, vp) in VNODE_TABLE.iter().enumerate() {
        if vp.ref_count.load(RustAtomicOrdering::SeqCst) > 0 {
            let inner = vp.inner.read();
            if let Some(v) = inner.as_ref() {
                if v.fs_e == fs_e && v.inode_nr == inode_nr {
                    vp.ref_count.fetch_add(1, RustAtomicOrdering::SeqCst);
                    return Some(idx);
                }
            }
        }
    }
    None
}

/// Populates a freshly reserved slot from a server reply.
pub fn fill_vnode(idx: usize, fs_e: Endpoint, details: &NodeDetails, vmnt: usize) {
    let vp = &VNODE_TABLE[idx];
    assert!(vp.refs() > 0, "filling an unreserved vnode slot");
    *vp.inner.write() = Some(VnodeInner {
        fs_e,
        inode_nr: details.ino,
        mode: details.mode,
        uid: details.uid,
        gid: details.gid,
        size: details.size,
        dev: details.dev,
        vmnt,
    });
    vp.fs_count.store(1, RustAtomicOrdering::SeqCst);
}

pub fn dup_vnode(idx: usize) {
    let prev = VNODE_TABLE[idx].ref_count.fetch_add(1, RustAtomicOrdering::SeqCst);
    assert!(prev > 0, "dup of a free vnode");
}

/// Drops one local reference. When the last one goes, the owning server is
/// told to put the inode and the slot becomes reusable.
pub fn put_vnode(idx: usize) {
    let vp = &VNODE_TABLE[idx];
    let prev = vp.ref_count.fetch_sub(1, RustAtomicOrdering::SeqCst);
    if prev <= 0 {
        panic!("vnode reference count went negative");
    }
    if prev == 1 {
        let target = {
            let mut inner = vp.inner.write();
            let t = inner.as_ref().map(|v| (v.fs_e, v.inode_nr));
            *inner = None;
            t
        };
        vp.fs_count.store(0, RustAtomicOrdering::SeqCst);
        if let Some((fs_e, ino)) = target {
            crate::vfs::transport::put_node(fs_e, ino);
        }
    }
}

/// Releases a reserved-but-never-filled slot without talking to any server.
pub fn release_vnode(idx: usize) {
    let vp = &VNODE_TABLE[idx];
    let prev = vp.ref_count.fetch_sub(1, RustAtomicOrdering::SeqCst);
    if prev != 1 {
        panic!("release of a shared or free vnode slot");
    }
    *vp.inner.write() = None;
}

/// Refreshes cached attributes after a write or stat round trip.
pub fn update_size(idx: usize, size: u64) {
    if let Some(v) = VNODE_TABLE[idx].inner.write().as_mut() {
        v.size = size;
    }
}

/// Counts live references to vnodes on the given mount, excluding the slots
/// listed in `exempt`; used by unmount's busy check.
pub fn mount_busy_refs(vmnt: usize, exempt: &[usize]) -> i32 {
    let _g = VNODE_ALLOC.lock();
    let mut total = 0;
    for (idx, vp) in VNODE_TABLE.iter().enumerate() {
        if vp.refs() > 0 && !exempt.contains(&idx) {
            if let Some(v) = vp.inner.read().as_ref() {
                if v.vmnt == vmnt {
                    total += vp.refs();
                }
            }
        }
    }
    total
}

#[derive(serde::Serialize)]
pub struct VnodeSnap {
    pub slot: usize,
    pub fs_e: Endpoint,
    pub inode_nr: InodeNr,
    pub mode: u32,
    pub size: u64,
    pub refs: i32,
    pub fs_refs: i32,
    pub vmnt: usize,
}

/// Diagnostic copy of every live slot.
pub fn snapshot_vnodes() -> Vec<VnodeSnap> {
    let _g = VNODE_ALLOC.lock();
    let mut out = Vec::new();
    for (idx, vp) in VNODE_TABLE.iter().enumerate() {
        if vp.refs() > 0 {
            if let Some(v) = vp.inner.read().as_ref() {
                out.push(VnodeSnap {
                    slot: idx,
                    fs_e: v.fs_e,
                    inode_nr: v.inode_nr,
                    mode: v.mode,
                    size: v.size,
                    refs: vp.refs(),
                    fs_refs: vp.fs_refs(),
                    vmnt: v.vmnt,
                });
            }
        }
    }
    out
}

/// Test/finalize helper: drops every table entry unconditionally.
pub fn clear_vnode_table() {
    let _g = VNODE_ALLOC.lock();
    for vp in VNODE_TABLE.iter() {
        vp.ref_count.store(0, RustAtomicOrdering::SeqCst);
        vp.fs_count.store(0, RustAtomicOrdering::SeqCst);
        *vp.inner.write() = None;
    }
}
