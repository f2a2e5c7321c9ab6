// Per-process state the dispatch core tracks: credentials, working and root
// directories (held as referenced vnode slots), the descriptor table, the
// process's memory image for grant transfers, and the blocking bookkeeping
// used by suspend/revive.

use crate::interface::{
    MemSpace, RustAtomicBool, RustAtomicOrdering, RustAtomicU32, RustHashEntry, RustHashMap,
    RustLazyGlobal, RustLock, RustMutex, RustRfc,
};
use crate::vfs::calls::fs_constants::*;
use crate::vfs::filedesc::FdEntry;
use crate::vfs::message::Pid;
use crate::vfs::suspend::BlockedState;
use crate::vfs::worker::Job;
use crate::vfs::{filedesc, vnode};

/// Memory image given to each process for grant-based transfers.
pub const PROC_MEM_BYTES: usize = 1 << 20;

pub struct FsProcess {
    pub pid: Pid,
    pub uid: RustAtomicU32,
    pub gid: RustAtomicU32,
    /// Referenced vnode slot of the working directory.
    pub cwd: RustLock<Option<usize>>,
    /// Referenced vnode slot of the root directory; `..` never escapes it.
    pub root: RustLock<Option<usize>>,
    pub fds: RustHashMap<i32, FdEntry>,
    pub mem: RustRfc<RustLock<MemSpace>>,
    /// Why this process's call is parked, if it is.
    pub blocked: RustMutex<BlockedState>,
    /// At most one call runs per process; a second one parks here.
    pub pending: RustMutex<Option<Job>>,
    pub in_flight: RustAtomicBool,
    /// Set when a signal arrives while the blocked state forbids immediate
    /// cancellation; honored once the call completes.
    pub cancel_pending: RustAtomicBool,
}

impl FsProcess {
    pub fn new(pid: Pid) -> FsProcess {
        FsProcess {
            pid,
            uid: RustAtomicU32::new(DEFAULT_UID),
            gid: RustAtomicU32::new(DEFAULT_GID),
            cwd: RustLock::new(None),
            root: RustLock::new(None),
            fds: RustHashMap::new(),
            mem: RustRfc::new(RustLock::new(MemSpace::new(PROC_MEM_BYTES))),
            blocked: RustMutex::new(BlockedState::Running),
            pending: RustMutex::new(None),
            in_flight: RustAtomicBool::new(false),
            cancel_pending: RustAtomicBool::new(false),
        }
    }

    /// Child copy for fork: shared filps (with bumped counts), duplicated
    /// directory references, and a byte copy of the memory image.
    pub fn fork_to(&self, child_pid: Pid) -> FsProcess {
        let child = FsProcess::new(child_pid);
        child
            .uid
            .store(self.uid.load(RustAtomicOrdering::SeqCst), RustAtomicOrdering::SeqCst);
        child
            .gid
            .store(self.gid.load(RustAtomicOrdering::SeqCst), RustAtomicOrdering::SeqCst);
        for entry in self.fds.iter() {
            let fde = entry.value().clone();
            fde.filp.incr();
            if let filedesc::FilpObj::Pipe(ref pipe) = fde.filp.obj {
                pipe.incr_ref(fde.filp.mode & O_RDWRFLAGS);
            }
            child.fds.insert(*entry.key(), fde);
        }
        let cwd = *self.cwd.read();
        if let Some(idx) = cwd {
            vnode::dup_vnode(idx);
        }
        *child.cwd.write() = cwd;
        let root = *self.root.read();
        if let Some(idx) = root {
            vnode::dup_vnode(idx);
        }
        *child.root.write() = root;
        {
            let src = self.mem.read();
            let mut dst = child.mem.write();
            *dst = src.clone();
        }
        child
    }

    /// Lowest free descriptor at or above `startfd`, reserved atomically.
    pub fn get_next_fd(&self, startfd: i32, fde: FdEntry) -> i32 {
        for fd in startfd..MAXFD {
            match self.fds.entry(fd) {
                RustHashEntry::Occupied(_) => {}
                RustHashEntry::Vacant(slot) => {
                    slot.insert(fde);
                    return fd;
                }
            }
        }
        crate::interface::syscall_error(
            crate::interface::Errno::EMFILE,
            "get_next_fd",
            "no available file descriptor number could be found",
        )
    }

    pub fn get_fd(&self, fd: i32) -> Option<FdEntry> {
        self.fds.get(&fd).map(|e| e.value().clone())
    }
}

pub static PROC_TABLE: RustLazyGlobal<RustHashMap<Pid, RustRfc<FsProcess>>> =
    RustLazyGlobal::new(RustHashMap::new);

pub fn proctable_insert(pid: Pid, proc_obj: FsProcess) {
    PROC_TABLE.insert(pid, RustRfc::new(proc_obj));
}

pub fn proctable_getref(pid: Pid) -> Option<RustRfc<FsProcess>> {
    PROC_TABLE.get(&pid).map(|e| e.value().clone())
}

pub fn proctable_remove(pid: Pid) -> Option<RustRfc<FsProcess>> {
    PROC_TABLE.remove(&pid).map(|(_, v)| v)
}

pub fn proctable_clear() {
    PROC_TABLE.clear();
}

#[derive(serde::Serialize)]
pub struct ProcSnap {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
    pub cwd: Option<usize>,
    pub root: Option<usize>,
    pub blocked: String,
    pub fds: Vec<crate::vfs::filedesc::FdSnap>,
}

pub fn snapshot_procs() -> Vec<ProcSnap> {
    let mut out = Vec::new();
    for entry in PROC_TABLE.iter() {
        let p = entry.value();
        let mut fds: Vec<_> = p.fds.iter().map(|e| e.value().snap(*e.key())).collect();
        fds.sort_by_key(|s| s.fd);
        out.push(ProcSnap {
            pid: p.pid,
            uid: p.uid.load(RustAtomicOrdering::SeqCst),
            gid: p.gid.load(RustAtomicOrdering::SeqCst),
            cwd: *p.cwd.read(),
            root: *p.root.read(),
            blocked: p.blocked.lock().tag().to_string(),
            fds,
        });
    }
    out.sort_by_key(|s| s.pid);
    out
}
