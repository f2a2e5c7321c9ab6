// Open-file descriptors (filps).
//
// A filp is one open instance of a file: access mode, shared byte offset and
// a reference count. Descriptors created by duplication share the same filp,
// so dup'd descriptors see each other's offset. The filp owns exactly one
// vnode reference for its lifetime (pipes carry their channel inline and no
// vnode).

use crate::interface::{EmulatedPipe, RustAtomicI32, RustAtomicOrdering, RustMutex, RustRfc};
use crate::vfs::calls::fs_constants::*;

#[derive(Debug, Clone)]
pub enum FilpObj {
    /// Regular file or directory backed by a file-system server.
    File,
    /// One end of an in-memory pipe; the access mode says which.
    Pipe(EmulatedPipe),
    /// Character special file served by a driver.
    Device { major: u32, minor: u32 },
}

#[derive(Debug)]
pub struct Filp {
    /// Vnode table index; None only for pipes.
    pub vnode: Option<usize>,
    pub obj: FilpObj,
    pub mode: i32,
    pub offset: RustMutex<u64>,
    count: RustAtomicI32,
}

impl Filp {
    pub fn new(vnode: Option<usize>, obj: FilpObj, mode: i32) -> Filp {
        Filp {
            vnode,
            obj,
            mode,
            offset: RustMutex::new(0),
            count: RustAtomicI32::new(1),
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(RustAtomicOrdering::SeqCst)
    }

    pub fn incr(&self) {
        let prev = self.count.fetch_add(1, RustAtomicOrdering::SeqCst);
        assert!(prev > 0, "dup of a closed filp");
    }

    /// Drops one descriptor reference; true when this was the last one and
    /// the filp's resources must be torn down.
    pub fn decr(&self) -> bool {
        let prev = self.count.fetch_sub(1, RustAtomicOrdering::SeqCst);
        if prev <= 0 {
            panic!("filp reference count went negative");
        }
        prev == 1
    }

    pub fn readable(&self) -> bool {
        (self.mode & O_RDWRFLAGS) == O_RDONLY || (self.mode & O_RDWRFLAGS) == O_RDWR
    }

    pub fn writable(&self) -> bool {
        (self.mode & O_RDWRFLAGS) == O_WRONLY || (self.mode & O_RDWRFLAGS) == O_RDWR
    }

    pub fn nonblocking(&self) -> bool {
        self.mode & O_NONBLOCK != 0
    }
}

/// One descriptor-table slot. cloexec is per descriptor, not per filp.
#[derive(Debug, Clone)]
pub struct FdEntry {
    pub filp: RustRfc<Filp>,
    pub cloexec: bool,
}

#[derive(serde::Serialize)]
pub struct FdSnap {
    pub fd: i32,
    pub vnode: Option<usize>,
    pub mode: i32,
    pub offset: u64,
    pub filp_count: i32,
}

impl FdEntry {
    pub fn snap(&self, fd: i32) -> FdSnap {
        FdSnap {
            fd,
            vnode: self.filp.vnode,
            mode: self.filp.mode,
            offset: *self.filp.offset.lock(),
            filp_count: self.filp.count(),
        }
    }
}
