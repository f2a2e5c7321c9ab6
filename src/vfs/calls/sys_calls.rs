// Process-lifecycle notifications from the process manager, serviced on the
// reserved system worker so they are ordered among themselves and never
// starve behind client calls.

use crate::interface::{syscall_error, Errno, RustAtomicOrdering};
use crate::vfs::message::Pid;
use crate::vfs::process::{
    proctable_getref, proctable_insert, proctable_remove, snapshot_procs, FsProcess,
};
use crate::vfs::{mount, vnode};

/// Registers a process with the dispatch core. With a root volume mounted
/// its working and root directories start at the global root; before that
/// they stay unset until the root mount fills them in.
pub fn init_proc(pid: Pid) -> i32 {
    if proctable_getref(pid).is_some() {
        return syscall_error(Errno::EINVAL, "init_proc", "pid already registered");
    }
    let p = FsProcess::new(pid);
    let root_slot = mount::snapshot_mounts()
        .iter()
        .find(|m| m.mounted_on.is_none())
        .and_then(|m| m.root_node);
    if let Some(r) = root_slot {
        vnode::dup_vnode(r);
        *p.root.write() = Some(r);
        vnode::dup_vnode(r);
        *p.cwd.write() = Some(r);
    }
    proctable_insert(pid, p);
    0
}

pub fn fork_syscall(parent: Pid, child: Pid) -> i32 {
    let pp = match proctable_getref(parent) {
        Some(p) => p,
        None => return syscall_error(Errno::ESRCH, "fork", "unknown parent process"),
    };
    if proctable_getref(child).is_some() {
        return syscall_error(Errno::EINVAL, "fork", "child pid already registered");
    }
    proctable_insert(child, pp.fork_to(child));
    0
}

/// Exec keeps the descriptor table except for close-on-exec entries.
pub fn exec_syscall(pid: Pid) -> i32 {
    let p = match proctable_getref(pid) {
        Some(p) => p,
        None => return syscall_error(Errno::ESRCH, "exec", "unknown process"),
    };
    let doomed: Vec<i32> = p
        .fds
        .iter()
        .filter(|e| e.value().cloexec)
        .map(|e| *e.key())
        .collect();
    for fd in doomed {
        p.close_fd_quiet(fd);
    }
    0
}

pub fn exit_syscall(pid: Pid) -> i32 {
    let p = match proctable_remove(pid) {
        Some(p) => p,
        None => return syscall_error(Errno::ESRCH, "exit", "unknown process"),
    };
    let fds: Vec<i32> = p.fds.iter().map(|e| *e.key()).collect();
    for fd in fds {
        p.close_fd_quiet(fd);
    }
    if let Some(c) = p.cwd.write().take() {
        vnode::put_vnode(c);
    }
    if let Some(r) = p.root.write().take() {
        vnode::put_vnode(r);
    }
    0
}

pub fn setcred_syscall(pid: Pid, uid: u32, gid: u32) -> i32 {
    let p = match proctable_getref(pid) {
        Some(p) => p,
        None => return syscall_error(Errno::ESRCH, "setcred", "unknown process"),
    };
    p.uid.store(uid, RustAtomicOrdering::SeqCst);
    p.gid.store(gid, RustAtomicOrdering::SeqCst);
    0
}

/// Serializes the three core tables for a privileged caller.
pub fn snapshot_json() -> String {
    let snap = serde_json::json!({
        "vnodes": vnode::snapshot_vnodes(),
        "mounts": mount::snapshot_mounts(),
        "processes": snapshot_procs(),
    });
    serde_json::to_string_pretty(&snap).unwrap_or_else(|e| {
        log::warn!("snapshot serialization failed: {}", e);
        String::from("{}")
    })
}
