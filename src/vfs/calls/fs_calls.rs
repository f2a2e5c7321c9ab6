// File and path calls.
//
// Each call runs inside one worker under its own CallId; locks taken here
// are per-call, so a call that touches the same entity twice (rename within
// one directory, for instance) soft-re-enters instead of deadlocking.

use crate::interface::{
    revoke_grant, set_grant, syscall_error, Errno, GrantAccess, GrantKind, LockStrength, RustRfc,
};
use crate::vfs::calls::fs_constants::*;
use crate::vfs::calls::pipe_calls;
use crate::vfs::dispatcher::CallResult;
use crate::vfs::filedesc::{FdEntry, Filp, FilpObj};
use crate::vfs::lookup::{self, LookupError, Resolve};
use crate::vfs::message::{DevOp, DevReply, Endpoint, FsOp, FsReply, StatData};
use crate::vfs::mount;
use crate::vfs::process::FsProcess;
use crate::vfs::suspend::SuspendKind;
use crate::vfs::transport::{self, TransportError};
use crate::vfs::vnode;
use crate::vfs::worker::CallCtx;

// Error plumbing shared by the calls below.

fn lk_fail(e: LookupError, call: &str) -> CallResult {
    match e {
        LookupError::Reroute => CallResult::Reroute,
        LookupError::Blocked => CallResult::Suspend(SuspendKind::Lock),
        LookupError::Fail(errno) => {
            CallResult::Done(syscall_error(errno, call, "path resolution failed"))
        }
    }
}

fn tr_fail(e: TransportError, call: &str) -> CallResult {
    match e {
        TransportError::Backpressure => CallResult::Reroute,
        other => CallResult::Done(syscall_error(
            transport::transport_errno(other),
            call,
            "server request failed",
        )),
    }
}

fn lk_errno(e: LookupError, call: &str) -> i32 {
    match e {
        // an i32-only call cannot reroute or park; the client retries on EAGAIN
        LookupError::Reroute => syscall_error(Errno::EAGAIN, call, "server backpressure"),
        LookupError::Blocked => syscall_error(Errno::EAGAIN, call, "mount entry lock busy"),
        LookupError::Fail(errno) => syscall_error(errno, call, "path resolution failed"),
    }
}

fn mount_readonly(vmnt_idx: usize) -> bool {
    mount::vmnt(vmnt_idx)
        .inner
        .read()
        .as_ref()
        .map(|v| v.readonly)
        .unwrap_or(false)
}

fn vnode_ident(idx: usize) -> (Endpoint, u64, usize, u32, u64) {
    let vp = vnode::vnode(idx);
    let inner = vp.inner.read();
    let v = inner.as_ref().expect("ident of a free vnode");
    (v.fs_e, v.inode_nr, v.vmnt, v.mode, v.dev)
}

impl FsProcess {
    /// ### Description
    ///
    /// Opens (and with O_CREAT possibly creates) the file named by `path`
    /// and installs a descriptor for it. Creation asks the directory's
    /// server; an existing file only fails the call when O_EXCL was given,
    /// otherwise the open falls through to a plain lookup. Character
    /// specials are opened at their driver, which may ask for the open to
    /// be replayed later; the client then parks in the open-retry state
    /// and is never cancelled mid-flight.
    ///
    /// ### Returns
    ///
    /// The new descriptor number, or a negative errno.
    pub fn open_syscall(&self, ctx: &CallCtx, path: &str, flags: i32, mode: u32) -> CallResult {
        if path.is_empty() {
            return CallResult::Done(syscall_error(Errno::ENOENT, "open", "given path was empty"));
        }
        let accmode = flags & O_RDWRFLAGS;
        if accmode == O_RDWRFLAGS {
            return CallResult::Done(syscall_error(Errno::EINVAL, "open", "invalid access mode"));
        }

        if flags & O_CREAT != 0 {
            let (dir_idx, name) = match lookup::lookup_last_dir(
                ctx,
                self,
                path,
                LockStrength::Exclusive,
                LockStrength::Read,
                false,
            ) {
                Ok(t) => t,
                Err(e) => return lk_fail(e, "open"),
            };
            let (fs_e, dir_ino, vmnt, _, _) = vnode_ident(dir_idx);
            if mount_readonly(vmnt) {
                lookup::drop_lookup(ctx, dir_idx);
                return CallResult::Done(syscall_error(Errno::EROFS, "open", "read-only volume"));
            }
            let reply = transport::request_via_mount(
                ctx,
                vmnt,
                FsOp::Create {
                    dir_ino,
                    name,
                    mode: (mode & S_IRWXA) | S_IFREG,
                },
            );
            match reply {
                Ok(FsReply::Node(details)) => {
                    let idx = match vnode::get_free_vnode() {
                        Ok(i) => i,
                        Err(e) => {
                            transport::put_node(fs_e, details.ino);
                            lookup::drop_lookup(ctx, dir_idx);
                            return CallResult::Done(syscall_error(e, "open", "vnode table full"));
                        }
                    };
                    vnode::fill_vnode(idx, fs_e, &details, vmnt);
                    lookup::drop_lookup(ctx, dir_idx);
                    return CallResult::Done(self.make_fd(idx, flags, FilpObj::File));
                }
                Err(TransportError::Fail(Errno::EEXIST)) if flags & O_EXCL == 0 => {
                    // fall through to the plain open below
                    lookup::drop_lookup(ctx, dir_idx);
                }
                Err(e) => {
                    lookup::drop_lookup(ctx, dir_idx);
                    return tr_fail(e, "open");
                }
                Ok(_) => {
                    lookup::drop_lookup(ctx, dir_idx);
                    return CallResult::Done(syscall_error(Errno::EIO, "open", "malformed create reply"));
                }
            }
        }

        let strength = if flags & O_TRUNC != 0 {
            LockStrength::Exclusive
        } else {
            LockStrength::Read
        };
        let idx = match lookup::lookup(ctx, self, &Resolve::new(path, strength)) {
            Ok(i) => i,
            Err(e) => return lk_fail(e, "open"),
        };
        let (_, ino, vmnt, nmode, rdev) = vnode_ident(idx);

        if is_dir(nmode) && accmode != O_RDONLY {
            lookup::drop_lookup(ctx, idx);
            return CallResult::Done(syscall_error(Errno::EISDIR, "open", "directory opened for writing"));
        }

        if is_chr(nmode) {
            let (maj, min) = (major(rdev), minor(rdev));
            match transport::dev_request(self.pid, maj, DevOp::Open { minor: min, access: accmode }) {
                Ok((_, DevReply::Done(_))) => {}
                Ok((tid, DevReply::RetryOpen)) => {
                    lookup::drop_lookup(ctx, idx);
                    return CallResult::Suspend(SuspendKind::OpenRetry { tid, major: maj });
                }
                Ok((_, DevReply::Err(e))) => {
                    lookup::drop_lookup(ctx, idx);
                    return CallResult::Done(syscall_error(e, "open", "driver refused the open"));
                }
                Ok((_, DevReply::Suspended)) => {
                    lookup::drop_lookup(ctx, idx);
                    return CallResult::Done(syscall_error(Errno::EIO, "open", "malformed driver reply"));
                }
                Err(e) => {
                    lookup::drop_lookup(ctx, idx);
                    return tr_fail(e, "open");
                }
            }
            lookup::unlock_vnode_vmnt(ctx, idx);
            return CallResult::Done(self.make_fd(
                idx,
                flags,
                FilpObj::Device { major: maj, minor: min },
            ));
        }

        if flags & O_TRUNC != 0 && is_reg(nmode) && accmode != O_RDONLY {
            if mount_readonly(vmnt) {
                lookup::drop_lookup(ctx, idx);
                return CallResult::Done(syscall_error(Errno::EROFS, "open", "read-only volume"));
            }
            match transport::request_via_mount(ctx, vmnt, FsOp::Ftrunc { ino, size: 0 }) {
                Ok(FsReply::Ok) => vnode::update_size(idx, 0),
                Ok(_) => {
                    lookup::drop_lookup(ctx, idx);
                    return CallResult::Done(syscall_error(Errno::EIO, "open", "malformed truncate reply"));
                }
                Err(e) => {
                    lookup::drop_lookup(ctx, idx);
                    return tr_fail(e, "open");
                }
            }
        }

        lookup::unlock_vnode_vmnt(ctx, idx);
        CallResult::Done(self.make_fd(idx, flags, FilpObj::File))
    }

    // Builds the filp and descriptor for an already-referenced vnode; the
    // reference moves into the filp.
    fn make_fd(&self, idx: usize, flags: i32, obj: FilpObj) -> i32 {
        let filp = Filp::new(
            Some(idx),
            obj,
            flags & (O_RDWRFLAGS | O_APPEND | O_NONBLOCK),
        );
        self.get_next_fd(
            STARTINGFD,
            FdEntry {
                filp: RustRfc::new(filp),
                cloexec: flags & O_CLOEXEC != 0,
            },
        )
    }

    pub fn close_syscall(&self, fd: i32) -> i32 {
        match self.fds.remove(&fd) {
            Some((_, fde)) => {
                self.drop_fd_entry(fde);
                0
            }
            None => syscall_error(Errno::EBADF, "close", "invalid file descriptor"),
        }
    }

    /// Close without error reporting, for exec's cloexec sweep and for the
    /// dispatcher undoing a cancelled open.
    pub fn close_fd_quiet(&self, fd: i32) {
        if let Some((_, fde)) = self.fds.remove(&fd) {
            self.drop_fd_entry(fde);
        }
    }

    pub(crate) fn drop_fd_entry(&self, fde: FdEntry) {
        // Pipe end references count descriptors, not filps.
        if let FilpObj::Pipe(ref pipe) = fde.filp.obj {
            pipe.decr_ref(fde.filp.mode & O_RDWRFLAGS);
            crate::vfs::suspend::revive_pipe_waiters();
            crate::vfs::suspend::revive_select_waiters();
        }
        if fde.filp.decr() {
            match &fde.filp.obj {
                FilpObj::File => {
                    if let Some(idx) = fde.filp.vnode {
                        vnode::put_vnode(idx);
                    }
                }
                FilpObj::Device { major, minor } => {
                    if let Err(e) =
                        transport::dev_request(self.pid, *major, DevOp::Close { minor: *minor })
                    {
                        log::debug!("device close failed: {}", e);
                    }
                    if let Some(idx) = fde.filp.vnode {
                        vnode::put_vnode(idx);
                    }
                }
                FilpObj::Pipe(_) => {}
            }
        }
    }

    /// ### Description
    ///
    /// Reads up to `len` bytes through descriptor `fd` into client memory at
    /// `buf`. Regular files go to their server as one grant-based round
    /// trip and the shared filp offset advances by the bytes moved. Pipes
    /// and devices may suspend instead of returning.
    pub fn read_syscall(&self, ctx: &CallCtx, fd: i32, buf: usize, len: usize) -> CallResult {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return CallResult::Done(syscall_error(Errno::EBADF, "read", "invalid file descriptor")),
        };
        let filp = fde.filp;
        if !filp.readable() {
            return CallResult::Done(syscall_error(Errno::EBADF, "read", "descriptor not open for reading"));
        }
        match filp.obj.clone() {
            FilpObj::Pipe(pipe) => pipe_calls::pipe_read(self, &pipe, &filp, buf, len),
            FilpObj::File => {
                let idx = filp.vnode.expect("file filp without vnode");
                let (_, ino, vmnt, _, _) = vnode_ident(idx);
                vnode::vnode(idx).lock.lock(ctx.call, LockStrength::Read);
                let pos = *filp.offset.lock();
                let res = transport::fs_read(ctx, vmnt, ino, pos, &self.mem, buf, len);
                vnode::vnode(idx).lock.unlock(ctx.call);
                match res {
                    Ok((n, _)) => {
                        *filp.offset.lock() += n as u64;
                        CallResult::Done(n as i32)
                    }
                    Err(e) => tr_fail(e, "read"),
                }
            }
            FilpObj::Device { major, minor } => {
                let grant = match set_grant(&self.mem, buf, len, GrantAccess::Write, GrantKind::Direct) {
                    Ok(g) => g,
                    Err(_) => {
                        return CallResult::Done(syscall_error(
                            Errno::EFAULT,
                            "read",
                            "buffer outside client memory",
                        ))
                    }
                };
                match transport::dev_request(
                    self.pid,
                    major,
                    DevOp::Read { minor, grant: grant.id(), len },
                ) {
                    Ok((_, DevReply::Done(n))) => {
                        revoke_grant(grant);
                        CallResult::Done(n)
                    }
                    Ok((tid, DevReply::Suspended)) => CallResult::Suspend(SuspendKind::Device {
                        tid,
                        major,
                        minor,
                        grant: Some(grant),
                        filp: Some(filp.clone()),
                        advance_offset: false,
                    }),
                    Ok((_, DevReply::Err(e))) => {
                        revoke_grant(grant);
                        CallResult::Done(syscall_error(e, "read", "driver failed the read"))
                    }
                    Ok((_, DevReply::RetryOpen)) => {
                        revoke_grant(grant);
                        CallResult::Done(syscall_error(Errno::EIO, "read", "malformed driver reply"))
                    }
                    Err(e) => {
                        revoke_grant(grant);
                        tr_fail(e, "read")
                    }
                }
            }
        }
    }

    /// Mirror of read_syscall for the write side; O_APPEND writes position
    /// at the current end of file as cached on the vnode.
    pub fn write_syscall(&self, ctx: &CallCtx, fd: i32, buf: usize, len: usize) -> CallResult {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return CallResult::Done(syscall_error(Errno::EBADF, "write", "invalid file descriptor")),
        };
        let filp = fde.filp;
        if !filp.writable() {
            return CallResult::Done(syscall_error(Errno::EBADF, "write", "descriptor not open for writing"));
        }
        match filp.obj.clone() {
            FilpObj::Pipe(pipe) => pipe_calls::pipe_write(self, &pipe, &filp, buf, len),
            FilpObj::File => {
                let idx = filp.vnode.expect("file filp without vnode");
                let (_, ino, vmnt, _, _) = vnode_ident(idx);
                if mount_readonly(vmnt) {
                    return CallResult::Done(syscall_error(Errno::EROFS, "write", "read-only volume"));
                }
                vnode::vnode(idx).lock.lock(ctx.call, LockStrength::Read);
                let pos = if filp.mode & O_APPEND != 0 {
                    vnode::vnode(idx).inner.read().as_ref().map(|v| v.size).unwrap_or(0)
                } else {
                    *filp.offset.lock()
                };
                let res = transport::fs_write(ctx, vmnt, ino, pos, &self.mem, buf, len);
                vnode::vnode(idx).lock.unlock(ctx.call);
                match res {
                    Ok((n, new_size)) => {
                        *filp.offset.lock() = pos + n as u64;
                        vnode::update_size(idx, new_size);
                        CallResult::Done(n as i32)
                    }
                    Err(e) => tr_fail(e, "write"),
                }
            }
            FilpObj::Device { major, minor } => {
                let grant = match set_grant(&self.mem, buf, len, GrantAccess::Read, GrantKind::Direct) {
                    Ok(g) => g,
                    Err(_) => {
                        return CallResult::Done(syscall_error(
                            Errno::EFAULT,
                            "write",
                            "buffer outside client memory",
                        ))
                    }
                };
                match transport::dev_request(
                    self.pid,
                    major,
                    DevOp::Write { minor, grant: grant.id(), len },
                ) {
                    Ok((_, DevReply::Done(n))) => {
                        revoke_grant(grant);
                        CallResult::Done(n)
                    }
                    Ok((tid, DevReply::Suspended)) => CallResult::Suspend(SuspendKind::Device {
                        tid,
                        major,
                        minor,
                        grant: Some(grant),
                        filp: Some(filp.clone()),
                        advance_offset: false,
                    }),
                    Ok((_, DevReply::Err(e))) => {
                        revoke_grant(grant);
                        CallResult::Done(syscall_error(e, "write", "driver failed the write"))
                    }
                    Ok((_, DevReply::RetryOpen)) => {
                        revoke_grant(grant);
                        CallResult::Done(syscall_error(Errno::EIO, "write", "malformed driver reply"))
                    }
                    Err(e) => {
                        revoke_grant(grant);
                        tr_fail(e, "write")
                    }
                }
            }
        }
    }

    pub fn lseek_syscall(&self, fd: i32, offset: i64, whence: i32) -> i32 {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return syscall_error(Errno::EBADF, "lseek", "invalid file descriptor"),
        };
        if matches!(fde.filp.obj, FilpObj::Pipe(_)) {
            return syscall_error(Errno::ESPIPE, "lseek", "file descriptor is associated with a pipe");
        }
        let mut off = fde.filp.offset.lock();
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => *off as i64,
            SEEK_END => {
                let idx = fde.filp.vnode.expect("seekable filp without vnode");
                vnode::vnode(idx).inner.read().as_ref().map(|v| v.size).unwrap_or(0) as i64
            }
            _ => return syscall_error(Errno::EINVAL, "lseek", "unknown whence value"),
        };
        let new = match base.checked_add(offset) {
            Some(n) => n,
            None => return syscall_error(Errno::EOVERFLOW, "lseek", "offset arithmetic overflowed"),
        };
        if new < 0 {
            return syscall_error(Errno::EINVAL, "lseek", "seek before start of file");
        }
        // the call reports the new position in its i32 result; a position
        // that does not fit there must not be silently truncated
        if new > i32::MAX as i64 {
            return syscall_error(Errno::EOVERFLOW, "lseek", "position exceeds the result range");
        }
        *off = new as u64;
        new as i32
    }

    /// stat and lstat share everything but the trailing-symlink rule.
    pub fn stat_syscall(&self, ctx: &CallCtx, path: &str, buf: usize, no_follow: bool) -> CallResult {
        let mut resolve = Resolve::new(path, LockStrength::Read);
        if no_follow {
            resolve = resolve.no_follow();
        }
        let idx = match lookup::lookup(ctx, self, &resolve) {
            Ok(i) => i,
            Err(e) => return lk_fail(e, if no_follow { "lstat" } else { "stat" }),
        };
        let sd = stat_of(idx);
        lookup::drop_lookup(ctx, idx);
        if self.mem.write().write_bytes(buf, &sd.to_bytes()).is_err() {
            return CallResult::Done(syscall_error(
                Errno::EFAULT,
                if no_follow { "lstat" } else { "stat" },
                "stat buffer outside client memory",
            ));
        }
        CallResult::Done(0)
    }

    pub fn fstat_syscall(&self, fd: i32, buf: usize) -> i32 {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return syscall_error(Errno::EBADF, "fstat", "invalid file descriptor"),
        };
        let sd = match fde.filp.vnode {
            Some(idx) => stat_of(idx),
            None => StatData {
                st_mode: S_IFIFO | 0o600,
                ..Default::default()
            },
        };
        if self.mem.write().write_bytes(buf, &sd.to_bytes()).is_err() {
            return syscall_error(Errno::EFAULT, "fstat", "stat buffer outside client memory");
        }
        0
    }

    pub fn readlink_syscall(&self, ctx: &CallCtx, path: &str, buf: usize, len: usize) -> CallResult {
        let idx = match lookup::lookup(ctx, self, &Resolve::new(path, LockStrength::Read).no_follow()) {
            Ok(i) => i,
            Err(e) => return lk_fail(e, "readlink"),
        };
        let (_, ino, vmnt, nmode, _) = vnode_ident(idx);
        if !is_lnk(nmode) {
            lookup::drop_lookup(ctx, idx);
            return CallResult::Done(syscall_error(Errno::EINVAL, "readlink", "not a symbolic link"));
        }
        let res = transport::fs_rdlink(ctx, vmnt, ino, &self.mem, buf, len);
        lookup::drop_lookup(ctx, idx);
        match res {
            Ok((n, _)) => CallResult::Done(n as i32),
            Err(e) => tr_fail(e, "readlink"),
        }
    }

    pub fn unlink_syscall(&self, ctx: &CallCtx, path: &str) -> CallResult {
        self.dir_op(ctx, path, "unlink", |dir_ino, name| FsOp::Unlink { dir_ino, name })
    }

    pub fn rmdir_syscall(&self, ctx: &CallCtx, path: &str) -> CallResult {
        self.dir_op(ctx, path, "rmdir", |dir_ino, name| FsOp::Rmdir { dir_ino, name })
    }

    pub fn mkdir_syscall(&self, ctx: &CallCtx, path: &str, mode: u32) -> CallResult {
        self.dir_op(ctx, path, "mkdir", |dir_ino, name| FsOp::Mkdir {
            dir_ino,
            name,
            mode: (mode & S_IRWXA) | S_IFDIR,
        })
    }

    pub fn symlink_syscall(&self, ctx: &CallCtx, target: &str, path: &str) -> CallResult {
        if target.is_empty() || target.len() > PATH_MAX {
            return CallResult::Done(syscall_error(Errno::EINVAL, "symlink", "bad target length"));
        }
        let target = target.to_string();
        self.dir_op(ctx, path, "symlink", move |dir_ino, name| FsOp::Symlink {
            dir_ino,
            name,
            target: target.clone(),
        })
    }

    // The shared shape of the directory-entry calls: resolve the parent,
    // refuse read-only volumes, one round trip, clean unlock.
    fn dir_op(
        &self,
        ctx: &CallCtx,
        path: &str,
        callname: &str,
        build: impl Fn(u64, String) -> FsOp,
    ) -> CallResult {
        let (dir_idx, name) = match lookup::lookup_last_dir(
            ctx,
            self,
            path,
            LockStrength::Exclusive,
            LockStrength::Read,
            false,
        ) {
            Ok(t) => t,
            Err(e) => return lk_fail(e, callname),
        };
        let (_, dir_ino, vmnt, _, _) = vnode_ident(dir_idx);
        if mount_readonly(vmnt) {
            lookup::drop_lookup(ctx, dir_idx);
            return CallResult::Done(syscall_error(Errno::EROFS, callname, "read-only volume"));
        }
        let reply = transport::request_via_mount(ctx, vmnt, build(dir_ino, name));
        lookup::drop_lookup(ctx, dir_idx);
        match reply {
            Ok(FsReply::Ok) => CallResult::Done(0),
            Ok(FsReply::Node(_)) => CallResult::Done(0),
            Ok(_) => CallResult::Done(syscall_error(Errno::EIO, callname, "malformed server reply")),
            Err(e) => tr_fail(e, callname),
        }
    }

    /// ### Description
    ///
    /// Renames `old` to `new`. Both parent directories are resolved with
    /// their mount entry locked exclusively, which serializes every rename
    /// on the same volume: a second rename blocks at lock acquisition until
    /// the first is done. The second resolution never waits for a mount
    /// entry while the first one's is held: two renames naming the same
    /// pair of volumes in opposite order would otherwise block on each
    /// other's entry forever. A busy entry instead releases everything,
    /// parks the call, and replays it from the top on the next unlock.
    /// Crossing volumes is refused with EXDEV.
    pub fn rename_syscall(&self, ctx: &CallCtx, old: &str, new: &str) -> CallResult {
        let (old_dir, old_name) = match lookup::lookup_last_dir(
            ctx,
            self,
            old,
            LockStrength::Exclusive,
            LockStrength::Exclusive,
            false,
        ) {
            Ok(t) => t,
            Err(e) => return lk_fail(e, "rename"),
        };
        let (new_dir, new_name) = match lookup::lookup_last_dir(
            ctx,
            self,
            new,
            LockStrength::Exclusive,
            LockStrength::Exclusive,
            true,
        ) {
            Ok(t) => t,
            Err(e) => {
                lookup::drop_lookup(ctx, old_dir);
                return lk_fail(e, "rename");
            }
        };
        let (old_fs, old_ino, old_vmnt, _, _) = vnode_ident(old_dir);
        let (new_fs, new_ino, _, _, _) = vnode_ident(new_dir);
        if old_fs != new_fs {
            lookup::drop_lookup(ctx, new_dir);
            lookup::drop_lookup(ctx, old_dir);
            return CallResult::Done(syscall_error(Errno::EXDEV, "rename", "rename across volumes"));
        }
        if mount_readonly(old_vmnt) {
            lookup::drop_lookup(ctx, new_dir);
            lookup::drop_lookup(ctx, old_dir);
            return CallResult::Done(syscall_error(Errno::EROFS, "rename", "read-only volume"));
        }
        let reply = transport::request_via_mount(
            ctx,
            old_vmnt,
            FsOp::Rename {
                old_dir: old_ino,
                old_name,
                new_dir: new_ino,
                new_name,
            },
        );
        lookup::drop_lookup(ctx, new_dir);
        lookup::drop_lookup(ctx, old_dir);
        match reply {
            Ok(FsReply::Ok) => CallResult::Done(0),
            Ok(_) => CallResult::Done(syscall_error(Errno::EIO, "rename", "malformed server reply")),
            Err(e) => tr_fail(e, "rename"),
        }
    }

    pub fn chdir_syscall(&self, ctx: &CallCtx, path: &str) -> CallResult {
        let idx = match lookup::lookup(ctx, self, &Resolve::new(path, LockStrength::Read)) {
            Ok(i) => i,
            Err(e) => return lk_fail(e, "chdir"),
        };
        let (_, _, _, nmode, _) = vnode_ident(idx);
        if !is_dir(nmode) {
            lookup::drop_lookup(ctx, idx);
            return CallResult::Done(syscall_error(Errno::ENOTDIR, "chdir", "not a directory"));
        }
        lookup::unlock_vnode_vmnt(ctx, idx);
        let old = self.cwd.write().replace(idx);
        if let Some(o) = old {
            vnode::put_vnode(o);
        }
        CallResult::Done(0)
    }

    pub fn dup_syscall(&self, fd: i32) -> i32 {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return syscall_error(Errno::EBADF, "dup", "invalid file descriptor"),
        };
        fde.filp.incr();
        if let FilpObj::Pipe(ref pipe) = fde.filp.obj {
            pipe.incr_ref(fde.filp.mode & O_RDWRFLAGS);
        }
        self.get_next_fd(
            STARTINGFD,
            FdEntry {
                filp: fde.filp,
                cloexec: false,
            },
        )
    }

    pub fn dup2_syscall(&self, _ctx: &CallCtx, fd: i32, newfd: i32) -> i32 {
        if !(STARTINGFD..MAXFD).contains(&newfd) {
            return syscall_error(Errno::EBADF, "dup2", "new descriptor out of range");
        }
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return syscall_error(Errno::EBADF, "dup2", "invalid file descriptor"),
        };
        if fd == newfd {
            return newfd;
        }
        fde.filp.incr();
        if let FilpObj::Pipe(ref pipe) = fde.filp.obj {
            pipe.incr_ref(fde.filp.mode & O_RDWRFLAGS);
        }
        self.close_fd_quiet(newfd);
        self.fds.insert(
            newfd,
            FdEntry {
                filp: fde.filp,
                cloexec: false,
            },
        );
        newfd
    }

    pub fn ioctl_syscall(
        &self,
        _ctx: &CallCtx,
        fd: i32,
        request: u32,
        buf: Option<usize>,
        len: usize,
    ) -> CallResult {
        let fde = match self.get_fd(fd) {
            Some(f) => f,
            None => return CallResult::Done(syscall_error(Errno::EBADF, "ioctl", "invalid file descriptor")),
        };
        let (maj, min) = match fde.filp.obj {
            FilpObj::Device { major, minor } => (major, minor),
            _ => return CallResult::Done(syscall_error(Errno::EINVAL, "ioctl", "not a device descriptor")),
        };
        let grant = match buf {
            Some(b) => match set_grant(&self.mem, b, len, GrantAccess::Write, GrantKind::Direct) {
                Ok(g) => Some(g),
                Err(_) => {
                    return CallResult::Done(syscall_error(
                        Errno::EFAULT,
                        "ioctl",
                        "buffer outside client memory",
                    ))
                }
            },
            None => None,
        };
        let grant_id = grant.as_ref().map(|g| g.id());
        match transport::dev_request(
            self.pid,
            maj,
            DevOp::Ioctl { minor: min, request, grant: grant_id },
        ) {
            Ok((_, DevReply::Done(n))) => {
                if let Some(g) = grant {
                    revoke_grant(g);
                }
                CallResult::Done(n)
            }
            Ok((tid, DevReply::Suspended)) => CallResult::Suspend(SuspendKind::Device {
                tid,
                major: maj,
                minor: min,
                grant,
                filp: Some(fde.filp.clone()),
                advance_offset: false,
            }),
            Ok((_, DevReply::Err(e))) => {
                if let Some(g) = grant {
                    revoke_grant(g);
                }
                CallResult::Done(syscall_error(e, "ioctl", "driver failed the request"))
            }
            Ok((_, DevReply::RetryOpen)) => {
                if let Some(g) = grant {
                    revoke_grant(g);
                }
                CallResult::Done(syscall_error(Errno::EIO, "ioctl", "malformed driver reply"))
            }
            Err(e) => {
                if let Some(g) = grant {
                    revoke_grant(g);
                }
                tr_fail(e, "ioctl")
            }
        }
    }

    /// ### Description
    ///
    /// Attaches a server's volume at `path`. The first mount must be at
    /// "/" and seeds every process that has no root yet. Any failure after
    /// partial setup rolls the tables back to their prior state before
    /// returning; a caller never observes a half-mounted volume.
    pub fn mount_syscall(
        &self,
        ctx: &CallCtx,
        fs: Endpoint,
        dev: u64,
        path: &str,
        label: &str,
        readonly: bool,
        max_concurrent: u16,
    ) -> i32 {
        if max_concurrent == 0 {
            return syscall_error(Errno::EINVAL, "mount", "concurrency ceiling must be positive");
        }
        let have_root = mount::snapshot_mounts().iter().any(|m| m.mounted_on.is_none());

        if path == "/" {
            if have_root {
                return syscall_error(Errno::EBUSY, "mount", "root volume already mounted");
            }
            return self.mount_root(fs, dev, label, readonly, max_concurrent);
        }
        if !have_root {
            return syscall_error(Errno::EINVAL, "mount", "no root volume mounted yet");
        }

        // Resolve and pin the mountpoint first; its lock blocks concurrent
        // lookups from racing the transition.
        let mut resolve = Resolve::new(path, LockStrength::Exclusive);
        resolve.vmnt_strength = LockStrength::Exclusive;
        let mp_idx = match lookup::lookup(ctx, self, &resolve) {
            Ok(i) => i,
            Err(e) => return lk_errno(e, "mount"),
        };
        let (parent_fs, mp_ino, _, mp_mode, _) = vnode_ident(mp_idx);
        if !is_dir(mp_mode) {
            lookup::drop_lookup(ctx, mp_idx);
            return syscall_error(Errno::ENOTDIR, "mount", "mountpoint is not a directory");
        }
        if mount::find_vmnt_covering(mp_idx).is_some() {
            lookup::drop_lookup(ctx, mp_idx);
            return syscall_error(Errno::EBUSY, "mount", "mountpoint already covered");
        }

        let vmnt_idx = match mount::alloc_vmnt(dev) {
            Ok(i) => i,
            Err(e) => {
                lookup::drop_lookup(ctx, mp_idx);
                return syscall_error(e, "mount", "no mount slot for this device");
            }
        };

        let details = match transport::request(fs, FsOp::ReadSuper) {
            Ok(FsReply::Node(d)) => d,
            Ok(_) => {
                mount::free_vmnt(vmnt_idx);
                lookup::drop_lookup(ctx, mp_idx);
                return syscall_error(Errno::EIO, "mount", "malformed superblock reply");
            }
            Err(e) => {
                mount::free_vmnt(vmnt_idx);
                lookup::drop_lookup(ctx, mp_idx);
                return syscall_error(transport::transport_errno(e), "mount", "server readsuper failed");
            }
        };

        let root_slot = match vnode::get_free_vnode() {
            Ok(i) => i,
            Err(e) => {
                mount::free_vmnt(vmnt_idx);
                lookup::drop_lookup(ctx, mp_idx);
                return syscall_error(e, "mount", "vnode table full");
            }
        };
        vnode::fill_vnode(root_slot, fs, &details, vmnt_idx);

        if let Err(e) = transport::request(parent_fs, FsOp::Mountpoint { ino: mp_ino }) {
            vnode::put_vnode(root_slot);
            mount::free_vmnt(vmnt_idx);
            lookup::drop_lookup(ctx, mp_idx);
            return syscall_error(transport::transport_errno(e), "mount", "mountpoint mark failed");
        }

        {
            let mut inner = mount::vmnt(vmnt_idx).inner.write();
            let v = inner.as_mut().expect("allocated mount slot vanished");
            v.fs_e = fs;
            v.readonly = readonly;
            v.mounted_on = Some(mp_idx);
            v.root_node = Some(root_slot);
            v.label = label.to_string();
            v.max_concurrent = max_concurrent;
        }

        // The mount keeps the mountpoint reference; only the locks go.
        lookup::unlock_vnode_vmnt(ctx, mp_idx);
        log::info!("mounted {} (dev {}) on {}", label, dev, path);
        0
    }

    fn mount_root(&self, fs: Endpoint, dev: u64, label: &str, readonly: bool, max_concurrent: u16) -> i32 {
        let vmnt_idx = match mount::alloc_vmnt(dev) {
            Ok(i) => i,
            Err(e) => return syscall_error(e, "mount", "no mount slot for this device"),
        };
        let details = match transport::request(fs, FsOp::ReadSuper) {
            Ok(FsReply::Node(d)) => d,
            Ok(_) => {
                mount::free_vmnt(vmnt_idx);
                return syscall_error(Errno::EIO, "mount", "malformed superblock reply");
            }
            Err(e) => {
                mount::free_vmnt(vmnt_idx);
                return syscall_error(transport::transport_errno(e), "mount", "server readsuper failed");
            }
        };
        let root_slot = match vnode::get_free_vnode() {
            Ok(i) => i,
            Err(e) => {
                mount::free_vmnt(vmnt_idx);
                return syscall_error(e, "mount", "vnode table full");
            }
        };
        vnode::fill_vnode(root_slot, fs, &details, vmnt_idx);
        {
            let mut inner = mount::vmnt(vmnt_idx).inner.write();
            let v = inner.as_mut().expect("allocated mount slot vanished");
            v.fs_e = fs;
            v.readonly = readonly;
            v.mounted_on = None;
            v.root_node = Some(root_slot);
            v.label = label.to_string();
            v.max_concurrent = max_concurrent;
        }
        // Processes created before the root mount get their directories now.
        for entry in crate::vfs::process::PROC_TABLE.iter() {
            let p = entry.value();
            if p.root.read().is_none() {
                vnode::dup_vnode(root_slot);
                *p.root.write() = Some(root_slot);
            }
            if p.cwd.read().is_none() {
                vnode::dup_vnode(root_slot);
                *p.cwd.write() = Some(root_slot);
            }
        }
        log::info!("mounted {} (dev {}) as root", label, dev);
        0
    }

    /// ### Description
    ///
    /// Detaches the volume whose root is named by `path`. Any live
    /// reference to the volume beyond the mount's own bookkeeping makes the
    /// call fail with EBUSY and nothing is torn down.
    pub fn umount_syscall(&self, ctx: &CallCtx, path: &str) -> i32 {
        let mut resolve = Resolve::new(path, LockStrength::Exclusive);
        resolve.vmnt_strength = LockStrength::Exclusive;
        let idx = match lookup::lookup(ctx, self, &resolve) {
            Ok(i) => i,
            Err(e) => return lk_errno(e, "umount"),
        };
        let (fs_e, _, vmnt_idx, _, _) = vnode_ident(idx);
        let (root_node, mounted_on) = {
            let inner = mount::vmnt(vmnt_idx).inner.read();
            match inner.as_ref() {
                Some(v) => (v.root_node, v.mounted_on),
                None => {
                    lookup::drop_lookup(ctx, idx);
                    return syscall_error(Errno::EINVAL, "umount", "not a mounted volume");
                }
            }
        };
        if root_node != Some(idx) {
            lookup::drop_lookup(ctx, idx);
            return syscall_error(Errno::EINVAL, "umount", "path is not a volume root");
        }

        // Busy check: the root slot may carry exactly the mount's own
        // reference plus ours; anything else on the volume means open files.
        if vnode::vnode(idx).refs() > 2 || vnode::mount_busy_refs(vmnt_idx, &[idx]) > 0 {
            lookup::drop_lookup(ctx, idx);
            return syscall_error(Errno::EBUSY, "umount", "volume still in use");
        }

        if let Err(e) = transport::request(fs_e, FsOp::Unmount) {
            log::debug!("unmount notification failed: {}", e);
        }
        if let Some(mp) = mounted_on {
            let (parent_fs, mp_ino, _, _, _) = vnode_ident(mp);
            if let Err(e) = transport::request(parent_fs, FsOp::ClearMountpoint { ino: mp_ino }) {
                log::debug!("mountpoint clear failed: {}", e);
            }
            vnode::put_vnode(mp);
        }
        lookup::unlock_vnode_vmnt(ctx, idx);
        vnode::put_vnode(idx); // the lookup's reference
        vnode::put_vnode(idx); // the mount's root reference
        mount::free_vmnt(vmnt_idx);
        log::info!("unmounted volume at {}", path);
        0
    }
}

fn stat_of(idx: usize) -> StatData {
    let vp = vnode::vnode(idx);
    let inner = vp.inner.read();
    let v = inner.as_ref().expect("stat of a free vnode");
    let volume_dev = mount::vmnt(v.vmnt)
        .inner
        .read()
        .as_ref()
        .map(|m| m.dev)
        .unwrap_or(0);
    StatData {
        st_dev: volume_dev,
        st_ino: v.inode_nr,
        st_mode: v.mode,
        st_uid: v.uid,
        st_gid: v.gid,
        st_rdev: v.dev,
        st_size: v.size,
    }
}
