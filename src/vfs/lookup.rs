// Path-lookup engine.
//
// A lookup ships the entire remaining path to the server owning the current
// directory and lets it consume as much as it can resolve locally. Three
// replies keep the walk going instead of ending it: the path crossed onto a
// mounted volume, it left a volume upward through `..`, or it hit an
// absolute symlink that restarts resolution at the root. Each transition
// re-locks the newly relevant mount entry and charges one hop against a
// configurable bound; exceeding the bound is a loop error.
//
// Slot discipline: a free vnode slot is reserved and exclusively locked up
// front, so no thread ever observes a half-initialized vnode through a read
// lock; if the terminal reply names an inode already in the table the fresh
// slot is released and the existing one is referenced instead.

use crate::interface::{Errno, LockError, LockStrength};
use crate::vfs::calls::fs_constants::*;
use crate::vfs::message::{Endpoint, FsOp, FsReply, InodeNr, Origin};
use crate::vfs::mount;
use crate::vfs::process::FsProcess;
use crate::vfs::transport::{self, TransportError};
use crate::vfs::vnode;
use crate::vfs::worker::CallCtx;

/// How a lookup failed. Blocked and Reroute are not errors the client sees:
/// Blocked parks the call until the contended lock is released, Reroute asks
/// the dispatcher to replay the whole call from the reserved deadlock worker.
#[derive(Debug, PartialEq, Eq)]
pub enum LookupError {
    Fail(Errno),
    Blocked,
    Reroute,
}

impl From<Errno> for LookupError {
    fn from(e: Errno) -> LookupError {
        LookupError::Fail(e)
    }
}

impl From<TransportError> for LookupError {
    fn from(e: TransportError) -> LookupError {
        match e {
            TransportError::Backpressure => LookupError::Reroute,
            other => LookupError::Fail(transport::transport_errno(other)),
        }
    }
}

/// One resolution request. The path buffer is consumed in place as servers
/// eat components.
pub struct Resolve {
    pub path: String,
    /// Return a trailing symlink itself instead of following it (lstat,
    /// readlink, unlink, rename).
    pub no_follow_last: bool,
    pub vnode_strength: LockStrength,
    pub vmnt_strength: LockStrength,
    /// Never wait for a mount entry lock; a busy one reports Blocked and the
    /// whole call parks and replays. Set by any caller that already holds
    /// another mount entry lock, where waiting could close an AB-BA cycle.
    pub nowait_vmnt: bool,
}

impl Resolve {
    pub fn new(path: &str, strength: LockStrength) -> Resolve {
        Resolve {
            path: path.to_string(),
            no_follow_last: false,
            vnode_strength: strength,
            vmnt_strength: LockStrength::Read,
            nowait_vmnt: false,
        }
    }

    pub fn no_follow(mut self) -> Resolve {
        self.no_follow_last = true;
        self
    }
}

// Mount locks for a client call block on the worker thread; a back-call from
// a mounted server must not wait there (the holder may be waiting on that
// very server), so it parks in the lock-blocked state instead and is
// replayed on the next unlock. A lookup flagged nowait takes the same parked
// path: its caller holds another mount entry lock already.
fn lock_mount(ctx: &CallCtx, idx: usize, strength: LockStrength, nowait: bool) -> Result<(), LookupError> {
    let res = if nowait || matches!(ctx.origin, Origin::Server(_)) {
        mount::try_lock_vmnt(ctx, idx, strength)
    } else {
        mount::lock_vmnt(ctx, idx, strength)
    };
    res.map_err(|e| match e {
        LockError::Deadlock => LookupError::Fail(Errno::EDEADLK),
        LockError::Busy => LookupError::Blocked,
    })
}

fn ident(idx: usize) -> Result<(Endpoint, InodeNr, usize), Errno> {
    let vp = vnode::vnode(idx);
    let inner = vp.inner.read();
    let v = inner.as_ref().ok_or(Errno::EIO)?;
    Ok((v.fs_e, v.inode_nr, v.vmnt))
}

// Consumes `n` resolved bytes, strips slashes between components, and keeps
// the buffer non-empty ("." names the directory itself).
fn advance(path: &mut String, n: usize) {
    let n = n.min(path.len());
    path.drain(..n);
    while path.starts_with('/') {
        path.remove(0);
    }
    if path.is_empty() {
        path.push('.');
    }
}

// A path ending in '/' names '.' in that directory; only "/" itself
// collapses entirely.
fn normalize(path: &str) -> String {
    if path == "/" {
        return ".".to_string();
    }
    if path.ends_with('/') {
        let mut p = path.to_string();
        p.push('.');
        return p;
    }
    path.to_string()
}

struct Walk {
    dir: usize,
    vmnt: usize,
    nowait: bool,
}

impl Walk {
    // Moves the walk to a new directory/mount pair, swapping lock and
    // reference ownership in an order that never holds two mount locks.
    fn step(
        &mut self,
        ctx: &CallCtx,
        strength: LockStrength,
        new_dir: usize,
        new_vmnt: usize,
    ) -> Result<(), LookupError> {
        vnode::dup_vnode(new_dir);
        if new_vmnt != self.vmnt {
            mount::unlock_vmnt(ctx, self.vmnt);
            if let Err(e) = lock_mount(ctx, new_vmnt, strength, self.nowait) {
                vnode::put_vnode(new_dir);
                vnode::put_vnode(self.dir);
                return Err(e);
            }
        }
        vnode::put_vnode(self.dir);
        self.dir = new_dir;
        self.vmnt = new_vmnt;
        Ok(())
    }

    fn abandon(self, ctx: &CallCtx) {
        mount::unlock_vmnt(ctx, self.vmnt);
        vnode::put_vnode(self.dir);
    }
}

/// Resolves `resolve.path` relative to the process's working directory (or
/// its root for absolute paths). On success the returned vnode slot carries
/// one new reference and is locked at `vnode_strength`, and its mount entry
/// is locked at `vmnt_strength`; the caller owns all three.
pub fn lookup(ctx: &CallCtx, proc_obj: &FsProcess, resolve: &Resolve) -> Result<usize, LookupError> {
    if resolve.path.is_empty() {
        return Err(Errno::ENOENT.into());
    }
    if resolve.path.len() > PATH_MAX {
        return Err(Errno::ENAMETOOLONG.into());
    }

    let absolute = resolve.path.starts_with('/');
    let root_idx = proc_obj.root.read().ok_or(Errno::ENOENT)?;
    let start = if absolute {
        root_idx
    } else {
        proc_obj.cwd.read().ok_or(Errno::ENOENT)?
    };

    let mut remaining = normalize(resolve.path.trim_start_matches('/'));
    if remaining.is_empty() {
        remaining.push('.');
    }

    // Result slot first, exclusively locked while it has no identity.
    let new_idx = vnode::get_free_vnode().map_err(LookupError::Fail)?;
    vnode::vnode(new_idx).lock.lock(ctx.call, LockStrength::Exclusive);

    let (_, _, start_vmnt) = match ident(start) {
        Ok(t) => t,
        Err(e) => {
            vnode::vnode(new_idx).lock.unlock(ctx.call);
            vnode::release_vnode(new_idx);
            return Err(e.into());
        }
    };
    if let Err(e) = lock_mount(ctx, start_vmnt, resolve.vmnt_strength, resolve.nowait_vmnt) {
        vnode::vnode(new_idx).lock.unlock(ctx.call);
        vnode::release_vnode(new_idx);
        return Err(e);
    }
    vnode::dup_vnode(start);
    let mut walk = Walk {
        dir: start,
        vmnt: start_vmnt,
        nowait: resolve.nowait_vmnt,
    };

    let fail = |ctx: &CallCtx, walk: Walk, new_idx: usize, e: LookupError| {
        walk.abandon(ctx);
        vnode::vnode(new_idx).lock.unlock(ctx.call);
        vnode::release_vnode(new_idx);
        Err(e)
    };

    let bound = crate::vfs::dispatcher::config().max_symlink_hops;
    let mut hops = 0u32;

    loop {
        let (dir_fs, dir_ino, _) = match ident(walk.dir) {
            Ok(t) => t,
            Err(e) => return fail(ctx, walk, new_idx, e.into()),
        };
        // Bound for `..`: the chroot root's inode when it lives on this
        // volume, otherwise unrestricted.
        let root_ino = match ident(root_idx) {
            Ok((rfs, rino, _)) if rfs == dir_fs => rino,
            _ => 0,
        };

        let reply = match transport::request_via_mount(
            ctx,
            walk.vmnt,
            FsOp::Lookup {
                dir_ino,
                path: remaining.clone(),
                no_follow_last: resolve.no_follow_last,
                root_ino,
            },
        ) {
            Ok(r) => r,
            Err(e) => return fail(ctx, walk, new_idx, e.into()),
        };

        match reply {
            FsReply::Node(details) => {
                let result = match vnode::find_and_ref_vnode(dir_fs, details.ino) {
                    Some(existing) => {
                        // Identity already present: hand back the reserved
                        // slot and take the live one. The server gave us an
                        // fs-side reference we fold into the existing slot's.
                        vnode::vnode(new_idx).lock.unlock(ctx.call);
                        vnode::release_vnode(new_idx);
                        transport::put_node(dir_fs, details.ino);
                        vnode::vnode(existing)
                            .lock
                            .lock(ctx.call, resolve.vnode_strength);
                        existing
                    }
                    None => {
                        vnode::fill_vnode(new_idx, dir_fs, &details, walk.vmnt);
                        if resolve.vnode_strength != LockStrength::Exclusive {
                            vnode::vnode(new_idx)
                                .lock
                                .downgrade(ctx.call, resolve.vnode_strength);
                        }
                        new_idx
                    }
                };
                vnode::put_vnode(walk.dir);
                return Ok(result);
            }
            FsReply::EnterMount { ino, consumed } => {
                hops += 1;
                if hops > bound {
                    return fail(ctx, walk, new_idx, Errno::ELOOP.into());
                }
                advance(&mut remaining, consumed);
                let mp_idx = match vnode::find_and_ref_vnode(dir_fs, ino) {
                    Some(idx) => idx,
                    None => return fail(ctx, walk, new_idx, Errno::EIO.into()),
                };
                let covering = mount::find_vmnt_covering(mp_idx);
                vnode::put_vnode(mp_idx);
                let new_vmnt = match covering {
                    Some(m) => m,
                    None => return fail(ctx, walk, new_idx, Errno::EIO.into()),
                };
                let new_dir = match mount::vmnt(new_vmnt).inner.read().as_ref().and_then(|v| v.root_node) {
                    Some(r) => r,
                    None => return fail(ctx, walk, new_idx, Errno::EIO.into()),
                };
                if let Err(e) = walk.step(ctx, resolve.vmnt_strength, new_dir, new_vmnt) {
                    vnode::vnode(new_idx).lock.unlock(ctx.call);
                    vnode::release_vnode(new_idx);
                    return Err(e);
                }
            }
            FsReply::LeaveMount { consumed } => {
                hops += 1;
                if hops > bound {
                    return fail(ctx, walk, new_idx, Errno::ELOOP.into());
                }
                advance(&mut remaining, consumed);
                let mounted_on = mount::vmnt(walk.vmnt).inner.read().as_ref().and_then(|v| v.mounted_on);
                match mounted_on {
                    Some(up_dir) => {
                        let (_, _, up_vmnt) = match ident(up_dir) {
                            Ok(t) => t,
                            Err(e) => return fail(ctx, walk, new_idx, e.into()),
                        };
                        if let Err(e) = walk.step(ctx, resolve.vmnt_strength, up_dir, up_vmnt) {
                            vnode::vnode(new_idx).lock.unlock(ctx.call);
                            vnode::release_vnode(new_idx);
                            return Err(e);
                        }
                    }
                    None => {
                        // `..` on the global root stays at the global root.
                        let root_node = mount::vmnt(walk.vmnt)
                            .inner
                            .read()
                            .as_ref()
                            .and_then(|v| v.root_node);
                        match root_node {
                            Some(r) => {
                                if let Err(e) = walk.step(ctx, resolve.vmnt_strength, r, walk.vmnt) {
                                    vnode::vnode(new_idx).lock.unlock(ctx.call);
                                    vnode::release_vnode(new_idx);
                                    return Err(e);
                                }
                            }
                            None => return fail(ctx, walk, new_idx, Errno::EIO.into()),
                        }
                    }
                }
            }
            FsReply::SymlinkHit { target, consumed } => {
                hops += 1;
                if hops > bound {
                    return fail(ctx, walk, new_idx, Errno::ELOOP.into());
                }
                advance(&mut remaining, consumed);
                // Absolute target: splice the unconsumed tail onto it and
                // restart from the process root.
                let mut combined = target.trim_start_matches('/').to_string();
                if remaining != "." {
                    if !combined.is_empty() && !combined.ends_with('/') {
                        combined.push('/');
                    }
                    combined.push_str(&remaining);
                }
                remaining = normalize(&combined);
                if remaining.is_empty() {
                    remaining.push('.');
                }
                if remaining.len() > PATH_MAX {
                    return fail(ctx, walk, new_idx, Errno::ENAMETOOLONG.into());
                }
                let (_, _, root_vmnt) = match ident(root_idx) {
                    Ok(t) => t,
                    Err(e) => return fail(ctx, walk, new_idx, e.into()),
                };
                if let Err(e) = walk.step(ctx, resolve.vmnt_strength, root_idx, root_vmnt) {
                    vnode::vnode(new_idx).lock.unlock(ctx.call);
                    vnode::release_vnode(new_idx);
                    return Err(e);
                }
            }
            FsReply::GrantFault | FsReply::Bytes { .. } | FsReply::Ok => {
                return fail(ctx, walk, new_idx, Errno::EIO.into());
            }
            FsReply::Backpressure | FsReply::Err(_) => unreachable!("filtered by transport"),
        }
    }
}

/// Resolves everything up to the final path component and hands back the
/// locked, referenced directory vnode plus the final name. A symlink in the
/// directory portion is followed; the final component never is. `nowait`
/// must be set by a caller already holding another mount entry lock, so a
/// busy entry parks the call instead of closing a lock cycle.
pub fn lookup_last_dir(
    ctx: &CallCtx,
    proc_obj: &FsProcess,
    path: &str,
    strength: LockStrength,
    vmnt_strength: LockStrength,
    nowait: bool,
) -> Result<(usize, String), LookupError> {
    if path.is_empty() {
        return Err(Errno::ENOENT.into());
    }
    let trimmed = path.trim_end_matches('/');
    let (dir_part, last) = match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => {
            if trimmed.is_empty() {
                // the path was nothing but slashes
                ("/", ".")
            } else {
                (".", trimmed)
            }
        }
    };
    let last = if last.is_empty() { "." } else { last };
    if last.len() > NAME_MAX {
        return Err(Errno::ENAMETOOLONG.into());
    }
    let mut resolve = Resolve::new(dir_part, strength);
    resolve.vmnt_strength = vmnt_strength;
    resolve.nowait_vmnt = nowait;
    let dir_idx = lookup(ctx, proc_obj, &resolve)?;
    let is_directory = vnode::vnode(dir_idx)
        .inner
        .read()
        .as_ref()
        .map(|v| is_dir(v.mode))
        .unwrap_or(false);
    if !is_directory {
        unlock_vnode_vmnt(ctx, dir_idx);
        vnode::put_vnode(dir_idx);
        return Err(Errno::ENOTDIR.into());
    }
    Ok((dir_idx, last.to_string()))
}

/// Releases the two locks a successful lookup returns holding; the vnode
/// reference stays with the caller.
pub fn unlock_vnode_vmnt(ctx: &CallCtx, idx: usize) {
    let vmnt = vnode::vnode(idx).inner.read().as_ref().map(|v| v.vmnt);
    vnode::vnode(idx).lock.unlock(ctx.call);
    if let Some(m) = vmnt {
        mount::unlock_vmnt(ctx, m);
    }
}

/// Full teardown of a lookup result: both locks and the reference.
pub fn drop_lookup(ctx: &CallCtx, idx: usize) {
    unlock_vnode_vmnt(ctx, idx);
    vnode::put_vnode(idx);
}
