// Message types for the VFS protocol surfaces.
//
// Three surfaces meet here: client calls entering the dispatcher (VfsCall),
// the request/reply protocol spoken to file-system servers (FsRequest /
// FsReply), and the character-device protocol spoken to drivers (DevRequest
// / DevReply). Every request carries a transaction id; replies are matched
// on it by the transport. Operation dispatch is an exhaustive match over
// these enums, one arm per call, rather than a numeric call table.

use crate::interface;
use crate::interface::GrantId;

pub type Pid = u64;
pub type Tid = u64;
pub type InodeNr = u64;

/// Identity of one server process (file system or device driver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Endpoint(pub u32);

/// Who a request came from. Requests from a mounted server itself are the
/// trigger for the deadlock-breaker worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client(Pid),
    Server(Endpoint),
}

/// Cached attributes of one remote inode, as servers report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDetails {
    pub ino: InodeNr,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub dev: u64,
}

/// Requests sent to a file-system server.
#[derive(Debug, Clone)]
pub enum FsOp {
    /// Resolve as much of `path` as this server can, starting at `dir_ino`.
    /// `root_ino` bounds `..` traversal for processes chrooted inside the
    /// volume. Non-terminal outcomes are EnterMount, LeaveMount, SymlinkHit.
    Lookup {
        dir_ino: InodeNr,
        path: String,
        no_follow_last: bool,
        root_ino: InodeNr,
    },
    GetNode { ino: InodeNr },
    PutNode { ino: InodeNr },
    Stat { ino: InodeNr },
    Read { ino: InodeNr, pos: u64, grant: GrantId, len: usize },
    Write { ino: InodeNr, pos: u64, grant: GrantId, len: usize },
    Create { dir_ino: InodeNr, name: String, mode: u32 },
    Ftrunc { ino: InodeNr, size: u64 },
    Mkdir { dir_ino: InodeNr, name: String, mode: u32 },
    Symlink { dir_ino: InodeNr, name: String, target: String },
    Rdlink { ino: InodeNr, grant: GrantId, len: usize },
    Unlink { dir_ino: InodeNr, name: String },
    Rmdir { dir_ino: InodeNr, name: String },
    Rename {
        old_dir: InodeNr,
        old_name: String,
        new_dir: InodeNr,
        new_name: String,
    },
    /// Mark or clear an inode as covered by a mount so lookups report
    /// EnterMount when they reach it.
    Mountpoint { ino: InodeNr },
    ClearMountpoint { ino: InodeNr },
    ReadSuper,
    Unmount,
}

#[derive(Debug, Clone)]
pub struct FsRequest {
    pub tid: Tid,
    pub op: FsOp,
}

/// Replies from a file-system server. EnterMount, LeaveMount and SymlinkHit
/// are the three reserved non-terminal lookup codes; everything else is
/// terminal for its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsReply {
    Node(NodeDetails),
    /// Lookup reached a directory covered by another volume after consuming
    /// `consumed` bytes of the path.
    EnterMount { ino: InodeNr, consumed: usize },
    /// Lookup left this volume upward through `..` on its root.
    LeaveMount { consumed: usize },
    /// Lookup hit an absolute symlink; resolution restarts from the root.
    SymlinkHit { target: String, consumed: usize },
    Bytes { count: usize, new_size: u64 },
    Ok,
    /// The supplied grant referenced non-resident client memory.
    GrantFault,
    /// Server is avoiding deadlock and wants the request re-issued from a
    /// reserved worker.
    Backpressure,
    Err(interface::Errno),
}

#[derive(Debug, Clone)]
pub struct FsResponse {
    pub tid: Tid,
    pub reply: FsReply,
}

/// Requests sent to a character-device driver.
#[derive(Debug, Clone)]
pub enum DevOp {
    Open { minor: u32, access: i32 },
    Close { minor: u32 },
    Read { minor: u32, grant: GrantId, len: usize },
    Write { minor: u32, grant: GrantId, len: usize },
    Ioctl { minor: u32, request: u32, grant: Option<GrantId> },
    /// Cancel the in-flight operation previously issued under `tid`.
    Cancel { minor: u32, tid: Tid },
}

#[derive(Debug, Clone)]
pub struct DevRequest {
    pub tid: Tid,
    pub pid: Pid,
    pub op: DevOp,
}

#[derive(Debug, Clone)]
pub enum DevReply {
    Done(i32),
    /// Operation accepted but cannot complete now; a completion for this tid
    /// arrives later through dev_notify. The client parks blocked-on-device.
    Suspended,
    /// Open cannot complete yet; the open is replayed on notify. The client
    /// parks blocked-on-open-retry and is never cancelled mid-flight.
    RetryOpen,
    Err(interface::Errno),
}

#[derive(Debug, Clone)]
pub struct DevResponse {
    pub tid: Tid,
    pub reply: DevReply,
}

/// One client call as accepted by the dispatcher, copied verbatim into the
/// blocked-state record when the call suspends so revival can replay it.
#[derive(Debug, Clone)]
pub enum VfsCall {
    Open { path: String, flags: i32, mode: u32 },
    Close { fd: i32 },
    Read { fd: i32, buf: usize, len: usize },
    Write { fd: i32, buf: usize, len: usize },
    Lseek { fd: i32, offset: i64, whence: i32 },
    Stat { path: String, buf: usize },
    Lstat { path: String, buf: usize },
    Fstat { fd: i32, buf: usize },
    Readlink { path: String, buf: usize, len: usize },
    Unlink { path: String },
    Rename { old: String, new: String },
    Mkdir { path: String, mode: u32 },
    Rmdir { path: String },
    Symlink { target: String, path: String },
    Chdir { path: String },
    Dup { fd: i32 },
    Dup2 { fd: i32, newfd: i32 },
    Pipe { fds_buf: usize },
    Select {
        readfds: Vec<i32>,
        writefds: Vec<i32>,
        poll_only: bool,
    },
    Ioctl {
        fd: i32,
        request: u32,
        buf: Option<usize>,
        len: usize,
    },
    Mount {
        fs: Endpoint,
        dev: u64,
        path: String,
        label: String,
        readonly: bool,
        max_concurrent: u16,
    },
    Umount { path: String },
}

/// Privileged control calls from the process manager, serviced only by the
/// reserved system worker.
#[derive(Debug, Clone)]
pub enum CtlCall {
    Fork { parent: Pid, child: Pid },
    Exec { pid: Pid },
    Exit { pid: Pid },
    Setcred { pid: Pid, uid: u32, gid: u32 },
    /// Signal delivery: cancel the target's blocked call if its state
    /// permits.
    Unpause { pid: Pid },
    Snapshot,
}

#[derive(Debug)]
pub enum CtlResult {
    Code(i32),
    Snapshot(String),
}

/// Stat result as copied out to client memory, fixed little-endian layout.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatData {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: u64,
}

impl StatData {
    pub const BYTES: usize = 44;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTES);
        out.extend_from_slice(&self.st_dev.to_le_bytes());
        out.extend_from_slice(&self.st_ino.to_le_bytes());
        out.extend_from_slice(&self.st_mode.to_le_bytes());
        out.extend_from_slice(&self.st_uid.to_le_bytes());
        out.extend_from_slice(&self.st_gid.to_le_bytes());
        out.extend_from_slice(&self.st_rdev.to_le_bytes());
        out.extend_from_slice(&self.st_size.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> StatData {
        assert!(buf.len() >= Self::BYTES, "short stat buffer");
        let u64at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
        let u32at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        StatData {
            st_dev: u64at(0),
            st_ino: u64at(8),
            st_mode: u32at(16),
            st_uid: u32at(20),
            st_gid: u32at(24),
            st_rdev: u64at(28),
            st_size: u64at(36),
        }
    }
}
