// In-memory file-system server and a scriptable device driver, both speaking
// the transport protocols from their own threads. They stand in for the
// external servers the dispatch core talks to; the demo binary and the test
// suite run against them.

use crate::interface::{
    copy_from_grant, copy_to_grant, Errno, GrantError, RustAtomicBool, RustAtomicOrdering,
    RustAtomicU32, RustAtomicU64, RustDeque, RustMutex, RustRfc,
};
use crate::vfs::calls::fs_constants::*;
use crate::vfs::message::{
    DevOp, DevReply, DevRequest, DevResponse, Endpoint, FsOp, FsReply, FsRequest, FsResponse,
    InodeNr, NodeDetails, Tid,
};
use crate::vfs::transport;
use std::collections::HashMap;
use std::sync::mpsc;

pub const ROOT_INO: InodeNr = 1;

struct Node {
    ino: InodeNr,
    mode: u32,
    uid: u32,
    gid: u32,
    /// File bytes, or the target string for symlinks.
    content: Vec<u8>,
    children: HashMap<String, InodeNr>,
    parent: InodeNr,
    dev: u64,
    refs: u32,
    linked: bool,
    mountpoint: bool,
}

impl Node {
    fn details(&self) -> NodeDetails {
        NodeDetails {
            ino: self.ino,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            size: self.content.len() as u64,
            dev: self.dev,
        }
    }

    fn is_dir(&self) -> bool {
        is_dir(self.mode)
    }
}

pub struct MemFs {
    pub endpoint: Endpoint,
    nodes: RustMutex<HashMap<InodeNr, Node>>,
    next_ino: RustAtomicU64,
    /// Test hook: answer this many requests with Backpressure first.
    backpressure: RustAtomicU32,
    /// Test hook: hold every request this long before answering.
    delay_ms: RustAtomicU64,
}

/// Starts a server thread for a fresh volume and registers its endpoint.
pub fn spawn_memfs(endpoint: Endpoint) -> RustRfc<MemFs> {
    let mut nodes = HashMap::new();
    nodes.insert(
        ROOT_INO,
        Node {
            ino: ROOT_INO,
            mode: S_IFDIR | 0o755,
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
            content: Vec::new(),
            children: HashMap::new(),
            parent: ROOT_INO,
            dev: 0,
            refs: 0,
            linked: true,
            mountpoint: false,
        },
    );
    let fs = RustRfc::new(MemFs {
        endpoint,
        nodes: RustMutex::new(nodes),
        next_ino: RustAtomicU64::new(ROOT_INO + 1),
        backpressure: RustAtomicU32::new(0),
        delay_ms: RustAtomicU64::new(0),
    });
    let (tx, rx) = mpsc::channel::<FsRequest>();
    transport::register_fs_server(endpoint, tx);
    let fs2 = fs.clone();
    std::thread::Builder::new()
        .name(format!("memfs-{}", endpoint.0))
        .spawn(move || {
            while let Ok(req) = rx.recv() {
                let reply = fs2.handle(req.op);
                transport::deliver_fs_response(FsResponse { tid: req.tid, reply });
            }
        })
        .unwrap();
    fs
}

impl MemFs {
    /// Makes the next `n` requests answer with deadlock-avoidance pressure.
    pub fn set_backpressure(&self, n: u32) {
        self.backpressure.store(n, RustAtomicOrdering::SeqCst);
    }

    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, RustAtomicOrdering::SeqCst);
    }

    /// Seeds a regular file under an existing directory, for tests/demos.
    pub fn add_file(&self, parent: InodeNr, name: &str, content: &[u8]) -> InodeNr {
        let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
        let mut nodes = self.nodes.lock();
        nodes.insert(
            ino,
            Node {
                ino,
                mode: S_IFREG | 0o644,
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                content: content.to_vec(),
                children: HashMap::new(),
                parent,
                dev: 0,
                refs: 0,
                linked: true,
                mountpoint: false,
            },
        );
        nodes.get_mut(&parent).unwrap().children.insert(name.to_string(), ino);
        ino
    }

    pub fn add_dir(&self, parent: InodeNr, name: &str) -> InodeNr {
        let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
        let mut nodes = self.nodes.lock();
        nodes.insert(
            ino,
            Node {
                ino,
                mode: S_IFDIR | 0o755,
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                content: Vec::new(),
                children: HashMap::new(),
                parent,
                dev: 0,
                refs: 0,
                linked: true,
                mountpoint: false,
            },
        );
        nodes.get_mut(&parent).unwrap().children.insert(name.to_string(), ino);
        ino
    }

    pub fn add_symlink(&self, parent: InodeNr, name: &str, target: &str) -> InodeNr {
        let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
        let mut nodes = self.nodes.lock();
        nodes.insert(
            ino,
            Node {
                ino,
                mode: S_IFLNK | 0o777,
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                content: target.as_bytes().to_vec(),
                children: HashMap::new(),
                parent,
                dev: 0,
                refs: 0,
                linked: true,
                mountpoint: false,
            },
        );
        nodes.get_mut(&parent).unwrap().children.insert(name.to_string(), ino);
        ino
    }

    /// Character special file; opens and I/O on it go to the driver behind
    /// `major`.
    pub fn add_chr(&self, parent: InodeNr, name: &str, major: u32, minor: u32) -> InodeNr {
        let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
        let mut nodes = self.nodes.lock();
        nodes.insert(
            ino,
            Node {
                ino,
                mode: S_IFCHR | 0o666,
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                content: Vec::new(),
                children: HashMap::new(),
                parent,
                dev: makedev(major, minor),
                refs: 0,
                linked: true,
                mountpoint: false,
            },
        );
        nodes.get_mut(&parent).unwrap().children.insert(name.to_string(), ino);
        ino
    }

    pub fn content_of(&self, ino: InodeNr) -> Option<Vec<u8>> {
        self.nodes.lock().get(&ino).map(|n| n.content.clone())
    }

    pub fn lookup_child(&self, parent: InodeNr, name: &str) -> Option<InodeNr> {
        self.nodes.lock().get(&parent).and_then(|n| n.children.get(name).copied())
    }

    fn handle(&self, op: FsOp) -> FsReply {
        let delay = self.delay_ms.load(RustAtomicOrdering::SeqCst);
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay));
        }
        if self
            .backpressure
            .fetch_update(RustAtomicOrdering::SeqCst, RustAtomicOrdering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            })
            .is_ok()
        {
            return FsReply::Backpressure;
        }
        match op {
            FsOp::ReadSuper => {
                let mut nodes = self.nodes.lock();
                let root = nodes.get_mut(&ROOT_INO).unwrap();
                root.refs += 1;
                FsReply::Node(root.details())
            }
            FsOp::Lookup {
                dir_ino,
                path,
                no_follow_last,
                root_ino,
            } => self.lookup(dir_ino, &path, no_follow_last, root_ino),
            FsOp::GetNode { ino } => {
                let mut nodes = self.nodes.lock();
                match nodes.get_mut(&ino) {
                    Some(n) => {
                        n.refs += 1;
                        FsReply::Node(n.details())
                    }
                    None => FsReply::Err(Errno::ENOENT),
                }
            }
            FsOp::PutNode { ino } => {
                let mut nodes = self.nodes.lock();
                if let Some(n) = nodes.get_mut(&ino) {
                    if n.refs > 0 {
                        n.refs -= 1;
                    }
                    if n.refs == 0 && !n.linked {
                        nodes.remove(&ino);
                    }
                }
                FsReply::Ok
            }
            FsOp::Stat { ino } => match self.nodes.lock().get(&ino) {
                Some(n) => FsReply::Node(n.details()),
                None => FsReply::Err(Errno::ENOENT),
            },
            FsOp::Read { ino, pos, grant, len } => {
                let data = {
                    let nodes = self.nodes.lock();
                    let n = match nodes.get(&ino) {
                        Some(n) => n,
                        None => return FsReply::Err(Errno::ENOENT),
                    };
                    let start = (pos as usize).min(n.content.len());
                    let end = (start + len).min(n.content.len());
                    n.content[start..end].to_vec()
                };
                match copy_to_grant(grant, 0, &data) {
                    Ok(()) => FsReply::Bytes {
                        count: data.len(),
                        new_size: self.nodes.lock().get(&ino).map(|n| n.content.len() as u64).unwrap_or(0),
                    },
                    Err(GrantError::Fault) => FsReply::GrantFault,
                    Err(_) => FsReply::Err(Errno::EFAULT),
                }
            }
            FsOp::Write { ino, pos, grant, len } => {
                let data = match copy_from_grant(grant, 0, len) {
                    Ok(d) => d,
                    Err(GrantError::Fault) => return FsReply::GrantFault,
                    Err(_) => return FsReply::Err(Errno::EFAULT),
                };
                let mut nodes = self.nodes.lock();
                let n = match nodes.get_mut(&ino) {
                    Some(n) => n,
                    None => return FsReply::Err(Errno::ENOENT),
                };
                let pos = pos as usize;
                if n.content.len() < pos + data.len() {
                    n.content.resize(pos + data.len(), 0);
                }
                n.content[pos..pos + data.len()].copy_from_slice(&data);
                FsReply::Bytes {
                    count: data.len(),
                    new_size: n.content.len() as u64,
                }
            }
            FsOp::Create { dir_ino, name, mode } => {
                let mut nodes = self.nodes.lock();
                match nodes.get(&dir_ino) {
                    Some(d) if d.is_dir() => {
                        if d.children.contains_key(&name) {
                            return FsReply::Err(Errno::EEXIST);
                        }
                    }
                    Some(_) => return FsReply::Err(Errno::ENOTDIR),
                    None => return FsReply::Err(Errno::ENOENT),
                }
                let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
                let node = Node {
                    ino,
                    mode,
                    uid: DEFAULT_UID,
                    gid: DEFAULT_GID,
                    content: Vec::new(),
                    children: HashMap::new(),
                    parent: dir_ino,
                    dev: 0,
                    refs: 1,
                    linked: true,
                    mountpoint: false,
                };
                let details = node.details();
                nodes.insert(ino, node);
                nodes.get_mut(&dir_ino).unwrap().children.insert(name, ino);
                FsReply::Node(details)
            }
            FsOp::Mkdir { dir_ino, name, mode } => {
                let mut nodes = self.nodes.lock();
                match nodes.get(&dir_ino) {
                    Some(d) if d.is_dir() => {
                        if d.children.contains_key(&name) {
                            return FsReply::Err(Errno::EEXIST);
                        }
                    }
                    Some(_) => return FsReply::Err(Errno::ENOTDIR),
                    None => return FsReply::Err(Errno::ENOENT),
                }
                let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
                nodes.insert(
                    ino,
                    Node {
                        ino,
                        mode: (mode & !S_IFMT) | S_IFDIR,
                        uid: DEFAULT_UID,
                        gid: DEFAULT_GID,
                        content: Vec::new(),
                        children: HashMap::new(),
                        parent: dir_ino,
                        dev: 0,
                        refs: 0,
                        linked: true,
                        mountpoint: false,
                    },
                );
                nodes.get_mut(&dir_ino).unwrap().children.insert(name, ino);
                FsReply::Ok
            }
            FsOp::Symlink { dir_ino, name, target } => {
                let mut nodes = self.nodes.lock();
                match nodes.get(&dir_ino) {
                    Some(d) if d.is_dir() => {
                        if d.children.contains_key(&name) {
                            return FsReply::Err(Errno::EEXIST);
                        }
                    }
                    Some(_) => return FsReply::Err(Errno::ENOTDIR),
                    None => return FsReply::Err(Errno::ENOENT),
                }
                let ino = self.next_ino.fetch_add(1, RustAtomicOrdering::Relaxed);
                nodes.insert(
                    ino,
                    Node {
                        ino,
                        mode: S_IFLNK | 0o777,
                        uid: DEFAULT_UID,
                        gid: DEFAULT_GID,
                        content: target.into_bytes(),
                        children: HashMap::new(),
                        parent: dir_ino,
                        dev: 0,
                        refs: 0,
                        linked: true,
                        mountpoint: false,
                    },
                );
                nodes.get_mut(&dir_ino).unwrap().children.insert(name, ino);
                FsReply::Ok
            }
            FsOp::Rdlink { ino, grant, len } => {
                let target = {
                    let nodes = self.nodes.lock();
                    match nodes.get(&ino) {
                        Some(n) if is_lnk(n.mode) => n.content.clone(),
                        Some(_) => return FsReply::Err(Errno::EINVAL),
                        None => return FsReply::Err(Errno::ENOENT),
                    }
                };
                let take = target.len().min(len);
                match copy_to_grant(grant, 0, &target[..take]) {
                    Ok(()) => FsReply::Bytes { count: take, new_size: target.len() as u64 },
                    Err(GrantError::Fault) => FsReply::GrantFault,
                    Err(_) => FsReply::Err(Errno::EFAULT),
                }
            }
            FsOp::Unlink { dir_ino, name } => {
                let mut nodes = self.nodes.lock();
                let child = match nodes.get(&dir_ino).and_then(|d| d.children.get(&name).copied()) {
                    Some(c) => c,
                    None => return FsReply::Err(Errno::ENOENT),
                };
                if nodes.get(&child).map(|n| n.is_dir()).unwrap_or(false) {
                    return FsReply::Err(Errno::EPERM);
                }
                nodes.get_mut(&dir_ino).unwrap().children.remove(&name);
                if let Some(n) = nodes.get_mut(&child) {
                    n.linked = false;
                    if n.refs == 0 {
                        nodes.remove(&child);
                    }
                }
                FsReply::Ok
            }
            FsOp::Rmdir { dir_ino, name } => {
                let mut nodes = self.nodes.lock();
                let child = match nodes.get(&dir_ino).and_then(|d| d.children.get(&name).copied()) {
                    Some(c) => c,
                    None => return FsReply::Err(Errno::ENOENT),
                };
                match nodes.get(&child) {
                    Some(n) if !n.is_dir() => return FsReply::Err(Errno::ENOTDIR),
                    Some(n) if !n.children.is_empty() => return FsReply::Err(Errno::ENOTEMPTY),
                    Some(n) if n.mountpoint => return FsReply::Err(Errno::EBUSY),
                    Some(_) => {}
                    None => return FsReply::Err(Errno::ENOENT),
                }
                nodes.get_mut(&dir_ino).unwrap().children.remove(&name);
                nodes.remove(&child);
                FsReply::Ok
            }
            FsOp::Rename {
                old_dir,
                old_name,
                new_dir,
                new_name,
            } => {
                let mut nodes = self.nodes.lock();
                let moved = match nodes.get(&old_dir).and_then(|d| d.children.get(&old_name).copied()) {
                    Some(c) => c,
                    None => return FsReply::Err(Errno::ENOENT),
                };
                if !nodes.get(&new_dir).map(|d| d.is_dir()).unwrap_or(false) {
                    return FsReply::Err(Errno::ENOTDIR);
                }
                // an existing target is replaced, directories excepted
                if let Some(existing) = nodes.get(&new_dir).and_then(|d| d.children.get(&new_name).copied()) {
                    if nodes.get(&existing).map(|n| n.is_dir()).unwrap_or(false) {
                        return FsReply::Err(Errno::EISDIR);
                    }
                    nodes.get_mut(&new_dir).unwrap().children.remove(&new_name);
                    if let Some(n) = nodes.get_mut(&existing) {
                        n.linked = false;
                        if n.refs == 0 {
                            nodes.remove(&existing);
                        }
                    }
                }
                nodes.get_mut(&old_dir).unwrap().children.remove(&old_name);
                nodes.get_mut(&new_dir).unwrap().children.insert(new_name, moved);
                if let Some(n) = nodes.get_mut(&moved) {
                    n.parent = new_dir;
                }
                FsReply::Ok
            }
            FsOp::Mountpoint { ino } => {
                let mut nodes = self.nodes.lock();
                match nodes.get_mut(&ino) {
                    Some(n) if n.is_dir() => {
                        n.mountpoint = true;
                        FsReply::Ok
                    }
                    Some(_) => FsReply::Err(Errno::ENOTDIR),
                    None => FsReply::Err(Errno::ENOENT),
                }
            }
            FsOp::ClearMountpoint { ino } => {
                if let Some(n) = self.nodes.lock().get_mut(&ino) {
                    n.mountpoint = false;
                }
                FsReply::Ok
            }
            FsOp::Ftrunc { ino, size } => {
                let mut nodes = self.nodes.lock();
                match nodes.get_mut(&ino) {
                    Some(n) => {
                        n.content.resize(size as usize, 0);
                        FsReply::Ok
                    }
                    None => FsReply::Err(Errno::ENOENT),
                }
            }
            FsOp::Unmount => FsReply::Ok,
        }
    }

    // Whole-remaining-path resolution. Walks as far as this volume can and
    // stops with one of the three non-terminal replies at a mountpoint, at
    // the volume root's `..`, or at an absolute symlink. `consumed` always
    // counts bytes of the path string as received.
    fn lookup(&self, dir_ino: InodeNr, path: &str, no_follow_last: bool, root_ino: InodeNr) -> FsReply {
        let bytes = path.as_bytes();
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(&dir_ino) {
            return FsReply::Err(Errno::ENOENT);
        }
        let mut cur = dir_ino;
        let mut pos = 0usize;
        // components spliced in from relative symlink targets
        let mut pending: RustDeque<String> = RustDeque::new();
        let mut steps = 0;

        loop {
            steps += 1;
            if steps > 256 {
                return FsReply::Err(Errno::ELOOP);
            }
            // comp_start marks where this component began, so a leave-mount
            // can hand `..` back unconsumed for the parent volume to resolve
            let mut comp_start = pos;
            let comp = match pending.pop_front() {
                Some(c) => c,
                None => {
                    while pos < bytes.len() && bytes[pos] == b'/' {
                        pos += 1;
                    }
                    if pos >= bytes.len() {
                        break;
                    }
                    comp_start = pos;
                    while pos < bytes.len() && bytes[pos] != b'/' {
                        pos += 1;
                    }
                    path[comp_start..pos].to_string()
                }
            };
            let at_end = pos >= bytes.len() && pending.is_empty();

            let cur_node = nodes.get(&cur).unwrap();
            if !cur_node.is_dir() {
                return FsReply::Err(Errno::ENOTDIR);
            }
            match comp.as_str() {
                "." => continue,
                ".." => {
                    if cur == root_ino {
                        // the caller's chroot bound; stay put
                        continue;
                    }
                    if cur == ROOT_INO {
                        return FsReply::LeaveMount { consumed: comp_start };
                    }
                    cur = cur_node.parent;
                    continue;
                }
                name => {
                    let child = match cur_node.children.get(name).copied() {
                        Some(c) => c,
                        None => return FsReply::Err(Errno::ENOENT),
                    };
                    let child_node = nodes.get(&child).unwrap();
                    if is_lnk(child_node.mode) {
                        if at_end && no_follow_last {
                            cur = child;
                            break;
                        }
                        let target = String::from_utf8_lossy(&child_node.content).to_string();
                        if target.starts_with('/') {
                            return FsReply::SymlinkHit { target, consumed: pos };
                        }
                        for part in target.split('/').rev() {
                            if !part.is_empty() {
                                pending.push_front(part.to_string());
                            }
                        }
                        continue;
                    }
                    if child_node.mountpoint {
                        return FsReply::EnterMount { ino: child, consumed: pos };
                    }
                    cur = child;
                }
            }
        }

        let n = nodes.get_mut(&cur).unwrap();
        n.refs += 1;
        FsReply::Node(n.details())
    }
}

enum PendingDev {
    Read { tid: Tid, grant: crate::interface::GrantId, len: usize },
    Open { tid: Tid },
}

/// Scriptable character-device driver: by default it echoes a repeating
/// byte pattern on reads and swallows writes, and it can be told to suspend
/// reads or defer opens so the suspend/revive paths can be exercised.
pub struct SimDriver {
    pub major: u32,
    suspend_reads: RustAtomicBool,
    retry_opens: RustAtomicBool,
    pending: RustMutex<Vec<PendingDev>>,
    written: RustMutex<Vec<u8>>,
    fill: u8,
}

pub fn spawn_driver(major: u32, fill: u8) -> RustRfc<SimDriver> {
    let drv = RustRfc::new(SimDriver {
        major,
        suspend_reads: RustAtomicBool::new(false),
        retry_opens: RustAtomicBool::new(false),
        pending: RustMutex::new(Vec::new()),
        written: RustMutex::new(Vec::new()),
        fill,
    });
    let (tx, rx) = mpsc::channel::<DevRequest>();
    transport::register_driver(major, tx);
    let d2 = drv.clone();
    std::thread::Builder::new()
        .name(format!("simdrv-{}", major))
        .spawn(move || {
            while let Ok(req) = rx.recv() {
                d2.handle(req);
            }
        })
        .unwrap();
    drv
}

impl SimDriver {
    pub fn suspend_reads(&self, on: bool) {
        self.suspend_reads.store(on, RustAtomicOrdering::SeqCst);
    }

    pub fn retry_opens(&self, on: bool) {
        self.retry_opens.store(on, RustAtomicOrdering::SeqCst);
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    fn reply(&self, tid: Tid, reply: DevReply) {
        transport::deliver_dev_response(DevResponse { tid, reply });
    }

    fn handle(&self, req: DevRequest) {
        match req.op {
            DevOp::Open { .. } => {
                if self.retry_opens.load(RustAtomicOrdering::SeqCst) {
                    self.pending.lock().push(PendingDev::Open { tid: req.tid });
                    self.reply(req.tid, DevReply::RetryOpen);
                } else {
                    self.reply(req.tid, DevReply::Done(0));
                }
            }
            DevOp::Close { .. } => self.reply(req.tid, DevReply::Done(0)),
            DevOp::Read { grant, len, .. } => {
                if self.suspend_reads.load(RustAtomicOrdering::SeqCst) {
                    self.pending.lock().push(PendingDev::Read { tid: req.tid, grant, len });
                    self.reply(req.tid, DevReply::Suspended);
                } else {
                    let data = vec![self.fill; len];
                    match copy_to_grant(grant, 0, &data) {
                        Ok(()) => self.reply(req.tid, DevReply::Done(len as i32)),
                        Err(_) => self.reply(req.tid, DevReply::Err(Errno::EFAULT)),
                    }
                }
            }
            DevOp::Write { grant, len, .. } => match copy_from_grant(grant, 0, len) {
                Ok(d) => {
                    self.written.lock().extend_from_slice(&d);
                    self.reply(req.tid, DevReply::Done(len as i32));
                }
                Err(_) => self.reply(req.tid, DevReply::Err(Errno::EFAULT)),
            },
            DevOp::Ioctl { .. } => self.reply(req.tid, DevReply::Done(0)),
            DevOp::Cancel { tid, .. } => {
                // answer the original transaction; the cancel itself gets no
                // reply of its own
                let mut pending = self.pending.lock();
                if let Some(i) = pending.iter().position(|p| match p {
                    PendingDev::Read { tid: t, .. } => *t == tid,
                    PendingDev::Open { tid: t } => *t == tid,
                }) {
                    pending.remove(i);
                    drop(pending);
                    self.reply(tid, DevReply::Err(Errno::EINTR));
                }
            }
        }
    }

    /// Completes every deferred read with `data` and replays every deferred
    /// open; drives the revival paths from tests.
    pub fn finish_pending(&self, data: &[u8]) {
        let drained: Vec<PendingDev> = self.pending.lock().drain(..).collect();
        for p in drained {
            match p {
                PendingDev::Read { tid, grant, len } => {
                    let take = data.len().min(len);
                    match copy_to_grant(grant, 0, &data[..take]) {
                        Ok(()) => self.reply(tid, DevReply::Done(take as i32)),
                        Err(_) => self.reply(tid, DevReply::Err(Errno::EFAULT)),
                    }
                }
                PendingDev::Open { tid } => {
                    self.reply(tid, DevReply::Done(0));
                }
            }
        }
    }
}
