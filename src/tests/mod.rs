mod dispatch_tests;
mod fs_tests;
mod lookup_tests;
mod suspend_tests;

#[cfg(test)]
pub mod testenv {
    use crate::interface::RustRfc;
    use crate::vfs::calls::sys_calls;
    use crate::vfs::dispatcher::{vfs_call, vfsinit, VfsConfig};
    use crate::vfs::memfs::{spawn_memfs, MemFs};
    use crate::vfs::message::{Endpoint, StatData, VfsCall};
    use crate::vfs::process::proctable_getref;
    use std::sync::{Mutex, MutexGuard};

    // The tables, worker pool and server registry are process-wide, so tests
    // take turns. A test that panicked still releases the poisoned guard.
    pub static TESTMUTEX: Mutex<()> = Mutex::new(());

    pub const ROOT_EP: Endpoint = Endpoint(100);
    pub const STAT_BUF: usize = 0xf000;

    pub fn setup(cfg: VfsConfig) -> MutexGuard<'static, ()> {
        let guard = TESTMUTEX.lock().unwrap_or_else(|e| e.into_inner());
        vfsinit(cfg);
        guard
    }

    /// One in-memory volume mounted at "/" plus one registered client, pid 1.
    pub fn boot_single_volume() -> RustRfc<MemFs> {
        let fs = spawn_memfs(ROOT_EP);
        assert_eq!(sys_calls::init_proc(1), 0);
        assert_eq!(mount_at(1, ROOT_EP, 1, "/"), 0);
        fs
    }

    pub fn mount_at(pid: u64, fs: Endpoint, dev: u64, path: &str) -> i32 {
        vfs_call(
            pid,
            VfsCall::Mount {
                fs,
                dev,
                path: path.to_string(),
                label: format!("vol-{}", dev),
                readonly: false,
                max_concurrent: 8,
            },
        )
    }

    pub fn write_mem(pid: u64, start: usize, data: &[u8]) {
        proctable_getref(pid)
            .unwrap()
            .mem
            .write()
            .write_bytes(start, data)
            .unwrap();
    }

    pub fn read_mem(pid: u64, start: usize, len: usize) -> Vec<u8> {
        proctable_getref(pid)
            .unwrap()
            .mem
            .write()
            .read_bytes(start, len)
            .unwrap()
    }

    pub fn open_path(pid: u64, path: &str, flags: i32, mode: u32) -> i32 {
        vfs_call(
            pid,
            VfsCall::Open {
                path: path.to_string(),
                flags,
                mode,
            },
        )
    }

    pub fn stat_path(pid: u64, path: &str) -> Result<StatData, i32> {
        let r = vfs_call(
            pid,
            VfsCall::Stat {
                path: path.to_string(),
                buf: STAT_BUF,
            },
        );
        if r < 0 {
            return Err(r);
        }
        Ok(StatData::from_bytes(&read_mem(pid, STAT_BUF, StatData::BYTES)))
    }

    pub fn lstat_path(pid: u64, path: &str) -> Result<StatData, i32> {
        let r = vfs_call(
            pid,
            VfsCall::Lstat {
                path: path.to_string(),
                buf: STAT_BUF,
            },
        );
        if r < 0 {
            return Err(r);
        }
        Ok(StatData::from_bytes(&read_mem(pid, STAT_BUF, StatData::BYTES)))
    }

    /// Creates a pipe for `pid` and returns (read fd, write fd).
    pub fn make_pipe(pid: u64, buf: usize) -> (i32, i32) {
        assert_eq!(vfs_call(pid, VfsCall::Pipe { fds_buf: buf }), 0);
        let raw = read_mem(pid, buf, 8);
        let rd = i32::from_le_bytes(raw[0..4].try_into().unwrap());
        let wr = i32::from_le_bytes(raw[4..8].try_into().unwrap());
        (rd, wr)
    }

    pub fn blocked_tag(pid: u64) -> String {
        proctable_getref(pid).unwrap().blocked.lock().tag().to_string()
    }
}
