#[cfg(test)]
pub mod fs_tests {
    use crate::interface::{live_grants, Errno};
    use crate::tests::testenv::*;
    use crate::vfs::calls::fs_constants::*;
    use crate::vfs::dispatcher::{ctl_call, vfs_call, vfsfinalize, VfsConfig};
    use crate::vfs::memfs::{spawn_memfs, ROOT_INO};
    use crate::vfs::message::{CtlCall, CtlResult, Endpoint, VfsCall};
    use crate::vfs::process::proctable_getref;
    use crate::vfs::vnode;
    use std::thread;

    #[test]
    pub fn ut_vfs_open_write_read_roundtrip() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();

        let fd = open_path(1, "/f", O_CREAT | O_WRONLY, 0o644);
        assert!(fd >= 0);
        write_mem(1, 0x100, b"hello world");
        assert_eq!(vfs_call(1, VfsCall::Write { fd, buf: 0x100, len: 11 }), 11);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);

        let fd = open_path(1, "/f", O_RDONLY, 0);
        assert!(fd >= 0);
        assert_eq!(vfs_call(1, VfsCall::Fstat { fd, buf: STAT_BUF }), 0);
        let sd = crate::vfs::message::StatData::from_bytes(&read_mem(
            1,
            STAT_BUF,
            crate::vfs::message::StatData::BYTES,
        ));
        assert_eq!(sd.st_size, 11);
        assert!(is_reg(sd.st_mode));

        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: 6, whence: SEEK_SET }),
            6
        );
        assert_eq!(vfs_call(1, VfsCall::Read { fd, buf: 0x200, len: 5 }), 5);
        assert_eq!(read_mem(1, 0x200, 5), b"world".to_vec());
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_open_flag_handling() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");

        assert_eq!(open_path(1, "/f", O_RDWRFLAGS, 0), -(Errno::EINVAL as i32));
        assert_eq!(open_path(1, "/nope", O_RDONLY, 0), -(Errno::ENOENT as i32));
        assert_eq!(
            open_path(1, "/f", O_CREAT | O_EXCL | O_WRONLY, 0o644),
            -(Errno::EEXIST as i32)
        );
        assert_eq!(open_path(1, "/", O_WRONLY, 0), -(Errno::EISDIR as i32));

        // without O_EXCL the create falls through to a plain open
        let fd = open_path(1, "/f", O_CREAT | O_RDONLY, 0o644);
        assert!(fd >= 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert_eq!(stat_path(1, "/f").unwrap().st_size, 3);

        let fd = open_path(1, "/f", O_WRONLY | O_TRUNC, 0);
        assert!(fd >= 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert_eq!(stat_path(1, "/f").unwrap().st_size, 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_append_positions_at_end() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let ino = fs.add_file(ROOT_INO, "log", b"abc");

        let fd = open_path(1, "/log", O_WRONLY | O_APPEND, 0);
        assert!(fd >= 0);
        write_mem(1, 0x100, b"de");
        assert_eq!(vfs_call(1, VfsCall::Write { fd, buf: 0x100, len: 2 }), 2);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert_eq!(fs.content_of(ino).unwrap(), b"abcde".to_vec());
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_lseek_rules() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abcdef");

        let fd = open_path(1, "/f", O_RDONLY, 0);
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: 2, whence: SEEK_END }),
            8
        );
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: -100, whence: SEEK_CUR }),
            -(Errno::EINVAL as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: 0, whence: 99 }),
            -(Errno::EINVAL as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);

        let (rd, _wr) = make_pipe(1, 0x100);
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd: rd, offset: 0, whence: SEEK_SET }),
            -(Errno::ESPIPE as i32)
        );
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_lseek_position_must_fit_the_result() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");

        let fd = open_path(1, "/f", O_RDONLY, 0);
        assert!(fd >= 0);
        // a position past i32::MAX cannot be reported back; it is refused
        // rather than truncated, and the offset stays where it was
        assert_eq!(
            vfs_call(
                1,
                VfsCall::Lseek { fd, offset: i64::from(i32::MAX) + 1, whence: SEEK_SET },
            ),
            -(Errno::EOVERFLOW as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: 0, whence: SEEK_CUR }),
            0
        );

        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: i32::MAX as i64, whence: SEEK_SET }),
            i32::MAX
        );
        // the arithmetic itself must not wrap either
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: i64::MAX, whence: SEEK_CUR }),
            -(Errno::EOVERFLOW as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd, offset: 0, whence: SEEK_CUR }),
            i32::MAX
        );
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_dup_shares_offset() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abcdef");

        let fd = open_path(1, "/f", O_RDONLY, 0);
        assert_eq!(vfs_call(1, VfsCall::Read { fd, buf: 0x100, len: 4 }), 4);

        let fd2 = vfs_call(1, VfsCall::Dup { fd });
        assert!(fd2 >= 0 && fd2 != fd);
        // the filp is shared, so the duplicate sees the advanced offset
        assert_eq!(
            vfs_call(1, VfsCall::Lseek { fd: fd2, offset: 0, whence: SEEK_CUR }),
            4
        );
        assert_eq!(vfs_call(1, VfsCall::Read { fd: fd2, buf: 0x200, len: 2 }), 2);
        assert_eq!(read_mem(1, 0x200, 2), b"ef".to_vec());

        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd: fd2 }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_dup2_targets_a_specific_slot() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "a", b"x");
        fs.add_file(ROOT_INO, "b", b"yy");

        let fa = open_path(1, "/a", O_RDONLY, 0);
        let fb = open_path(1, "/b", O_RDONLY, 0);
        assert_eq!(
            vfs_call(1, VfsCall::Dup2 { fd: fa, newfd: -1 }),
            -(Errno::EBADF as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Dup2 { fd: fa, newfd: MAXFD }),
            -(Errno::EBADF as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Dup2 { fd: fa, newfd: fa }), fa);

        // the occupied target is closed and replaced
        assert_eq!(vfs_call(1, VfsCall::Dup2 { fd: fa, newfd: fb }), fb);
        assert_eq!(vfs_call(1, VfsCall::Fstat { fd: fb, buf: STAT_BUF }), 0);
        let sd = crate::vfs::message::StatData::from_bytes(&read_mem(
            1,
            STAT_BUF,
            crate::vfs::message::StatData::BYTES,
        ));
        assert_eq!(sd.st_size, 1);

        assert_eq!(vfs_call(1, VfsCall::Close { fd: fa }), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd: fb }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_directory_entry_calls() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"x");

        assert_eq!(vfs_call(1, VfsCall::Mkdir { path: "/d".to_string(), mode: 0o755 }), 0);
        assert_eq!(
            vfs_call(1, VfsCall::Mkdir { path: "/d".to_string(), mode: 0o755 }),
            -(Errno::EEXIST as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Mkdir { path: "/d/sub".to_string(), mode: 0o755 }),
            0
        );
        assert_eq!(
            vfs_call(1, VfsCall::Rmdir { path: "/d".to_string() }),
            -(Errno::ENOTEMPTY as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Rmdir { path: "/f".to_string() }),
            -(Errno::ENOTDIR as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Rmdir { path: "/d/sub".to_string() }), 0);
        assert_eq!(vfs_call(1, VfsCall::Rmdir { path: "/d".to_string() }), 0);

        assert_eq!(
            vfs_call(
                1,
                VfsCall::Symlink { target: "/f".to_string(), path: "/lnk".to_string() },
            ),
            0
        );
        assert_eq!(stat_path(1, "/lnk").unwrap().st_size, 1);

        assert_eq!(vfs_call(1, VfsCall::Unlink { path: "/f".to_string() }), 0);
        assert_eq!(stat_path(1, "/f"), Err(-(Errno::ENOENT as i32)));
        assert_eq!(
            vfs_call(1, VfsCall::Unlink { path: "/f".to_string() }),
            -(Errno::ENOENT as i32)
        );
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_rename_basics() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "a", b"x");
        fs.add_file(ROOT_INO, "b", b"yy");

        assert_eq!(
            vfs_call(
                1,
                VfsCall::Rename { old: "/a".to_string(), new: "/c".to_string() },
            ),
            0
        );
        assert_eq!(stat_path(1, "/a"), Err(-(Errno::ENOENT as i32)));
        assert_eq!(stat_path(1, "/c").unwrap().st_size, 1);

        // an existing target is replaced
        assert_eq!(
            vfs_call(
                1,
                VfsCall::Rename { old: "/c".to_string(), new: "/b".to_string() },
            ),
            0
        );
        assert_eq!(stat_path(1, "/b").unwrap().st_size, 1);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_concurrent_renames_in_one_directory() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let d = fs.add_dir(ROOT_INO, "d");
        fs.add_file(d, "a", b"1");
        fs.add_file(d, "c", b"22");

        // both need the mount entry exclusively; they serialize, not deadlock
        let t1 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Rename { old: "/d/a".to_string(), new: "/d/b".to_string() },
            )
        });
        let t2 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Rename { old: "/d/c".to_string(), new: "/d/e".to_string() },
            )
        });
        assert_eq!(t1.join().unwrap(), 0);
        assert_eq!(t2.join().unwrap(), 0);

        assert_eq!(stat_path(1, "/d/b").unwrap().st_size, 1);
        assert_eq!(stat_path(1, "/d/e").unwrap().st_size, 2);
        assert_eq!(stat_path(1, "/d/a"), Err(-(Errno::ENOENT as i32)));
        assert_eq!(stat_path(1, "/d/c"), Err(-(Errno::ENOENT as i32)));
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_rename_across_volumes_fails() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"x");
        fs.add_dir(ROOT_INO, "mnt");
        let _fs2 = spawn_memfs(Endpoint(101));
        assert_eq!(mount_at(1, Endpoint(101), 2, "/mnt"), 0);

        assert_eq!(
            vfs_call(
                1,
                VfsCall::Rename { old: "/f".to_string(), new: "/mnt/f".to_string() },
            ),
            -(Errno::EXDEV as i32)
        );
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_opposing_cross_volume_renames_both_refused() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "a");
        fs.add_dir(ROOT_INO, "b");
        let fs_a = spawn_memfs(Endpoint(101));
        let fs_b = spawn_memfs(Endpoint(102));
        fs_a.add_file(ROOT_INO, "f", b"1");
        fs_b.add_file(ROOT_INO, "g", b"22");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/a"), 0);
        assert_eq!(mount_at(1, Endpoint(102), 3, "/b"), 0);
        match ctl_call(CtlCall::Fork { parent: 1, child: 2 }) {
            CtlResult::Code(0) => {}
            other => panic!("fork failed: {:?}", other),
        }

        // Each rename takes the two volumes' mount entries in opposite order.
        // The second acquisition never waits while the first is held, so the
        // pair cannot block on each other forever; both walk to the EXDEV
        // refusal and both joins return.
        let t1 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Rename { old: "/a/f".to_string(), new: "/b/f".to_string() },
            )
        });
        let t2 = thread::spawn(move || {
            vfs_call(
                2,
                VfsCall::Rename { old: "/b/g".to_string(), new: "/a/g".to_string() },
            )
        });
        assert_eq!(t1.join().unwrap(), -(Errno::EXDEV as i32));
        assert_eq!(t2.join().unwrap(), -(Errno::EXDEV as i32));

        // nothing moved
        assert_eq!(stat_path(1, "/a/f").unwrap().st_size, 1);
        assert_eq!(stat_path(1, "/b/g").unwrap().st_size, 2);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_buffer_outside_client_memory_faults() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");
        let bad = 0x20_0000; // past the end of the client memory image

        assert_eq!(
            vfs_call(1, VfsCall::Stat { path: "/f".to_string(), buf: bad }),
            -(Errno::EFAULT as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Pipe { fds_buf: bad }),
            -(Errno::EFAULT as i32)
        );

        let fd = open_path(1, "/f", O_RDWR, 0);
        assert!(fd >= 0);
        assert_eq!(
            vfs_call(1, VfsCall::Fstat { fd, buf: bad }),
            -(Errno::EFAULT as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Read { fd, buf: bad, len: 3 }),
            -(Errno::EFAULT as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Write { fd, buf: bad, len: 3 }),
            -(Errno::EFAULT as i32)
        );
        // a length that runs off the end faults the same way as a bad start
        assert_eq!(
            vfs_call(1, VfsCall::Read { fd, buf: 0x100, len: usize::MAX }),
            -(Errno::EFAULT as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);

        let (rd, wr) = make_pipe(1, 0x100);
        assert_eq!(
            vfs_call(1, VfsCall::Write { fd: wr, buf: bad, len: 4 }),
            -(Errno::EFAULT as i32)
        );
        write_mem(1, 0x300, b"ok");
        assert_eq!(vfs_call(1, VfsCall::Write { fd: wr, buf: 0x300, len: 2 }), 2);
        assert_eq!(
            vfs_call(1, VfsCall::Read { fd: rd, buf: bad, len: 2 }),
            -(Errno::EFAULT as i32)
        );
        // the faulted read consumed nothing
        assert_eq!(vfs_call(1, VfsCall::Read { fd: rd, buf: 0x400, len: 2 }), 2);
        assert_eq!(read_mem(1, 0x400, 2), b"ok".to_vec());

        assert_eq!(live_grants(), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_readonly_volume_refuses_writes() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "ro");
        let fs2 = spawn_memfs(Endpoint(101));
        fs2.add_file(ROOT_INO, "f", b"data");
        assert_eq!(
            vfs_call(
                1,
                VfsCall::Mount {
                    fs: Endpoint(101),
                    dev: 2,
                    path: "/ro".to_string(),
                    label: "vol-ro".to_string(),
                    readonly: true,
                    max_concurrent: 8,
                },
            ),
            0
        );

        assert_eq!(
            open_path(1, "/ro/new", O_CREAT | O_WRONLY, 0o644),
            -(Errno::EROFS as i32)
        );
        assert_eq!(
            open_path(1, "/ro/f", O_WRONLY | O_TRUNC, 0),
            -(Errno::EROFS as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Mkdir { path: "/ro/d".to_string(), mode: 0o755 }),
            -(Errno::EROFS as i32)
        );
        assert_eq!(
            vfs_call(1, VfsCall::Unlink { path: "/ro/f".to_string() }),
            -(Errno::EROFS as i32)
        );

        // the open itself is fine; the write is refused at write time
        let fd = open_path(1, "/ro/f", O_WRONLY, 0);
        assert!(fd >= 0);
        write_mem(1, 0x100, b"no");
        assert_eq!(
            vfs_call(1, VfsCall::Write { fd, buf: 0x100, len: 2 }),
            -(Errno::EROFS as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Read { fd: open_path(1, "/ro/f", O_RDONLY, 0), buf: 0x200, len: 4 }), 4);
        assert_eq!(read_mem(1, 0x200, 4), b"data".to_vec());
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_umount_busy_then_clean() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "mnt");
        let fs2 = spawn_memfs(Endpoint(101));
        fs2.add_file(ROOT_INO, "f", b"x");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/mnt"), 0);

        let fd = open_path(1, "/mnt/f", O_RDONLY, 0);
        assert!(fd >= 0);
        assert_eq!(
            vfs_call(1, VfsCall::Umount { path: "/mnt".to_string() }),
            -(Errno::EBUSY as i32)
        );
        let before = crate::vfs::mount::snapshot_mounts().len();

        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert_eq!(vfs_call(1, VfsCall::Umount { path: "/mnt".to_string() }), 0);
        assert_eq!(crate::vfs::mount::snapshot_mounts().len(), before - 1);

        // the mountpoint directory is plain again
        let sd = stat_path(1, "/mnt").unwrap();
        assert_eq!(sd.st_dev, 1);
        assert!(is_dir(sd.st_mode));
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_chdir_and_relative_paths() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let d = fs.add_dir(ROOT_INO, "d");
        fs.add_file(d, "f", b"xy");
        fs.add_file(ROOT_INO, "plain", b"z");

        assert_eq!(
            vfs_call(1, VfsCall::Chdir { path: "/plain".to_string() }),
            -(Errno::ENOTDIR as i32)
        );
        assert_eq!(vfs_call(1, VfsCall::Chdir { path: "/d".to_string() }), 0);
        assert_eq!(stat_path(1, "f").unwrap().st_size, 2);
        assert_eq!(stat_path(1, "../plain").unwrap().st_size, 1);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_fork_exec_exit_lifecycle() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");

        let keep = open_path(1, "/f", O_RDONLY, 0);
        let doomed = open_path(1, "/f", O_RDONLY | O_CLOEXEC, 0);
        assert!(keep >= 0 && doomed >= 0);

        match ctl_call(CtlCall::Fork { parent: 1, child: 2 }) {
            CtlResult::Code(0) => {}
            other => panic!("fork failed: {:?}", other),
        }
        // the child inherited both descriptors
        assert_eq!(vfs_call(2, VfsCall::Fstat { fd: keep, buf: STAT_BUF }), 0);

        match ctl_call(CtlCall::Exec { pid: 1 }) {
            CtlResult::Code(0) => {}
            other => panic!("exec failed: {:?}", other),
        }
        let p = proctable_getref(1).unwrap();
        assert!(p.get_fd(doomed).is_none());
        assert!(p.get_fd(keep).is_some());

        match ctl_call(CtlCall::Setcred { pid: 1, uid: 7, gid: 8 }) {
            CtlResult::Code(0) => {}
            other => panic!("setcred failed: {:?}", other),
        }
        assert_eq!(
            p.uid.load(std::sync::atomic::Ordering::SeqCst),
            7
        );

        match ctl_call(CtlCall::Exit { pid: 2 }) {
            CtlResult::Code(0) => {}
            other => panic!("exit failed: {:?}", other),
        }
        assert_eq!(
            vfs_call(2, VfsCall::Stat { path: "/f".to_string(), buf: STAT_BUF }),
            -(Errno::ESRCH as i32)
        );
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_snapshot_reports_state() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let ino = fs.add_file(ROOT_INO, "f", b"abc");

        let fd = open_path(1, "/f", O_RDONLY, 0);
        assert!(fd >= 0);
        assert!(vnode::snapshot_vnodes().iter().any(|v| v.inode_nr == ino));

        let json = match ctl_call(CtlCall::Snapshot) {
            CtlResult::Snapshot(s) => s,
            other => panic!("snapshot failed: {:?}", other),
        };
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(v.get("vnodes").is_some());
        assert!(v.get("mounts").is_some());
        assert!(v.get("processes").is_some());

        // the open file's vnode reference is dropped with the descriptor
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        assert!(!vnode::snapshot_vnodes().iter().any(|v| v.inode_nr == ino));
        vfsfinalize();
    }
}
