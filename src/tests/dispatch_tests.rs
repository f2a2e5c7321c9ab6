#[cfg(test)]
pub mod dispatch_tests {
    use crate::interface::Errno;
    use crate::tests::testenv::*;
    use crate::vfs::calls::fs_constants::*;
    use crate::vfs::calls::sys_calls;
    use crate::vfs::dispatcher::{ctl_call, server_call, vfs_call, vfsfinalize, VfsConfig};
    use crate::vfs::memfs::{spawn_memfs, ROOT_INO};
    use crate::vfs::message::{CtlCall, CtlResult, Endpoint, VfsCall};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    pub fn ut_vfs_one_call_per_client() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, wr) = make_pipe(1, 0x100);
        match ctl_call(CtlCall::Fork { parent: 1, child: 2 }) {
            CtlResult::Code(0) => {}
            other => panic!("fork failed: {:?}", other),
        }

        // first call parks on the empty pipe
        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd: rd, buf: 0x200, len: 16 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "pipe");

        // second call from the same client waits in the pending slot
        let t2 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Stat {
                    path: "/".to_string(),
                    buf: 0x400,
                },
            )
        });
        thread::sleep(Duration::from_millis(100));

        // a third is refused outright
        assert_eq!(
            vfs_call(1, VfsCall::Fstat { fd: rd, buf: 0x500 }),
            -(Errno::EAGAIN as i32)
        );

        // the sibling writes; the parked read revives and the pending call runs
        write_mem(2, 0x600, b"ping");
        assert_eq!(vfs_call(2, VfsCall::Write { fd: wr, buf: 0x600, len: 4 }), 4);
        assert_eq!(t1.join().unwrap(), 4);
        assert_eq!(read_mem(1, 0x200, 4), b"ping".to_vec());
        assert_eq!(t2.join().unwrap(), 0);
        assert_eq!(blocked_tag(1), "running");
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_pending_slot_never_strands_a_call() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();

        // Two overlapping calls from one client, over and over with no
        // sleeps, so the second keeps hitting the pending slot just as the
        // first finishes. Whichever way the race falls, both calls must
        // complete; a call stranded in the slot hangs its join.
        for _ in 0..200 {
            let t1 = thread::spawn(move || {
                vfs_call(1, VfsCall::Stat { path: "/".to_string(), buf: 0x100 })
            });
            let t2 = thread::spawn(move || {
                vfs_call(1, VfsCall::Stat { path: "/".to_string(), buf: 0x200 })
            });
            assert_eq!(t1.join().unwrap(), 0);
            assert_eq!(t2.join().unwrap(), 0);
        }
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_backcall_into_own_mount_is_refused() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"x");
        assert_eq!(sys_calls::init_proc(9), 0);

        // A mounted server naming a path on its own volume would wait on
        // itself: the path lookup needs the server that issued the call.
        // The mount entry acquisition refuses it instead.
        let r = server_call(
            9,
            ROOT_EP,
            VfsCall::Stat {
                path: "/f".to_string(),
                buf: 0x100,
            },
        );
        assert_eq!(r, -(Errno::EDEADLK as i32));

        // an ordinary client is untouched by the refusal
        assert_eq!(stat_path(1, "/f").unwrap().st_size, 1);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_deadlock_breaker_admits_backcall() {
        let mut cfg = VfsConfig::default();
        cfg.nthreads = 1;
        let _g = setup(cfg);
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");
        fs.add_dir(ROOT_INO, "a");

        let fs_a = spawn_memfs(Endpoint(101));
        fs_a.add_file(ROOT_INO, "x", b"slow");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/a"), 0);
        assert_eq!(sys_calls::init_proc(9), 0);

        // the only worker gets stuck inside a slow volume
        fs_a.set_delay_ms(200);
        let slow_done = Arc::new(AtomicBool::new(false));
        let done2 = slow_done.clone();
        let t1 = thread::spawn(move || {
            let r = vfs_call(
                1,
                VfsCall::Stat {
                    path: "/a/x".to_string(),
                    buf: 0x100,
                },
            );
            done2.store(true, Ordering::SeqCst);
            r
        });
        thread::sleep(Duration::from_millis(50));

        // a request from the mounted server itself still gets through,
        // on the reserved deadlock breaker
        let r = server_call(
            9,
            Endpoint(101),
            VfsCall::Stat {
                path: "/f".to_string(),
                buf: 0x100,
            },
        );
        assert_eq!(r, 0);
        assert!(!slow_done.load(Ordering::SeqCst));

        assert_eq!(t1.join().unwrap(), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_deadlock_breaker_busy_refuses() {
        let mut cfg = VfsConfig::default();
        cfg.nthreads = 1;
        let _g = setup(cfg);
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "f", b"abc");
        fs.add_dir(ROOT_INO, "a");
        fs.add_dir(ROOT_INO, "b");

        let fs_a = spawn_memfs(Endpoint(101));
        fs_a.add_file(ROOT_INO, "f", b"x");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/a"), 0);
        let _fs_b = spawn_memfs(Endpoint(102));
        assert_eq!(mount_at(1, Endpoint(102), 3, "/b"), 0);
        assert_eq!(sys_calls::init_proc(8), 0);
        assert_eq!(sys_calls::init_proc(9), 0);
        assert_eq!(vfs_call(1, VfsCall::Chdir { path: "/a".to_string() }), 0);

        fs.set_delay_ms(300);
        fs_a.set_delay_ms(300);

        // pid 1 occupies the lone worker on the slow volume; no root volume
        // requests involved thanks to the relative path
        let t1 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Stat {
                    path: "f".to_string(),
                    buf: 0x100,
                },
            )
        });
        thread::sleep(Duration::from_millis(60));

        // one back-call claims the breaker and sits in the slow root volume
        let t2 = thread::spawn(move || {
            server_call(
                8,
                Endpoint(102),
                VfsCall::Stat {
                    path: "/f".to_string(),
                    buf: 0x100,
                },
            )
        });
        thread::sleep(Duration::from_millis(60));

        // a second back-call finds the breaker occupied
        let r = server_call(
            9,
            Endpoint(101),
            VfsCall::Stat {
                path: "/f".to_string(),
                buf: 0x100,
            },
        );
        assert_eq!(r, -(Errno::EAGAIN as i32));

        fs.set_delay_ms(0);
        fs_a.set_delay_ms(0);
        assert_eq!(t1.join().unwrap(), 0);
        assert_eq!(t2.join().unwrap(), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_backcall_parks_on_busy_mount_lock() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "src", b"s");
        fs.add_file(ROOT_INO, "f", b"x");
        fs.add_dir(ROOT_INO, "sub");
        let _fs_a = spawn_memfs(Endpoint(101));
        assert_eq!(mount_at(1, Endpoint(101), 2, "/sub"), 0);
        assert_eq!(sys_calls::init_proc(9), 0);

        // a slow rename holds the root mount entry exclusively
        fs.set_delay_ms(250);
        let t1 = thread::spawn(move || {
            vfs_call(
                1,
                VfsCall::Rename {
                    old: "/src".to_string(),
                    new: "/dst".to_string(),
                },
            )
        });
        thread::sleep(Duration::from_millis(80));

        // a back-call must not wait on the worker thread for that lock;
        // it parks lock-blocked and replays after the unlock
        let t2 = thread::spawn(move || {
            server_call(
                9,
                Endpoint(101),
                VfsCall::Stat {
                    path: "/f".to_string(),
                    buf: 0x100,
                },
            )
        });
        thread::sleep(Duration::from_millis(80));
        assert_eq!(blocked_tag(9), "lock");

        assert_eq!(t1.join().unwrap(), 0);
        fs.set_delay_ms(0);
        assert_eq!(t2.join().unwrap(), 0);

        assert_eq!(stat_path(1, "/dst").unwrap().st_size, 1);
        assert_eq!(stat_path(1, "/src"), Err(-(Errno::ENOENT as i32)));
        vfsfinalize();
    }
}
