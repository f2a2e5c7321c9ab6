#[cfg(test)]
pub mod suspend_tests {
    use crate::interface::{live_grants, Errno};
    use crate::tests::testenv::*;
    use crate::vfs::calls::fs_constants::*;
    use crate::vfs::dispatcher::{ctl_call, vfs_call, vfsfinalize, VfsConfig};
    use crate::vfs::memfs::{spawn_driver, ROOT_INO};
    use crate::vfs::message::{CtlCall, CtlResult, VfsCall};
    use crate::vfs::process::proctable_getref;
    use std::thread;
    use std::time::Duration;

    fn fork_child(parent: u64, child: u64) {
        match ctl_call(CtlCall::Fork { parent, child }) {
            CtlResult::Code(0) => {}
            other => panic!("fork failed: {:?}", other),
        }
    }

    #[test]
    pub fn ut_vfs_pipe_read_parks_and_revives() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, wr) = make_pipe(1, 0x100);
        fork_child(1, 2);

        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd: rd, buf: 0x200, len: 32 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "pipe");

        write_mem(2, 0x300, b"wakeup");
        assert_eq!(vfs_call(2, VfsCall::Write { fd: wr, buf: 0x300, len: 6 }), 6);
        assert_eq!(t1.join().unwrap(), 6);
        assert_eq!(read_mem(1, 0x200, 6), b"wakeup".to_vec());
        assert_eq!(blocked_tag(1), "running");

        // with every write end closed the reader sees end of file
        assert_eq!(vfs_call(1, VfsCall::Close { fd: wr }), 0);
        assert_eq!(vfs_call(2, VfsCall::Close { fd: wr }), 0);
        assert_eq!(vfs_call(1, VfsCall::Read { fd: rd, buf: 0x200, len: 32 }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_pipe_write_parks_until_reader_drains() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, wr) = make_pipe(1, 0x100);
        fork_child(1, 2);

        let fill = vec![7u8; PIPE_CAPACITY];
        write_mem(1, 0x1000, &fill);
        assert_eq!(
            vfs_call(1, VfsCall::Write { fd: wr, buf: 0x1000, len: PIPE_CAPACITY }),
            PIPE_CAPACITY as i32
        );

        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Write { fd: wr, buf: 0x1000, len: 8 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "pipe");

        assert_eq!(vfs_call(2, VfsCall::Read { fd: rd, buf: 0x200, len: 8192 }), 8192);
        assert_eq!(t1.join().unwrap(), 8);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_select_polls_and_blocks() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, wr) = make_pipe(1, 0x100);
        fork_child(1, 2);

        // poll: nothing to read, room to write
        assert_eq!(
            vfs_call(1, VfsCall::Select { readfds: vec![rd], writefds: vec![], poll_only: true }),
            0
        );
        assert_eq!(
            vfs_call(1, VfsCall::Select { readfds: vec![], writefds: vec![wr], poll_only: true }),
            1
        );
        assert_eq!(
            vfs_call(1, VfsCall::Select { readfds: vec![99], writefds: vec![], poll_only: true }),
            -(Errno::EBADF as i32)
        );

        let t1 = thread::spawn(move || {
            vfs_call(1, VfsCall::Select { readfds: vec![rd], writefds: vec![], poll_only: false })
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "select");

        write_mem(2, 0x300, b"x");
        assert_eq!(vfs_call(2, VfsCall::Write { fd: wr, buf: 0x300, len: 1 }), 1);
        assert_eq!(t1.join().unwrap(), 1);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_device_read_and_write() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0x5a);

        let fd = open_path(1, "/echo", O_RDWR, 0);
        assert!(fd >= 0);
        assert_eq!(vfs_call(1, VfsCall::Read { fd, buf: 0x200, len: 6 }), 6);
        assert_eq!(read_mem(1, 0x200, 6), vec![0x5a; 6]);

        write_mem(1, 0x300, b"todrv");
        assert_eq!(vfs_call(1, VfsCall::Write { fd, buf: 0x300, len: 5 }), 5);
        assert_eq!(drv.written_bytes(), b"todrv".to_vec());

        assert_eq!(vfs_call(1, VfsCall::Ioctl { fd, request: 42, buf: None, len: 0 }), 0);
        assert_eq!(live_grants(), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_device_suspends_then_notifies() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0);

        let fd = open_path(1, "/echo", O_RDONLY, 0);
        assert!(fd >= 0);

        drv.suspend_reads(true);
        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd, buf: 0x200, len: 16 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "device");
        assert_eq!(live_grants(), 1);

        // the deferred completion carries the result and finishes the call
        drv.finish_pending(b"hi");
        assert_eq!(t1.join().unwrap(), 2);
        assert_eq!(read_mem(1, 0x200, 2), b"hi".to_vec());
        assert_eq!(blocked_tag(1), "running");
        assert_eq!(live_grants(), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_device_completion_races_with_park() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0);

        let fd = open_path(1, "/echo", O_RDONLY, 0);
        assert!(fd >= 0);
        drv.suspend_reads(true);

        // No sleeps: the completion is pumped continuously so across the
        // iterations it lands before, during and after the caller's park.
        // A completion that beats the park must still finish the call.
        for _ in 0..50 {
            let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd, buf: 0x200, len: 8 }));
            while !t1.is_finished() {
                drv.finish_pending(b"z");
                thread::yield_now();
            }
            assert_eq!(t1.join().unwrap(), 1);
            assert_eq!(read_mem(1, 0x200, 1), b"z".to_vec());
            assert_eq!(blocked_tag(1), "running");
        }
        assert_eq!(live_grants(), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_pipe_wakeup_races_with_park() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, wr) = make_pipe(1, 0x100);
        fork_child(1, 2);

        // The write fires immediately after the read is submitted, so the
        // revival sweep keeps landing inside the reader's suspend window.
        // Every read must return; a read sleeping through its wakeup hangs
        // the join below.
        write_mem(2, 0x300, b"k");
        for _ in 0..100 {
            let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd: rd, buf: 0x200, len: 4 }));
            assert_eq!(vfs_call(2, VfsCall::Write { fd: wr, buf: 0x300, len: 1 }), 1);
            assert_eq!(t1.join().unwrap(), 1);
            assert_eq!(blocked_tag(1), "running");
        }
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_device_block_cancelled_by_signal() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0);

        let fd = open_path(1, "/echo", O_RDONLY, 0);
        drv.suspend_reads(true);
        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd, buf: 0x200, len: 16 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "device");

        // cancel goes to the driver; the driver answers the original
        // transaction with EINTR and the grant is revoked exactly once
        match ctl_call(CtlCall::Unpause { pid: 1 }) {
            CtlResult::Code(0) => {}
            other => panic!("unpause failed: {:?}", other),
        }
        assert_eq!(t1.join().unwrap(), -(Errno::EINTR as i32));
        assert_eq!(blocked_tag(1), "running");
        assert_eq!(live_grants(), 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_open_retry_is_replayed() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0);

        drv.retry_opens(true);
        let t1 = thread::spawn(move || open_path(1, "/echo", O_RDONLY, 0));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "open-retry");

        drv.retry_opens(false);
        drv.finish_pending(&[]);
        let fd = t1.join().unwrap();
        assert!(fd >= 0);
        assert_eq!(vfs_call(1, VfsCall::Close { fd }), 0);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_open_retry_cancel_waits_for_completion() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_chr(ROOT_INO, "echo", 7, 0);
        let drv = spawn_driver(7, 0);

        drv.retry_opens(true);
        let t1 = thread::spawn(move || open_path(1, "/echo", O_RDONLY, 0));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "open-retry");

        // the cancel does not abort the sequence; it is honored only after
        // the replayed open completed, and the fresh descriptor is undone
        match ctl_call(CtlCall::Unpause { pid: 1 }) {
            CtlResult::Code(0) => {}
            other => panic!("unpause failed: {:?}", other),
        }
        assert_eq!(blocked_tag(1), "open-retry");

        drv.retry_opens(false);
        drv.finish_pending(&[]);
        assert_eq!(t1.join().unwrap(), -(Errno::EINTR as i32));
        assert!(proctable_getref(1).unwrap().fds.is_empty());
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_signal_cancels_pipe_wait() {
        let _g = setup(VfsConfig::default());
        boot_single_volume();
        let (rd, _wr) = make_pipe(1, 0x100);

        let t1 = thread::spawn(move || vfs_call(1, VfsCall::Read { fd: rd, buf: 0x200, len: 16 }));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(blocked_tag(1), "pipe");

        match ctl_call(CtlCall::Unpause { pid: 1 }) {
            CtlResult::Code(0) => {}
            other => panic!("unpause failed: {:?}", other),
        }
        assert_eq!(t1.join().unwrap(), -(Errno::EINTR as i32));
        assert_eq!(blocked_tag(1), "running");

        // unpausing a process that is not blocked is a no-op
        match ctl_call(CtlCall::Unpause { pid: 1 }) {
            CtlResult::Code(0) => {}
            other => panic!("unpause failed: {:?}", other),
        }
        vfsfinalize();
    }
}
