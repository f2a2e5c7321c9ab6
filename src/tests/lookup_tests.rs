#[cfg(test)]
pub mod lookup_tests {
    use crate::interface::Errno;
    use crate::tests::testenv::*;
    use crate::vfs::calls::fs_constants::*;
    use crate::vfs::dispatcher::{vfs_call, vfsfinalize, VfsConfig};
    use crate::vfs::memfs::{spawn_memfs, ROOT_INO};
    use crate::vfs::message::{Endpoint, VfsCall};

    #[test]
    pub fn ut_vfs_lookup_enters_mounted_volume() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "mnt");

        let fs2 = spawn_memfs(Endpoint(101));
        fs2.add_file(ROOT_INO, "f", b"abc");
        let d = fs2.add_dir(ROOT_INO, "d");
        fs2.add_file(d, "g", b"zz");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/mnt"), 0);

        // the mountpoint itself resolves to the covering volume's root
        let sd = stat_path(1, "/mnt").unwrap();
        assert_eq!(sd.st_dev, 2);
        assert_eq!(sd.st_ino, ROOT_INO);
        assert!(is_dir(sd.st_mode));

        let sd = stat_path(1, "/mnt/f").unwrap();
        assert_eq!(sd.st_dev, 2);
        assert_eq!(sd.st_size, 3);
        assert!(is_reg(sd.st_mode));

        let sd = stat_path(1, "/mnt/d/g").unwrap();
        assert_eq!(sd.st_size, 2);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_lookup_leaves_volume_through_dotdot() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "mnt");
        fs.add_file(ROOT_INO, "here", b"x");

        let fs2 = spawn_memfs(Endpoint(101));
        fs2.add_dir(ROOT_INO, "sub");
        assert_eq!(mount_at(1, Endpoint(101), 2, "/mnt"), 0);

        // `..` on the mounted root lands back on the parent volume
        let sd = stat_path(1, "/mnt/..").unwrap();
        assert_eq!(sd.st_dev, 1);
        assert_eq!(sd.st_ino, ROOT_INO);

        // and the remaining path continues there
        let sd = stat_path(1, "/mnt/../here").unwrap();
        assert_eq!(sd.st_dev, 1);
        assert_eq!(sd.st_size, 1);

        // `..` on the global root stays at the global root
        let sd = stat_path(1, "/..").unwrap();
        assert_eq!(sd.st_dev, 1);
        assert_eq!(sd.st_ino, ROOT_INO);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_absolute_symlink_restarts_at_root() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let d = fs.add_dir(ROOT_INO, "d");
        fs.add_file(d, "real", b"xyz");
        fs.add_symlink(ROOT_INO, "link", "/d/real");
        fs.add_symlink(ROOT_INO, "dirlink", "/d");

        let sd = stat_path(1, "/link").unwrap();
        assert_eq!(sd.st_size, 3);
        assert!(is_reg(sd.st_mode));

        // unconsumed tail is spliced onto the target
        let sd = stat_path(1, "/dirlink/real").unwrap();
        assert_eq!(sd.st_size, 3);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_relative_symlink_resolved_in_place() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let d = fs.add_dir(ROOT_INO, "d");
        fs.add_file(d, "real", b"xyz");
        fs.add_symlink(d, "rel", "real");

        let sd = stat_path(1, "/d/rel").unwrap();
        assert_eq!(sd.st_size, 3);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_lstat_and_readlink_do_not_follow() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        let d = fs.add_dir(ROOT_INO, "d");
        fs.add_file(d, "real", b"xyz");
        fs.add_symlink(ROOT_INO, "link", "/d/real");

        let sd = lstat_path(1, "/link").unwrap();
        assert!(is_lnk(sd.st_mode));

        let n = vfs_call(
            1,
            VfsCall::Readlink {
                path: "/link".to_string(),
                buf: 0x100,
                len: 64,
            },
        );
        assert_eq!(n, 7);
        assert_eq!(read_mem(1, 0x100, 7), b"/d/real".to_vec());

        // readlink on a non-link is refused
        let n = vfs_call(
            1,
            VfsCall::Readlink {
                path: "/d/real".to_string(),
                buf: 0x100,
                len: 64,
            },
        );
        assert_eq!(n, -(Errno::EINVAL as i32));
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_symlink_self_loop_fails() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_symlink(ROOT_INO, "loop", "/loop");
        assert_eq!(stat_path(1, "/loop"), Err(-(Errno::ELOOP as i32)));
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_hop_bound_is_configurable() {
        let mut cfg = VfsConfig::default();
        cfg.max_symlink_hops = 2;
        let _g = setup(cfg);
        let fs = boot_single_volume();
        fs.add_file(ROOT_INO, "end", b"x");
        fs.add_symlink(ROOT_INO, "l1", "/l2");
        fs.add_symlink(ROOT_INO, "l2", "/l3");
        fs.add_symlink(ROOT_INO, "l3", "/end");

        // three hops against a bound of two
        assert_eq!(stat_path(1, "/l1"), Err(-(Errno::ELOOP as i32)));
        // two hops are fine
        assert_eq!(stat_path(1, "/l2").unwrap().st_size, 1);
        vfsfinalize();
    }

    #[test]
    pub fn ut_vfs_lookup_edge_paths() {
        let _g = setup(VfsConfig::default());
        let fs = boot_single_volume();
        fs.add_dir(ROOT_INO, "sub");

        assert_eq!(stat_path(1, ""), Err(-(Errno::ENOENT as i32)));
        assert_eq!(stat_path(1, "/nope"), Err(-(Errno::ENOENT as i32)));

        // a trailing slash names the directory itself
        let sd = stat_path(1, "/sub/").unwrap();
        assert!(is_dir(sd.st_mode));
        let sd = stat_path(1, "/").unwrap();
        assert_eq!(sd.st_ino, ROOT_INO);

        let long = format!("/{}", "a".repeat(PATH_MAX + 10));
        assert_eq!(stat_path(1, &long), Err(-(Errno::ENAMETOOLONG as i32)));
        vfsfinalize();
    }
}
