use rustvfs::vfs::calls::fs_constants::{O_CREAT, O_RDWR};
use rustvfs::vfs::calls::sys_calls;
use rustvfs::vfs::dispatcher::{ctl_call, vfs_call, vfsfinalize, vfsinit, VfsConfig};
use rustvfs::vfs::memfs;
use rustvfs::vfs::message::{CtlCall, CtlResult, Endpoint, VfsCall};
use rustvfs::vfs::process::proctable_getref;

// Small demonstration run: bring the core up against one in-memory volume,
// touch a few calls, dump the table snapshot, and shut down.
fn main() {
    env_logger::init();
    vfsinit(VfsConfig::default());

    let fs = memfs::spawn_memfs(Endpoint(100));
    sys_calls::init_proc(1);
    let r = vfs_call(
        1,
        VfsCall::Mount {
            fs: fs.endpoint,
            dev: 1,
            path: "/".to_string(),
            label: "root".to_string(),
            readonly: false,
            max_concurrent: 8,
        },
    );
    assert_eq!(r, 0, "root mount failed: {}", r);

    let fd = vfs_call(
        1,
        VfsCall::Open {
            path: "/hello.txt".to_string(),
            flags: O_CREAT | O_RDWR,
            mode: 0o644,
        },
    );
    let msg = b"hello from the dispatch core\n";
    proctable_getref(1)
        .unwrap()
        .mem
        .write()
        .write_bytes(0, msg)
        .expect("demo buffer is inside the process image");
    let n = vfs_call(
        1,
        VfsCall::Write {
            fd,
            buf: 0,
            len: msg.len(),
        },
    );
    println!("wrote {} bytes to fd {}", n, fd);
    vfs_call(1, VfsCall::Close { fd });

    if let CtlResult::Snapshot(json) = ctl_call(CtlCall::Snapshot) {
        println!("{}", json);
    }

    ctl_call(CtlCall::Exit { pid: 1 });
    vfsfinalize();
}
