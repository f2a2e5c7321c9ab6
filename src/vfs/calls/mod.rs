// Call implementations, grouped the way clients think of them: file and
// path calls, pipe/select calls, and process-lifecycle calls. The dispatch
// table itself is the match below, one arm per call.

pub mod fs_calls;
pub mod fs_constants;
pub mod pipe_calls;
pub mod sys_calls;

use crate::vfs::dispatcher::CallResult;
use crate::vfs::message::VfsCall;
use crate::vfs::process::FsProcess;
use crate::vfs::worker::CallCtx;

pub fn execute(ctx: &CallCtx, proc_obj: &FsProcess, call: &VfsCall) -> CallResult {
    match call {
        VfsCall::Open { path, flags, mode } => proc_obj.open_syscall(ctx, path, *flags, *mode),
        VfsCall::Close { fd } => CallResult::Done(proc_obj.close_syscall(*fd)),
        VfsCall::Read { fd, buf, len } => proc_obj.read_syscall(ctx, *fd, *buf, *len),
        VfsCall::Write { fd, buf, len } => proc_obj.write_syscall(ctx, *fd, *buf, *len),
        VfsCall::Lseek { fd, offset, whence } => {
            CallResult::Done(proc_obj.lseek_syscall(*fd, *offset, *whence))
        }
        VfsCall::Stat { path, buf } => proc_obj.stat_syscall(ctx, path, *buf, false),
        VfsCall::Lstat { path, buf } => proc_obj.stat_syscall(ctx, path, *buf, true),
        VfsCall::Fstat { fd, buf } => CallResult::Done(proc_obj.fstat_syscall(*fd, *buf)),
        VfsCall::Readlink { path, buf, len } => proc_obj.readlink_syscall(ctx, path, *buf, *len),
        VfsCall::Unlink { path } => proc_obj.unlink_syscall(ctx, path),
        VfsCall::Rename { old, new } => proc_obj.rename_syscall(ctx, old, new),
        VfsCall::Mkdir { path, mode } => proc_obj.mkdir_syscall(ctx, path, *mode),
        VfsCall::Rmdir { path } => proc_obj.rmdir_syscall(ctx, path),
        VfsCall::Symlink { target, path } => proc_obj.symlink_syscall(ctx, target, path),
        VfsCall::Chdir { path } => proc_obj.chdir_syscall(ctx, path),
        VfsCall::Dup { fd } => CallResult::Done(proc_obj.dup_syscall(*fd)),
        VfsCall::Dup2 { fd, newfd } => CallResult::Done(proc_obj.dup2_syscall(ctx, *fd, *newfd)),
        VfsCall::Pipe { fds_buf } => CallResult::Done(proc_obj.pipe_syscall(*fds_buf)),
        VfsCall::Select {
            readfds,
            writefds,
            poll_only,
        } => proc_obj.select_syscall(readfds, writefds, *poll_only),
        VfsCall::Ioctl {
            fd,
            request,
            buf,
            len,
        } => proc_obj.ioctl_syscall(ctx, *fd, *request, *buf, *len),
        VfsCall::Mount {
            fs,
            dev,
            path,
            label,
            readonly,
            max_concurrent,
        } => CallResult::Done(proc_obj.mount_syscall(
            ctx,
            *fs,
            *dev,
            path,
            label,
            *readonly,
            *max_concurrent,
        )),
        VfsCall::Umount { path } => CallResult::Done(proc_obj.umount_syscall(ctx, path)),
    }
}
