// Pipe and readiness calls. The pipe buffer itself never blocks; when no
// progress is possible the call either fails with EAGAIN (O_NONBLOCK) or
// parks in the pipe-blocked state and is replayed from the top on the next
// pipe event, re-checking availability rather than assuming it.

use crate::interface::{syscall_error, Errno, EmulatedPipe, PipeResult, RustRfc};
use crate::vfs::calls::fs_constants::*;
use crate::vfs::dispatcher::CallResult;
use crate::vfs::filedesc::{FdEntry, Filp, FilpObj};
use crate::vfs::process::FsProcess;
use crate::vfs::suspend::{self, SuspendKind};

impl FsProcess {
    /// Creates a pipe and writes the two new descriptor numbers (read end
    /// first) into client memory at `fds_buf`.
    pub fn pipe_syscall(&self, fds_buf: usize) -> i32 {
        let pipe = crate::interface::new_pipe(PIPE_CAPACITY);
        let rd = self.get_next_fd(
            STARTINGFD,
            FdEntry {
                filp: RustRfc::new(Filp::new(None, FilpObj::Pipe(pipe.clone()), O_RDONLY)),
                cloexec: false,
            },
        );
        if rd < 0 {
            return rd;
        }
        let wr = self.get_next_fd(
            STARTINGFD,
            FdEntry {
                filp: RustRfc::new(Filp::new(None, FilpObj::Pipe(pipe), O_WRONLY)),
                cloexec: false,
            },
        );
        if wr < 0 {
            self.close_fd_quiet(rd);
            return wr;
        }
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&rd.to_le_bytes());
        out.extend_from_slice(&wr.to_le_bytes());
        if self.mem.write().write_bytes(fds_buf, &out).is_err() {
            self.close_fd_quiet(rd);
            self.close_fd_quiet(wr);
            return syscall_error(Errno::EFAULT, "pipe", "descriptor buffer outside client memory");
        }
        0
    }

    /// Readiness poll over pipe descriptors; everything that is not a pipe
    /// counts as always ready. With nothing ready and `poll_only` unset the
    /// caller parks until the next pipe event.
    pub fn select_syscall(&self, readfds: &[i32], writefds: &[i32], poll_only: bool) -> CallResult {
        let mut ready = 0;
        for fd in readfds {
            let fde = match self.get_fd(*fd) {
                Some(f) => f,
                None => {
                    return CallResult::Done(syscall_error(Errno::EBADF, "select", "invalid file descriptor"))
                }
            };
            match &fde.filp.obj {
                FilpObj::Pipe(p) => {
                    if p.check_select_read() {
                        ready += 1;
                    }
                }
                _ => ready += 1,
            }
        }
        for fd in writefds {
            let fde = match self.get_fd(*fd) {
                Some(f) => f,
                None => {
                    return CallResult::Done(syscall_error(Errno::EBADF, "select", "invalid file descriptor"))
                }
            };
            match &fde.filp.obj {
                FilpObj::Pipe(p) => {
                    if p.check_select_write() {
                        ready += 1;
                    }
                }
                _ => ready += 1,
            }
        }
        if ready > 0 || poll_only {
            CallResult::Done(ready)
        } else {
            CallResult::Suspend(SuspendKind::Select)
        }
    }
}

pub fn pipe_read(
    proc_obj: &FsProcess,
    pipe: &EmulatedPipe,
    filp: &Filp,
    buf: usize,
    len: usize,
) -> CallResult {
    // check the destination before any byte leaves the pipe; pipe data
    // consumed into a bad buffer would be lost
    if !proc_obj.mem.read().valid_range(buf, len) {
        return CallResult::Done(syscall_error(Errno::EFAULT, "read", "buffer outside client memory"));
    }
    let mut tmp = vec![0u8; len];
    match pipe.read_from_pipe(&mut tmp) {
        PipeResult::Done(n) => {
            if proc_obj.mem.write().write_bytes(buf, &tmp[..n]).is_err() {
                return CallResult::Done(syscall_error(Errno::EFAULT, "read", "buffer outside client memory"));
            }
            // room freed: writers and selectors get another look
            suspend::revive_pipe_waiters();
            suspend::revive_select_waiters();
            CallResult::Done(n as i32)
        }
        PipeResult::Eof => CallResult::Done(0),
        PipeResult::WouldBlock => {
            if filp.nonblocking() {
                CallResult::Done(syscall_error(Errno::EAGAIN, "read", "pipe is empty"))
            } else {
                CallResult::Suspend(SuspendKind::Pipe)
            }
        }
        PipeResult::Broken => {
            CallResult::Done(syscall_error(Errno::EIO, "read", "pipe in impossible state"))
        }
    }
}

pub fn pipe_write(
    proc_obj: &FsProcess,
    pipe: &EmulatedPipe,
    filp: &Filp,
    buf: usize,
    len: usize,
) -> CallResult {
    let data = match proc_obj.mem.write().read_bytes(buf, len) {
        Ok(d) => d,
        Err(_) => {
            return CallResult::Done(syscall_error(Errno::EFAULT, "write", "buffer outside client memory"))
        }
    };
    match pipe.write_to_pipe(&data) {
        PipeResult::Done(n) => {
            suspend::revive_pipe_waiters();
            suspend::revive_select_waiters();
            CallResult::Done(n as i32)
        }
        PipeResult::Broken => CallResult::Done(syscall_error(
            Errno::EPIPE,
            "write",
            "all read ends of the pipe are closed",
        )),
        PipeResult::WouldBlock => {
            if filp.nonblocking() {
                CallResult::Done(syscall_error(Errno::EAGAIN, "write", "pipe is full"))
            } else {
                CallResult::Suspend(SuspendKind::Pipe)
            }
        }
        PipeResult::Eof => {
            CallResult::Done(syscall_error(Errno::EIO, "write", "pipe in impossible state"))
        }
    }
}
