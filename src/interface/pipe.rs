//! In-memory pipe implementation for the VFS interface
//!
//! ## Pipe Module
//!
//! This module provides the byte channel behind pipe descriptors. The pipe
//! itself never blocks a thread: an operation that cannot make progress
//! reports WouldBlock and the calling layer decides between EAGAIN and
//! parking the client in the suspend/revive manager.

use parking_lot::Mutex;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::cmp::min;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

const O_RDONLY: i32 = 0o0;
const O_WRONLY: i32 = 0o1;
const O_RDWRFLAGS: i32 = 0o3;

// Linux considers a pipe writable while at least a page of space remains,
// which is also the atomicity bound for small writes (PIPE_BUF).
const PAGE_SIZE: usize = 4096;

/// Outcome of one pipe transfer attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum PipeResult {
    /// Bytes moved.
    Done(usize),
    /// Read side: no data and no writers remain.
    Eof,
    /// No progress possible right now; caller suspends or returns EAGAIN.
    WouldBlock,
    /// Write side: all read references are gone (EPIPE to the caller).
    Broken,
}

pub fn new_pipe(size: usize) -> EmulatedPipe {
    EmulatedPipe::new_with_capacity(size)
}

/// # Description
/// In-memory pipe struct
///
/// # Fields
///
/// * `write_end` - Reference to the write end of the pipe.
/// * `read_end` - Reference to the read end of the pipe.
/// * `refcount_write` - Count of open write references.
/// * `refcount_read` - Count of open read references.
/// * `eof` - Flag signifying the pipe has finished being written to.
/// * `size` - Size of pipe buffer in bytes.
#[derive(Clone)]
pub struct EmulatedPipe {
    write_end: Arc<Mutex<Producer<u8>>>,
    read_end: Arc<Mutex<Consumer<u8>>>,
    pub refcount_write: Arc<AtomicU32>,
    pub refcount_read: Arc<AtomicU32>,
    eof: Arc<AtomicBool>,
    size: usize,
}

impl EmulatedPipe {
    pub fn new_with_capacity(size: usize) -> EmulatedPipe {
        let rb = RingBuffer::<u8>::new(size);
        let (prod, cons) = rb.split();
        EmulatedPipe {
            write_end: Arc::new(Mutex::new(prod)),
            read_end: Arc::new(Mutex::new(cons)),
            refcount_write: Arc::new(AtomicU32::new(1)),
            refcount_read: Arc::new(AtomicU32::new(1)),
            eof: Arc::new(AtomicBool::new(false)),
            size: size,
        }
    }

    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
    }

    pub fn get_write_ref(&self) -> u32 {
        self.refcount_write.load(Ordering::Relaxed)
    }

    pub fn get_read_ref(&self) -> u32 {
        self.refcount_read.load(Ordering::Relaxed)
    }

    /// Increase references to the write or read end, chosen by the access
    /// mode bits of the descriptor being duplicated.
    pub fn incr_ref(&self, flags: i32) {
        if (flags & O_RDWRFLAGS) == O_RDONLY {
            self.refcount_read.fetch_add(1, Ordering::Relaxed);
        }
        if (flags & O_RDWRFLAGS) == O_WRONLY {
            self.refcount_write.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn decr_ref(&self, flags: i32) {
        if (flags & O_RDWRFLAGS) == O_RDONLY {
            let prev = self.refcount_read.fetch_sub(1, Ordering::Relaxed);
            assert!(prev > 0, "pipe read refcount went negative");
        }
        if (flags & O_RDWRFLAGS) == O_WRONLY {
            let prev = self.refcount_write.fetch_sub(1, Ordering::Relaxed);
            assert!(prev > 0, "pipe write refcount went negative");
            if prev == 1 {
                self.set_eof();
            }
        }
    }

    /// Checks if the pipe is currently ready for reading, used by select/poll.
    pub fn check_select_read(&self) -> bool {
        let read_end = self.read_end.lock();
        read_end.len() > 0 || self.eof.load(Ordering::SeqCst)
    }

    /// Checks if the pipe is currently ready for writing, used by select/poll.
    pub fn check_select_write(&self) -> bool {
        let write_end = self.write_end.lock();
        write_end.remaining() >= PAGE_SIZE
    }

    /// ### Description
    ///
    /// Writes from `buf` into the ring buffer. Writes wait for a free page
    /// so that small writes stay atomic; with less than a page free and
    /// nothing yet written the attempt reports WouldBlock.
    ///
    /// ### Returns
    ///
    /// Done(n) with the bytes moved, Broken once all read references are
    /// closed, or WouldBlock.
    pub fn write_to_pipe(&self, buf: &[u8]) -> PipeResult {
        if self.get_read_ref() == 0 {
            return PipeResult::Broken;
        }

        let mut write_end = self.write_end.lock();
        let remaining = write_end.remaining();
        if remaining < PAGE_SIZE && buf.len() > remaining {
            return PipeResult::WouldBlock;
        }

        let bytes_to_write = min(buf.len(), remaining);
        write_end.push_slice(&buf[..bytes_to_write]);
        PipeResult::Done(bytes_to_write)
    }

    /// ### Description
    ///
    /// Reads up to `buf.len()` bytes out of the ring buffer. An empty pipe
    /// reports Eof once every write reference is gone, WouldBlock otherwise.
    pub fn read_from_pipe(&self, buf: &mut [u8]) -> PipeResult {
        let mut read_end = self.read_end.lock();
        let pipe_space = read_end.len();
        if pipe_space == 0 {
            if self.eof.load(Ordering::SeqCst) || self.get_write_ref() == 0 {
                return PipeResult::Eof;
            }
            return PipeResult::WouldBlock;
        }

        let bytes_to_read = min(buf.len(), pipe_space);
        read_end.pop_slice(&mut buf[0..bytes_to_read]);
        PipeResult::Done(bytes_to_read)
    }
}

impl fmt::Debug for EmulatedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedPipe")
            .field("refcount read", &self.refcount_read)
            .field("refcount write", &self.refcount_write)
            .field("eof", &self.eof)
            .finish()
    }
}
