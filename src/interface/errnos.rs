// Errno handling

use std::sync::OnceLock;

pub static VERBOSE: OnceLock<isize> = OnceLock::new();

/// POSIX error numbers the dispatch core can report. The discriminant is the
/// positive errno value; calls return its negation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EINTR = 4,
    EIO = 5,
    ENXIO = 6,
    EBADF = 9,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EBUSY = 16,
    EEXIST = 17,
    EXDEV = 18,
    ENODEV = 19,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    ENFILE = 23,
    EMFILE = 24,
    ENOSPC = 28,
    ESPIPE = 29,
    EROFS = 30,
    EPIPE = 32,
    EDEADLK = 35,
    ENAMETOOLONG = 36,
    ENOTEMPTY = 39,
    ELOOP = 40,
    EOVERFLOW = 75,
}

impl Errno {
    pub fn from_discriminant(discriminant: i32) -> Result<Self, ()> {
        match discriminant {
            1 => Ok(Errno::EPERM),
            2 => Ok(Errno::ENOENT),
            3 => Ok(Errno::ESRCH),
            4 => Ok(Errno::EINTR),
            5 => Ok(Errno::EIO),
            6 => Ok(Errno::ENXIO),
            9 => Ok(Errno::EBADF),
            11 => Ok(Errno::EAGAIN),
            12 => Ok(Errno::ENOMEM),
            13 => Ok(Errno::EACCES),
            14 => Ok(Errno::EFAULT),
            16 => Ok(Errno::EBUSY),
            17 => Ok(Errno::EEXIST),
            18 => Ok(Errno::EXDEV),
            19 => Ok(Errno::ENODEV),
            20 => Ok(Errno::ENOTDIR),
            21 => Ok(Errno::EISDIR),
            22 => Ok(Errno::EINVAL),
            23 => Ok(Errno::ENFILE),
            24 => Ok(Errno::EMFILE),
            28 => Ok(Errno::ENOSPC),
            29 => Ok(Errno::ESPIPE),
            30 => Ok(Errno::EROFS),
            32 => Ok(Errno::EPIPE),
            35 => Ok(Errno::EDEADLK),
            36 => Ok(Errno::ENAMETOOLONG),
            39 => Ok(Errno::ENOTEMPTY),
            40 => Ok(Errno::ELOOP),
            75 => Ok(Errno::EOVERFLOW),
            _ => Err(()),
        }
    }
}

/// Builds the negative return value for a failed call, tracing it when the
/// verbosity knob asks for that.
pub fn syscall_error(e: Errno, syscall: &str, message: &str) -> i32 {
    if *VERBOSE.get_or_init(|| 0) > 0 {
        let msg = format!("Error in syscall: {} - {:?}: {}", syscall, e, message);
        crate::interface::log_to_stderr(&msg);
    }
    log::debug!("{} failed with {:?}: {}", syscall, e, message);
    -(e as i32)
}
