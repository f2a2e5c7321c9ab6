// File system related constants

// Imported into the calls files

pub const STARTINGFD: i32 = 0;
pub const MAXFD: i32 = 1024;

pub const F_OK: u32 = 0;
pub const X_OK: u32 = 1;
pub const W_OK: u32 = 2;
pub const R_OK: u32 = 4;

pub const O_RDONLY: i32 = 0o0;
pub const O_WRONLY: i32 = 0o1;
pub const O_RDWR: i32 = 0o2;
pub const O_RDWRFLAGS: i32 = 0o3;

pub const O_CREAT: i32 = 0o100;
pub const O_EXCL: i32 = 0o200;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;
pub const O_NONBLOCK: i32 = 0o4000;
pub const O_CLOEXEC: i32 = 0o2000000;

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

//Standard flag combinations
pub const S_IRWXA: u32 = 0o777;
pub const S_IRWXU: u32 = 0o700;
pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;

//File types for open/stat etc.
pub const S_IFBLK: u32 = 0o60000;
pub const S_IFCHR: u32 = 0o20000;
pub const S_IFDIR: u32 = 0o40000;
pub const S_IFIFO: u32 = 0o10000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFMT: u32 = 0o170000;

pub const PATH_MAX: usize = 1024;
pub const NAME_MAX: usize = 255;

pub const PIPE_CAPACITY: usize = 65536;

pub fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}
pub fn is_reg(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}
pub fn is_chr(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}
pub fn is_lnk(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

// major/minor packing for special files
pub fn major(rdev: u64) -> u32 {
    (rdev >> 32) as u32
}
pub fn minor(rdev: u64) -> u32 {
    rdev as u32
}
pub fn makedev(major: u32, minor: u32) -> u64 {
    ((major as u64) << 32) | minor as u64
}
