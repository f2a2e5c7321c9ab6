// Misc definitions for the interface
// Aliases, timestamps, logging helpers

use std::time::{SystemTime, UNIX_EPOCH};

pub use std::sync::Arc as RustRfc;
pub use std::sync::LazyLock as RustLazyGlobal;

pub use parking_lot::{Condvar as RustCondvar, Mutex as RustMutex, RwLock as RustLock};

pub use dashmap::{
    mapref::entry::Entry as RustHashEntry, DashMap as RustHashMap, DashSet as RustHashSet,
};

pub use std::sync::atomic::{
    AtomicBool as RustAtomicBool, AtomicI32 as RustAtomicI32, AtomicU16 as RustAtomicU16,
    AtomicU32 as RustAtomicU32, AtomicU64 as RustAtomicU64, AtomicUsize as RustAtomicUsize,
    Ordering as RustAtomicOrdering,
};

pub use std::collections::VecDeque as RustDeque;

pub fn new_hashmap<K: std::hash::Hash + Eq, V>() -> RustHashMap<K, V> {
    RustHashMap::new()
}

// Print text to stdout
pub fn log_to_stdout(s: &str) {
    print!("{}", s);
}

// Print text to stderr
pub fn log_to_stderr(s: &str) {
    eprintln!("{}", s);
}

pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
