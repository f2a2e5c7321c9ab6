//! The dispatch core proper: tables, lookup, transport, workers and the
//! call implementations, plus the in-process servers used to exercise them.

pub mod calls;
pub mod dispatcher;
pub mod filedesc;
pub mod lookup;
pub mod memfs;
pub mod message;
pub mod mount;
pub mod process;
pub mod suspend;
pub mod transport;
pub mod vnode;
pub mod worker;
