//! Module definitions for the rustvfs interface
//!
//! ## Interface Module
//!
//! All third-party crates and low-level primitives are imported only through
//! this module, keeping the dispatch core itself free of direct external
//! dependencies. The submodules cover errno reporting, the tri-state lock,
//! emulated client memory with capability grants, and in-memory pipes.

pub mod errnos;
mod mem;
mod misc;
mod pipe;
mod tristate;
pub use errnos::*;
pub use mem::*;
pub use misc::*;
pub use pipe::*;
pub use tristate::*;
