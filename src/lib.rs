#![allow(unused_imports)]
#![allow(clippy::needless_return, clippy::explicit_auto_deref, clippy::redundant_field_names)]

// interface and vfs are public because otherwise there isn't a great
// way to 'use' them from the demo binary or an external harness.
pub mod interface;
pub mod vfs;
pub mod tests;
