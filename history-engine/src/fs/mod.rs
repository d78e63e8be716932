//! Filesystem helpers: bounded I/O and filtered tree walks.

pub mod io;
pub mod walker;

pub use io::{Access, IoPolicy};
pub use walker::{walk_directory, FileInfo, PathFilter};
