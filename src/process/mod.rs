// ABOUTME: Process management: /proc access, discovery, supervision.
// ABOUTME: The runtime half of the core, next to the transaction engine.

pub mod discovery;
pub mod procfs;
pub mod supervisor;

pub use discovery::{is_running, process_set};
pub use procfs::Pid;
pub use supervisor::Supervisor;
