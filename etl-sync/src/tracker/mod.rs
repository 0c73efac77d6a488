//! File level change detection.
//!
//! A file counts as changed when it has not been processed before or when its size or
//! modification time differ from what was recorded when it was last processed. Only
//! metadata is compared, file contents are never read here.

mod base;
mod change;
mod fs;
mod memory;
mod postgres;

pub use base::{FileStat, FileStatProvider, FileState, FileStateStore};
pub use change::FileChangeTracker;
pub use fs::LocalFileStatProvider;
pub use memory::MemoryFileStateStore;
pub use postgres::PostgresFileStateStore;
