mod block_cache;
mod file_table;
mod seq_tracker;

pub use block_cache::{BlockCache, CacheStats};
pub use file_table::{BlockRef, FileEntry, FileFlags, FileHandle, FileTable};
pub use seq_tracker::{is_newer, next_seq, SequenceTracker};
