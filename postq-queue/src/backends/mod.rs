//! Queue storage implementations
//!
//! - `memory`: in-process queue for tests and throwaway runs
//! - `file`: one pair of files per message in a directory

pub mod file;
pub mod memory;

pub use file::FileMessageStore;
pub use memory::MemoryMessageStore;
