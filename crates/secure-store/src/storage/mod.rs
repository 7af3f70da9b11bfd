//! Persistence backends for the encrypted store
//!
//! This module provides two backends:
//! 1. In-memory map (tests, ephemeral profiles)
//! 2. JSON file per namespace (desktop/CLI)

mod traits;
mod memory;
mod file;

pub use traits::KeyValueBackend;
pub use memory::MemoryBackend;
pub use file::FileBackend;
