pub mod window;

// Re-export the splitter for external use
pub use window::{
    Chunk, ChunkSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, WindowError,
};
