//! Fixed-size, overlapping windows over a memory document.
//!
//! A memory document is free text with no structure the indexer can rely on, so
//! it is cut into consecutive sliding windows of `size` characters. Each window
//! starts `size - overlap` characters after the previous one, which means any
//! phrase shorter than `overlap` that straddles a boundary still appears whole in
//! at least one chunk.
//!
//! Lengths and offsets are counted in characters (Unicode scalar values), never
//! bytes, so a window can't cut a UTF-8 sequence in half. For ASCII text the two
//! are the same.
//!
//! # Example
//!
//! ```
//! use memdex_context::window::ChunkSplitter;
//!
//! let text = "a".repeat(600);
//! let splitter = ChunkSplitter::new(256, 32).unwrap();
//! let chunks = splitter.split(&text);
//!
//! let spans: Vec<(usize, usize)> = chunks
//!     .iter()
//!     .map(|c| (c.start_offset, c.end_offset))
//!     .collect();
//! assert_eq!(spans, vec![(0, 256), (224, 480), (448, 600)]);
//! ```
use serde::Serialize;

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Default number of characters shared by adjacent windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 32;

/// Rejected window configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("chunk size must be greater than zero")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// One window of the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position of this chunk in the sequence (0-indexed).
    pub sequence: usize,
    /// Character offset of the first character, inclusive.
    pub start_offset: usize,
    /// Character offset one past the last character.
    pub end_offset: usize,
    /// The text covered by `start_offset..end_offset`.
    pub text: String,
}

impl Chunk {
    /// Number of characters in this chunk.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Splits text into overlapping windows.
///
/// The configuration is validated once in [`ChunkSplitter::new`]; splitting
/// itself can't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    size: usize,
    overlap: usize,
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkSplitter {
    /// Creates a splitter, rejecting `size == 0` and `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, WindowError> {
        if size == 0 {
            return Err(WindowError::ZeroSize);
        }
        if overlap >= size {
            return Err(WindowError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of two adjacent windows.
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Splits `text` into windows.
    ///
    /// Empty text yields no chunks. Text no longer than one window yields a single
    /// chunk equal to the text. Otherwise windows advance by [`step`](Self::step)
    /// until one reaches the end of the text; that last window is truncated to the
    /// remaining tail and never padded.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte position of every character boundary, including the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = boundaries.len() - 1;

        let mut chunks = Vec::with_capacity(char_count / self.step() + 1);
        let mut start = 0;
        loop {
            let end = (start + self.size).min(char_count);
            chunks.push(Chunk {
                sequence: chunks.len(),
                start_offset: start,
                end_offset: end,
                text: text[boundaries[start]..boundaries[end]].to_string(),
            });
            if end == char_count {
                break;
            }
            start += self.step();
        }
        chunks
    }
}
