//! Formatting of retrieved chunks for injection into a chat turn.

use super::scorer::ScoredResult;

pub const CONTEXT_HEADER: &str = "[Memory Retrieval Results]";

/// Render results as a prompt block; empty results render as an empty string.
pub fn render_context(results: &[ScoredResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from(CONTEXT_HEADER);
    for result in results {
        out.push_str(&format!("\n- ({:.4}) {}", result.score, result.chunk_text.trim()));
    }
    out
}
