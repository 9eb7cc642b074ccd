//! Splitting oversized input into overlapping windows.
//!
//! Sizes are measured in Unicode scalar values, so every cut lands on a char
//! boundary. Non-final windows prefer to end on a sentence, then a line, then a
//! word boundary, as long as that keeps more than half the window.

use serde::{Deserialize, Serialize};

/// Default window size in characters
pub const DEFAULT_MAX_INPUT_SIZE: usize = 4000;
/// Default overlap between consecutive windows
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Size of `text` as the chunker measures it.
pub fn estimate_size(text: &str) -> usize {
    text.chars().count()
}

/// Window size and overlap for chunk planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkLimits {
    pub max_input_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkLimits {
    pub fn new(max_input_size: usize, chunk_overlap: usize) -> Self {
        Self {
            max_input_size,
            chunk_overlap,
        }
        .clamped()
    }

    /// Window of at least one char, overlap strictly below half the window.
    pub fn clamped(self) -> Self {
        let max_input_size = self.max_input_size.max(1);
        let chunk_overlap = self.chunk_overlap.min((max_input_size - 1) / 2);
        Self {
            max_input_size,
            chunk_overlap,
        }
    }

    /// Whether `text` fits in a single window.
    pub fn fits(&self, text: &str) -> bool {
        estimate_size(text) <= self.max_input_size.max(1)
    }
}

/// One window of the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub is_last: bool,
}

/// Ordered chunks covering the whole input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// Effective overlap after clamping
    pub overlap: usize,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Split `text` into windows of at most `limits.max_input_size` chars.
///
/// Text that fits yields a single chunk (an empty input yields one empty
/// chunk).
pub fn plan_chunks(text: &str, limits: ChunkLimits) -> ChunkPlan {
    let limits = limits.clamped();
    let window = limits.max_input_size;
    let overlap = limits.chunk_overlap;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(total);
        if end == total {
            chunks.push(Chunk {
                text: chars[start..end].iter().collect(),
                index: chunks.len(),
                is_last: true,
            });
            break;
        }

        let cut = find_break(&chars, start, end).unwrap_or(end);
        chunks.push(Chunk {
            text: chars[start..cut].iter().collect(),
            index: chunks.len(),
            is_last: false,
        });
        start = cut - overlap;
    }

    tracing::debug!(
        "[chunker] Planned {} chunk(s) for {} chars (window {}, overlap {})",
        chunks.len(),
        total,
        window,
        overlap
    );

    ChunkPlan { chunks, overlap }
}

/// Find the best cut in `chars[start..end]`, returned as the exclusive end of
/// the chunk. Only cuts that keep more than half the window qualify.
fn find_break(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let floor = start + (end - start) / 2;
    let qualifies = |cut: usize| cut > floor;

    // Sentence end: terminal punctuation followed by whitespace
    let sentence = (start..end.saturating_sub(1))
        .rev()
        .find(|&i| matches!(chars[i], '.' | '!' | '?') && chars[i + 1].is_whitespace())
        .map(|i| i + 1);
    if let Some(cut) = sentence.filter(|&c| qualifies(c)) {
        return Some(cut);
    }

    let line = (start..end).rev().find(|&i| chars[i] == '\n').map(|i| i + 1);
    if let Some(cut) = line.filter(|&c| qualifies(c)) {
        return Some(cut);
    }

    (start..end)
        .rev()
        .find(|&i| chars[i].is_whitespace())
        .map(|i| i + 1)
        .filter(|&c| qualifies(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Undo the overlap: first chunk whole, later chunks minus their prefix.
    fn reassemble(plan: &ChunkPlan) -> String {
        let mut out = String::new();
        for chunk in &plan.chunks {
            if chunk.index == 0 {
                out.push_str(&chunk.text);
            } else {
                out.extend(chunk.text.chars().skip(plan.overlap));
            }
        }
        out
    }

    #[test]
    fn short_text_is_one_chunk() {
        let plan = plan_chunks("Hello world.", ChunkLimits::default());
        assert_eq!(plan.len(), 1);
        assert!(plan.chunks[0].is_last);
        assert_eq!(plan.chunks[0].text, "Hello world.");
    }

    #[test]
    fn empty_text_is_one_empty_chunk() {
        let plan = plan_chunks("", ChunkLimits::default());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.chunks[0].text, "");
    }

    #[test]
    fn prefers_sentence_boundary_over_whitespace() {
        // Sentence ends at char 70, a plain space sits at char 90
        let text = format!("{}. {} {}", "a".repeat(69), "b".repeat(18), "c".repeat(200));
        let plan = plan_chunks(&text, ChunkLimits::new(100, 0));
        assert_eq!(plan.chunks[0].text, format!("{}.", "a".repeat(69)));
    }

    #[test]
    fn prefers_line_break_over_whitespace() {
        let text = format!("{}\n{} {}", "a".repeat(60), "b".repeat(30), "c".repeat(200));
        let plan = plan_chunks(&text, ChunkLimits::new(100, 0));
        assert_eq!(plan.chunks[0].text, format!("{}\n", "a".repeat(60)));
    }

    #[test]
    fn ignores_breaks_in_first_half() {
        // Only break is at 20%, so the window is cut hard at its edge
        let text = format!("{}. {}", "a".repeat(19), "b".repeat(300));
        let plan = plan_chunks(&text, ChunkLimits::new(100, 0));
        assert_eq!(estimate_size(&plan.chunks[0].text), 100);
    }

    #[test]
    fn next_window_starts_overlap_before_cut() {
        let text = "x".repeat(250);
        let plan = plan_chunks(&text, ChunkLimits::new(100, 10));
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.overlap, 10);
        assert_eq!(reassemble(&plan), text);
    }

    #[test]
    fn overlap_is_clamped_below_half_window() {
        let limits = ChunkLimits::new(10, 50);
        assert_eq!(limits.chunk_overlap, 4);
        assert_eq!(ChunkLimits::new(0, 0).max_input_size, 1);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "日本語のテキスト。".repeat(50);
        let plan = plan_chunks(&text, ChunkLimits::new(40, 5));
        assert!(plan.len() > 1);
        for chunk in &plan.chunks {
            assert!(estimate_size(&chunk.text) <= 40);
        }
        assert_eq!(reassemble(&plan), text);
    }

    #[test]
    fn only_final_chunk_is_last() {
        let plan = plan_chunks(&"word ".repeat(500), ChunkLimits::new(300, 20));
        let (last, rest) = plan.chunks.split_last().unwrap();
        assert!(last.is_last);
        assert!(rest.iter().all(|c| !c.is_last));
        for (i, chunk) in plan.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }
}
