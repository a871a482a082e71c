//! Sliding-window text chunker.
//!
//! Splits document text into overlapping fixed-size [`Chunk`]s. Each chunk
//! keeps its document's origin plus its char offset into the document, so a
//! retrieved passage can always be traced back to where it came from.
//!
//! # Algorithm
//!
//! 1. Measure the text in chars (never bytes, so no UTF-8 sequence is split).
//! 2. Emit the window `[start, start + size)`, clipped to the end of text.
//! 3. Advance `start` by `size - overlap` and repeat until a window reaches
//!    the end of text. The final window may be shorter than `size`; it is
//!    still emitted and never padded.
//! 4. Empty text yields no chunks.
//!
//! Chunk ids come from a [`Chunker`] and increase globally across every
//! document processed in one ingestion run.
//!
//! # Example
//!
//! ```rust
//! use profile_rag_core::chunk::{ChunkPolicy, Chunker};
//! use profile_rag_core::models::{Document, OriginRef};
//!
//! let mut chunker = Chunker::new(ChunkPolicy::new(10, 4).unwrap());
//! let doc = Document::new("abcdefghijklmnop", OriginRef::file("notes.txt"));
//! let chunks = chunker.chunk(&doc);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].start_offset, 6);
//! assert_eq!(chunks[1].text, "ghijklmnop");
//! ```

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Window size and overlap, in chars. Invariant: `0 <= overlap < size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    size: usize,
    overlap: usize,
}

impl ChunkPolicy {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::InvalidChunkPolicy("size must be > 0".into()));
        }
        if overlap >= size {
            return Err(RagError::InvalidChunkPolicy(format!(
                "overlap ({}) must be smaller than size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.size - self.overlap
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split one document into windows, numbering chunks from `first_id`.
pub fn chunk_document(doc: &Document, policy: ChunkPolicy, first_id: u64) -> Vec<Chunk> {
    // Byte offset of every char boundary, plus the end of text.
    let bounds: Vec<usize> = doc
        .text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(doc.text.len()))
        .collect();
    let total = bounds.len() - 1;

    let mut chunks = Vec::new();
    if total == 0 {
        return chunks;
    }

    let mut start = 0usize;
    let mut id = first_id;
    loop {
        let end = (start + policy.size).min(total);
        chunks.push(Chunk {
            id,
            text: doc.text[bounds[start]..bounds[end]].to_string(),
            origin: doc.origin.clone(),
            start_offset: start,
            length: end - start,
        });
        id += 1;
        if end == total {
            break;
        }
        start += policy.step();
    }

    chunks
}

/// Stateful chunker that assigns ids across all documents of one run.
#[derive(Debug, Clone)]
pub struct Chunker {
    policy: ChunkPolicy,
    next_id: u64,
}

impl Chunker {
    pub fn new(policy: ChunkPolicy) -> Self {
        Self { policy, next_id: 0 }
    }

    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// The id the next emitted chunk will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn chunk(&mut self, doc: &Document) -> Vec<Chunk> {
        let chunks = chunk_document(doc, self.policy, self.next_id);
        self.next_id += chunks.len() as u64;
        chunks
    }

    /// Chunk documents in order; ids are dense over the whole sequence.
    pub fn chunk_all(&mut self, docs: &[Document]) -> Vec<Chunk> {
        docs.iter().flat_map(|doc| self.chunk(doc)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OriginRef;

    fn doc(text: &str) -> Document {
        Document::new(text, OriginRef::file("test.txt"))
    }

    /// Undo the overlap between consecutive chunks of one document.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for c in chunks {
            let skip = covered.saturating_sub(c.start_offset);
            out.extend(c.text.chars().skip(skip));
            covered = c.start_offset + c.length;
        }
        out
    }

    #[test]
    fn test_policy_validation() {
        assert!(ChunkPolicy::new(0, 0).is_err());
        assert!(ChunkPolicy::new(10, 10).is_err());
        assert!(ChunkPolicy::new(10, 11).is_err());
        assert!(ChunkPolicy::new(10, 0).is_ok());
        assert_eq!(ChunkPolicy::default().size(), 1000);
        assert_eq!(ChunkPolicy::default().overlap(), 200);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let chunks = chunk_document(&doc(""), ChunkPolicy::default(), 0);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Qudus is an ML engineer.";
        let chunks = chunk_document(&doc(text), ChunkPolicy::default(), 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 7);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].length, text.len());
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let text = "x".repeat(1000);
        let chunks = chunk_document(&doc(&text), ChunkPolicy::default(), 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_2500_chars_three_windows() {
        let text: String = "abcdefghij".repeat(250);
        let chunks = chunk_document(&doc(&text), ChunkPolicy::default(), 0);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(starts, vec![0, 800, 1600]);
        assert_eq!(chunks[0].length, 1000);
        assert_eq!(chunks[1].length, 1000);
        assert_eq!(chunks[2].length, 900);
    }

    #[test]
    fn test_overlap_and_reconstruction() {
        let text: String = (0..997).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for (size, overlap) in [(100, 0), (100, 30), (64, 63), (7, 3), (1000, 200)] {
            let policy = ChunkPolicy::new(size, overlap).unwrap();
            let chunks = chunk_document(&doc(&text), policy, 0);
            for pair in chunks.windows(2) {
                let prev_end = pair[0].start_offset + pair[0].length;
                assert_eq!(prev_end - pair[1].start_offset, overlap);
                let tail: String = pair[0].text.chars().skip(size - overlap).collect();
                let head: String = pair[1].text.chars().take(overlap).collect();
                assert_eq!(tail, head);
            }
            assert_eq!(reconstruct(&chunks), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_length_matches_text() {
        let text = "héllo wörld ✓ ".repeat(40);
        let chunks = chunk_document(&doc(&text), ChunkPolicy::new(25, 5).unwrap(), 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.text.is_empty());
            assert_eq!(c.length, c.text.chars().count());
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_ids_global_across_documents() {
        let mut chunker = Chunker::new(ChunkPolicy::new(10, 2).unwrap());
        let docs = vec![doc("short"), doc(""), doc(&"y".repeat(25))];
        let chunks = chunker.chunk_all(&docs);
        let ids: Vec<u64> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, (0..chunks.len() as u64).collect::<Vec<_>>());
        assert_eq!(chunker.next_id(), chunks.len() as u64);
        assert_eq!(chunks[0].text, "short");
        assert_eq!(chunks[1].start_offset, 0);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta".repeat(30);
        let a = Chunker::new(ChunkPolicy::new(50, 10).unwrap()).chunk(&doc(&text));
        let b = Chunker::new(ChunkPolicy::new(50, 10).unwrap()).chunk(&doc(&text));
        assert_eq!(a, b);
    }
}
