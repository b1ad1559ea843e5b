//! Recursive, separator-priority text chunking.
//!
//! Text is first cut into contiguous pieces no longer than the target size,
//! trying each separator in priority order and only descending to the next
//! one for pieces that are still too long (the last resort is a raw cut on a
//! character boundary). Pieces are then packed greedily into windows, and
//! consecutive windows share a literal tail of the previous window as
//! overlap. Every window is a byte range of the source, so line numbers are
//! exact and the text is recoverable by dropping each window's overlap.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::Chunk;

const STREAM_BLOCK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkProfile {
    /// Upper bound on window length, in bytes.
    pub chunk_size: usize,
    /// Upper bound on text shared with the previous window, in bytes.
    pub overlap: usize,
    /// Split points in priority order. An empty string means a raw cut.
    pub separators: Vec<String>,
}

impl ChunkProfile {
    pub fn code() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 200,
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn prose() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 300,
            separators: ["\n\n", "\n", ". ", "! ", "? ", "; ", " ", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be positive".into());
        }
        if self.overlap >= self.chunk_size {
            return Err(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            ));
        }
        Ok(())
    }
}

/// One window of the source text with its byte range and 1-based lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    profile: ChunkProfile,
    streaming_threshold: u64,
}

impl Chunker {
    pub fn new(profile: ChunkProfile, streaming_threshold: u64) -> Self {
        Self { profile, streaming_threshold }
    }

    pub fn profile(&self) -> &ChunkProfile {
        &self.profile
    }

    pub fn windows<'a>(&self, text: &'a str) -> Vec<Window<'a>> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        split_range(text, 0, text.len(), &self.profile.separators, self.profile.chunk_size, &mut pieces);
        let newlines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();

        pack(&pieces, self.profile.chunk_size, self.profile.overlap)
            .into_iter()
            .filter(|&(s, e)| !text[s..e].trim().is_empty())
            .map(|(start, end)| Window {
                text: &text[start..end],
                start,
                end,
                start_line: line_of(&newlines, start),
                end_line: line_of(&newlines, end - 1),
            })
            .collect()
    }

    pub fn chunk_text(&self, source_path: &str, text: &str, content_hash: &str) -> Vec<Chunk> {
        self.windows(text)
            .into_iter()
            .enumerate()
            .map(|(i, w)| Chunk {
                id: Chunk::make_id(source_path, content_hash, i),
                source_path: source_path.to_string(),
                text: w.text.to_string(),
                start_line: w.start_line,
                end_line: w.end_line,
                content_hash: content_hash.to_string(),
            })
            .collect()
    }

    /// Chunks a file from disk. Symlinks are refused; files above the
    /// streaming threshold are read in bounded segments.
    pub fn chunk_file(&self, source_path: &str, abs_path: &Path, content_hash: &str) -> io::Result<Vec<Chunk>> {
        let meta = fs::symlink_metadata(abs_path)?;
        if meta.file_type().is_symlink() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to read through a symlink"));
        }
        if meta.len() <= self.streaming_threshold {
            let bytes = fs::read(abs_path)?;
            let text = String::from_utf8_lossy(&bytes);
            return Ok(self.chunk_text(source_path, &text, content_hash));
        }
        self.chunk_streamed(source_path, abs_path, content_hash)
    }

    /// Reads the file in fixed-size blocks and chunks it one segment at a
    /// time, so memory stays bounded even for a file that is one long line.
    /// Segments end at a line break when one exists; windows never span two
    /// segments.
    fn chunk_streamed(&self, source_path: &str, abs_path: &Path, content_hash: &str) -> io::Result<Vec<Chunk>> {
        let segment_bytes = self.segment_bytes();
        let mut file = fs::File::open(abs_path)?;
        let mut block = vec![0u8; STREAM_BLOCK_BYTES];
        let mut undecoded = Vec::new();
        let mut segment = String::new();
        let mut lines_before = 0usize;
        let mut chunks = Vec::new();
        loop {
            let read = file.read(&mut block)?;
            if read == 0 {
                break;
            }
            undecoded.extend_from_slice(&block[..read]);
            decode_utf8_prefix(&mut undecoded, &mut segment);
            while segment.len() >= segment_bytes {
                let cut = segment_cut(&segment, segment_bytes);
                self.push_segment(&segment[..cut], lines_before, source_path, content_hash, &mut chunks);
                lines_before += segment[..cut].matches('\n').count();
                segment.drain(..cut);
            }
        }
        if !undecoded.is_empty() {
            segment.push_str(&String::from_utf8_lossy(&undecoded));
        }
        if !segment.is_empty() {
            self.push_segment(&segment, lines_before, source_path, content_hash, &mut chunks);
        }
        Ok(chunks)
    }

    fn segment_bytes(&self) -> usize {
        (self.profile.chunk_size * 64).max(STREAM_BLOCK_BYTES)
    }

    fn push_segment(&self, segment: &str, lines_before: usize, source_path: &str, content_hash: &str, out: &mut Vec<Chunk>) {
        for w in self.windows(segment) {
            let index = out.len();
            out.push(Chunk {
                id: Chunk::make_id(source_path, content_hash, index),
                source_path: source_path.to_string(),
                text: w.text.to_string(),
                start_line: lines_before + w.start_line,
                end_line: lines_before + w.end_line,
                content_hash: content_hash.to_string(),
            });
        }
    }
}

/// Moves the decodable prefix of `bytes` onto `out`. Invalid sequences
/// become U+FFFD; an incomplete sequence at the end stays in `bytes`.
fn decode_utf8_prefix(bytes: &mut Vec<u8>, out: &mut String) {
    loop {
        let err = match std::str::from_utf8(&bytes[..]) {
            Ok(text) => {
                out.push_str(text);
                bytes.clear();
                return;
            }
            Err(e) => e,
        };
        let valid = err.valid_up_to();
        out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
        match err.error_len() {
            Some(bad) => {
                out.push(char::REPLACEMENT_CHARACTER);
                bytes.drain(..valid + bad);
            }
            None => {
                bytes.drain(..valid);
                return;
            }
        }
    }
}

/// End of the next segment: just after the last line break within `limit`
/// bytes, or the last character boundary within `limit` for a line longer
/// than that.
fn segment_cut(segment: &str, limit: usize) -> usize {
    let mut end = limit.min(segment.len());
    while !segment.is_char_boundary(end) {
        end -= 1;
    }
    match segment[..end].rfind('\n') {
        Some(i) => i + 1,
        None if end > 0 => end,
        None => segment.chars().next().map_or(segment.len(), char::len_utf8),
    }
}

fn line_of(newlines: &[usize], offset: usize) -> usize {
    newlines.partition_point(|&n| n < offset) + 1
}

/// Cuts `text[start..end]` into contiguous ranges of at most `size` bytes.
fn split_range(text: &str, start: usize, end: usize, separators: &[String], size: usize, out: &mut Vec<(usize, usize)>) {
    if end - start <= size {
        out.push((start, end));
        return;
    }
    let segment = &text[start..end];
    let Some(pos) = separators.iter().position(|s| s.is_empty() || segment.contains(s.as_str())) else {
        hard_cut(text, start, end, size, out);
        return;
    };
    let sep = &separators[pos];
    if sep.is_empty() {
        hard_cut(text, start, end, size, out);
        return;
    }
    let rest = &separators[pos + 1..];
    let mut piece_start = start;
    for (i, _) in segment.match_indices(sep.as_str()) {
        let piece_end = start + i + sep.len();
        if piece_end <= piece_start {
            continue;
        }
        push_piece(text, piece_start, piece_end, rest, size, out);
        piece_start = piece_end;
    }
    if piece_start < end {
        push_piece(text, piece_start, end, rest, size, out);
    }
}

fn push_piece(text: &str, start: usize, end: usize, rest: &[String], size: usize, out: &mut Vec<(usize, usize)>) {
    if end - start <= size {
        out.push((start, end));
    } else {
        split_range(text, start, end, rest, size, out);
    }
}

fn hard_cut(text: &str, start: usize, end: usize, size: usize, out: &mut Vec<(usize, usize)>) {
    let mut s = start;
    while s < end {
        let mut e = (s + size).min(end);
        while !text.is_char_boundary(e) {
            e -= 1;
        }
        if e == s {
            // A single character wider than `size`; take it whole.
            e = s + text[s..].chars().next().map_or(1, char::len_utf8);
        }
        out.push((s, e));
        s = e;
    }
}

/// Greedily packs pieces into windows, carrying back a tail of whole pieces
/// as overlap whenever that tail and the next piece fit together.
fn pack(pieces: &[(usize, usize)], size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = |i: usize| pieces[i].1 - pieces[i].0;
    let mut windows = Vec::new();
    let mut i = 0;
    while i < pieces.len() {
        let mut j = i;
        let mut total = 0;
        while j < pieces.len() && (j == i || total + len(j) <= size) {
            total += len(j);
            j += 1;
        }
        windows.push((pieces[i].0, pieces[j - 1].1));
        if j == pieces.len() {
            break;
        }
        let mut k = j;
        let mut carried = 0;
        while k > i + 1 {
            let next = carried + len(k - 1);
            if next > overlap || next + len(j) > size {
                break;
            }
            carried = next;
            k -= 1;
        }
        i = k;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(
            ChunkProfile { chunk_size, overlap, separators: ChunkProfile::code().separators },
            u64::MAX,
        )
    }

    fn reconstruct(text: &str, windows: &[Window<'_>]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for w in windows {
            assert!(w.start <= covered || covered == 0, "gap before window at {}", w.start);
            out.push_str(&text[covered.max(w.start)..w.end]);
            covered = w.end;
        }
        out
    }

    #[test]
    fn empty_text_has_no_windows() {
        assert!(small(100, 10).windows("").is_empty());
    }

    #[test]
    fn short_text_is_one_window() {
        let text = "fn main() {}\n";
        let w = small(100, 10).windows(text);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].text, text);
        assert_eq!((w[0].start_line, w[0].end_line), (1, 1));
    }

    #[test]
    fn windows_reconstruct_source_when_overlap_dropped() {
        let text: String = (0..200)
            .map(|i| if i % 7 == 0 { format!("line {i} ends a block\n\n") } else { format!("line {i} has words in it\n") })
            .collect();
        let windows = small(180, 40).windows(&text);
        assert!(windows.len() > 5);
        assert_eq!(reconstruct(&text, &windows), text);
        assert!(windows.iter().all(|w| w.text.len() <= 180));
    }

    #[test]
    fn overlap_is_literal_shared_text() {
        let text: String = (0..60).map(|i| format!("row {i}\n")).collect();
        let windows = small(64, 20).windows(&text);
        let shared = windows.windows(2).filter(|p| p[1].start < p[0].end).count();
        assert!(shared > 0, "expected at least one overlapping pair");
        for pair in windows.windows(2) {
            if pair[1].start < pair[0].end {
                let tail = &text[pair[1].start..pair[0].end];
                assert!(pair[0].text.ends_with(tail));
                assert!(pair[1].text.starts_with(tail));
                assert!(pair[1].start_line <= pair[0].end_line, "overlapping windows share lines");
            }
        }
    }

    #[test]
    fn pathological_line_is_hard_split() {
        let text = "x".repeat(1000);
        let windows = small(128, 0).windows(&text);
        assert_eq!(windows.len(), 8);
        assert!(windows.iter().all(|w| w.start_line == 1 && w.end_line == 1));
        assert_eq!(reconstruct(&text, &windows), text);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let text = "é".repeat(100);
        let windows = small(7, 0).windows(&text);
        assert!(windows.iter().all(|w| w.text.chars().all(|c| c == 'é')));
        assert_eq!(reconstruct(&text, &windows), text);
    }

    #[test]
    fn line_numbers_track_byte_ranges() {
        let text = "a\nb\nc\nd\ne\nf\n";
        let windows = small(4, 0).windows(text);
        assert_eq!(windows[0].text, "a\nb\n");
        assert_eq!((windows[0].start_line, windows[0].end_line), (1, 2));
        let last = windows.last().expect("window");
        assert_eq!(last.end_line, 6);
    }

    #[test]
    fn prose_profile_prefers_sentences() {
        let chunker = Chunker::new(
            ChunkProfile { chunk_size: 40, overlap: 0, separators: ChunkProfile::prose().separators },
            u64::MAX,
        );
        let text = "The first sentence is here. The second one follows. A third closes it.";
        let windows = chunker.windows(text);
        assert!(windows[0].text.ends_with(". "), "got {:?}", windows[0].text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text: String = (0..50).map(|i| format!("word{i} ")).collect();
        let c = small(50, 10);
        assert_eq!(c.chunk_text("a.txt", &text, "h"), c.chunk_text("a.txt", &text, "h"));
    }

    #[test]
    fn streamed_files_keep_absolute_line_numbers() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("big.txt");
        let body: String = (1..=5000).map(|i| format!("entry number {i}\n")).collect();
        fs::write(&path, &body).expect("write");

        let chunker = Chunker::new(ChunkProfile::code(), 1024);
        let chunks = chunker.chunk_file("big.txt", &path, "hash").expect("chunk");
        assert!(!chunks.is_empty());
        let last = chunks.last().expect("chunk");
        assert_eq!(last.end_line, 5000);
        assert!(last.text.contains("entry number 5000"));
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line >= pair[0].start_line);
        }
    }

    #[test]
    fn streamed_multibyte_text_survives_block_boundaries() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("wide.txt");
        // 3-byte characters never line up with the 64 KiB read blocks.
        let body = "€".repeat(100_000);
        fs::write(&path, &body).expect("write");

        let chunks = Chunker::new(ChunkProfile::code(), 1024).chunk_file("wide.txt", &path, "h").expect("chunk");
        assert!(chunks.iter().all(|c| !c.text.contains(char::REPLACEMENT_CHARACTER)));
        let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert_eq!(total, 100_000, "hard-cut windows carry no overlap");
    }

    #[test]
    fn segment_cut_prefers_line_breaks() {
        assert_eq!(segment_cut("ab\ncd\nef", 7), 6);
        assert_eq!(segment_cut("abcdefgh", 5), 5);
        assert_eq!(segment_cut("aé", 2), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_refused() {
        let dir = tempfile::tempdir().expect("tmp");
        fs::write(dir.path().join("real.txt"), "hello").expect("write");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).expect("link");
        let chunker = small(100, 0);
        assert!(chunker.chunk_file("link.txt", &dir.path().join("link.txt"), "h").is_err());
    }
}
