//! Blank-line chunker for context rows
//!
//! Splits the active context rows into retrieval units on blank-line
//! groups. Rows are processed in insertion order, chunk ids are assigned
//! sequentially across the whole build, and every chunk keeps the row id
//! and byte offset it came from.

/// One retrieval unit produced by a build
#[derive(Debug, Clone, PartialEq)]
pub struct IndexChunk {
    /// Position in the build; stable for a given rules hash
    pub chunk_id: usize,
    pub text: String,
    /// Context row this chunk was cut from
    pub source_row_id: i64,
    /// Byte offset of the chunk within its source row
    pub offset: usize,
}

/// Split `(row_id, content)` pairs into trimmed, non-empty chunks.
///
/// A chunk boundary is any run of one or more blank lines (lines that are
/// empty after trimming). Rows never share a chunk, which is equivalent to
/// concatenating them with a blank-line separator first.
pub fn chunk_rows(rows: &[(i64, String)]) -> Vec<IndexChunk> {
    let mut chunks = Vec::new();
    for (row_id, content) in rows {
        split_row(*row_id, content, &mut chunks);
    }
    for (idx, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_id = idx;
    }
    chunks
}

fn split_row(row_id: i64, content: &str, out: &mut Vec<IndexChunk>) {
    let mut start: Option<usize> = None;
    let mut end = 0usize;
    let mut pos = 0usize;

    for line in content.split_inclusive('\n') {
        let is_blank = line.trim().is_empty();
        if is_blank {
            if let Some(begin) = start.take() {
                push_chunk(row_id, content, begin, end, out);
            }
        } else {
            if start.is_none() {
                start = Some(pos);
            }
            end = pos + line.len();
        }
        pos += line.len();
    }
    if let Some(begin) = start {
        push_chunk(row_id, content, begin, end, out);
    }
}

fn push_chunk(row_id: i64, content: &str, begin: usize, end: usize, out: &mut Vec<IndexChunk>) {
    let raw = &content[begin..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    // Offset points at the trimmed text, not the raw slice start.
    let lead = raw.len() - raw.trim_start().len();
    out.push(IndexChunk {
        chunk_id: 0,
        text: trimmed.to_string(),
        source_row_id: row_id,
        offset: begin + lead,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_paragraph_single_chunk() {
        let chunks = chunk_rows(&[(1, "Teams may have up to 4 members.".to_string())]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].source_row_id, 1);
        assert_eq!(chunks[0].text, "Teams may have up to 4 members.");
    }

    #[test]
    fn test_blank_line_groups_split() {
        let text = "First rule.\n\nSecond rule.\n\n\n\nThird rule.".to_string();
        let chunks = chunk_rows(&[(7, text)]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "First rule.");
        assert_eq!(chunks[1].text, "Second rule.");
        assert_eq!(chunks[2].text, "Third rule.");
    }

    #[test]
    fn test_whitespace_only_lines_are_boundaries() {
        let text = "alpha\n   \nbeta".to_string();
        let chunks = chunk_rows(&[(1, text)]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "beta");
    }

    #[test]
    fn test_multi_line_paragraph_stays_together() {
        let text = "line one\nline two\nline three\n\nnext".to_string();
        let chunks = chunk_rows(&[(1, text)]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "line one\nline two\nline three");
    }

    #[test]
    fn test_empty_and_blank_rows_produce_nothing() {
        assert!(chunk_rows(&[(1, String::new())]).is_empty());
        assert!(chunk_rows(&[(1, "\n\n  \n".to_string())]).is_empty());
    }

    #[test]
    fn test_chunk_ids_contiguous_across_rows() {
        let rows = vec![
            (1, "a\n\nb".to_string()),
            (2, "c".to_string()),
            (3, "d\n\ne".to_string()),
        ];
        let chunks = chunk_rows(&rows);
        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, i);
        }
        assert_eq!(chunks[2].source_row_id, 2);
        assert_eq!(chunks[4].text, "e");
    }

    #[test]
    fn test_offsets_point_into_source_row() {
        let text = "  padded start\n\nsecond".to_string();
        let chunks = chunk_rows(&[(1, text.clone())]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(&text[chunks[0].offset..chunks[0].offset + chunks[0].text.len()],
            "padded start");
        assert_eq!(&text[chunks[1].offset..], "second");
    }

    #[test]
    fn test_deterministic() {
        let rows = vec![(1, "Alpha\n\nBeta\n\nGamma".to_string())];
        let a = chunk_rows(&rows);
        let b = chunk_rows(&rows);
        assert_eq!(a, b);
    }
}
