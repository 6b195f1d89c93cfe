use common::storage::types::note_chunk::ChunkKind;

/// One chunk of a document or note, with position metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: u32,
    pub chunk_type: ChunkKind,
    pub page_number: u32,
    pub char_start: u64,
    pub char_end: u64,
}

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

/// Split extracted text into retrieval chunks.
///
/// Pages are delimited by `--- Page N ---` markers (absent markers mean
/// one virtual page). Within a page, paragraphs accumulate greedily up to
/// `chunk_size`; an oversized paragraph is split at sentence boundaries
/// with `overlap` characters carried between the pieces.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    let pages = parse_pages(text);
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut chunk_index = 0u32;
    let mut global_offset = 0usize;

    for (page_number, page_text) in pages {
        let paragraphs = split_paragraphs(&page_text);

        let mut buffer = String::new();
        let mut buffer_start = global_offset;

        for paragraph in paragraphs {
            let paragraph_len = paragraph.len();

            if buffer.len() + paragraph_len + 1 <= chunk_size {
                if !buffer.is_empty() {
                    buffer.push_str("\n\n");
                }
                buffer.push_str(&paragraph);
            } else {
                if !buffer.trim().is_empty() {
                    chunks.push(make_chunk(
                        buffer.trim(),
                        chunk_index,
                        page_number,
                        buffer_start,
                        buffer_start + buffer.len(),
                    ));
                    chunk_index += 1;
                }

                if paragraph_len > chunk_size {
                    for piece in split_sentences(&paragraph, chunk_size, overlap) {
                        let piece_len = piece.len();
                        chunks.push(make_chunk(
                            piece.trim(),
                            chunk_index,
                            page_number,
                            global_offset,
                            global_offset + piece_len,
                        ));
                        chunk_index += 1;
                    }
                    buffer = String::new();
                    buffer_start = global_offset + paragraph_len;
                } else {
                    buffer = paragraph;
                    buffer_start = global_offset;
                }
            }

            global_offset += paragraph_len + 2; // paragraph separator
        }

        if !buffer.trim().is_empty() {
            chunks.push(make_chunk(
                buffer.trim(),
                chunk_index,
                page_number,
                buffer_start,
                buffer_start + buffer.len(),
            ));
            chunk_index += 1;
        }
    }

    chunks
}

/// `(page_number, page_text)` pairs from marker-delimited text.
fn parse_pages(text: &str) -> Vec<(u32, String)> {
    let mut pages: Vec<(u32, String)> = Vec::new();
    let mut current_page: u32 = 1;
    let mut current_text = String::new();
    let mut saw_marker = false;

    for line in text.lines() {
        if let Some(page_number) = parse_page_marker(line) {
            if !current_text.trim().is_empty() {
                pages.push((current_page, current_text.trim().to_owned()));
            }
            current_page = page_number;
            current_text = String::new();
            saw_marker = true;
        } else {
            current_text.push_str(line);
            current_text.push('\n');
        }
    }
    if !current_text.trim().is_empty() {
        pages.push((current_page, current_text.trim().to_owned()));
    }

    if !saw_marker && pages.is_empty() && !text.trim().is_empty() {
        pages.push((1, text.trim().to_owned()));
    }
    pages
}

fn parse_page_marker(line: &str) -> Option<u32> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix("--- Page ")?;
    let number = inner.strip_suffix(" ---")?;
    number.parse().ok()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_owned());
            }
            current = String::new();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_owned());
    }
    paragraphs
}

/// Split a long paragraph at sentence boundaries (`. ! ?` + whitespace),
/// carrying `overlap` characters between adjacent pieces.
fn split_sentences(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sentences = sentence_split(text);
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if current.len() + sentence.len() + 1 <= chunk_size {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
        } else {
            if !current.is_empty() {
                pieces.push(current.clone());
                // Overlap keeps sentence-level context across the split
                let carried: String = current
                    .chars()
                    .rev()
                    .take(overlap)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                current = carried;
                if !current.is_empty() {
                    current.push(' ');
                }
            }
            current.push_str(&sentence);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    if pieces.is_empty() {
        pieces.push(text.chars().take(chunk_size).collect());
    }
    pieces
}

fn sentence_split(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().is_some_and(|next| next.is_whitespace()) {
                sentences.push(current.trim().to_owned());
                current = String::new();
                // consume the whitespace run
                while chars.peek().is_some_and(|next| next.is_whitespace()) {
                    chars.next();
                }
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_owned());
    }
    sentences
}

fn make_chunk(
    content: &str,
    chunk_index: u32,
    page_number: u32,
    char_start: usize,
    char_end: usize,
) -> TextChunk {
    TextChunk {
        chunk_type: infer_chunk_type(content),
        content: content.to_owned(),
        chunk_index,
        page_number,
        char_start: char_start as u64,
        char_end: char_end as u64,
    }
}

/// Chunk type from the first line: headings, lists, fenced code, else
/// plain paragraph.
fn infer_chunk_type(content: &str) -> ChunkKind {
    if content.starts_with('#') {
        ChunkKind::Heading
    } else if content.starts_with('-')
        || content.starts_with('*')
        || starts_with_ordered_list(content)
    {
        ChunkKind::List
    } else if content.contains("```") {
        ChunkKind::Code
    } else {
        ChunkKind::Paragraph
    }
}

fn starts_with_ordered_list(content: &str) -> bool {
    let mut chars = content.chars();
    let mut saw_digit = false;
    for c in chars.by_ref() {
        if c.is_ascii_digit() {
            saw_digit = true;
        } else {
            return saw_digit && c == '.';
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP).is_empty());
        assert!(chunk_text("   \n\n  ", DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP).is_empty());
    }

    #[test]
    fn test_small_paragraphs_merge_into_one_chunk() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = chunk_text(text, 500, 50);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page_number, 1);
        assert!(chunks[0].content.contains("First paragraph"));
        assert!(chunks[0].content.contains("Second paragraph"));
    }

    #[test]
    fn test_chunk_indexes_are_dense_from_zero() {
        let paragraph = "A sentence that fills space nicely and runs on. ".repeat(4);
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let chunks = chunk_text(&text, 200, 20);

        assert!(chunks.len() > 1);
        for (expected, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, expected as u32);
        }
    }

    #[test]
    fn test_chunk_coverage_accounts_for_separators() {
        // Two paragraphs that cannot share a chunk: the chunks cover the
        // full text minus the two separator characters.
        let p1 = "x".repeat(300);
        let p2 = "y".repeat(300);
        let text = format!("{p1}\n\n{p2}");

        let chunks = chunk_text(&text, 400, 50);
        assert_eq!(chunks.len(), 2);

        let covered: u64 = chunks.iter().map(|c| c.char_end - c.char_start).sum();
        assert_eq!(covered as usize, text.len() - 2);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[1].char_start, chunks[0].char_end + 2);
    }

    #[test]
    fn test_page_markers_set_page_numbers() {
        let text = "--- Page 1 ---\nAlpha paragraph.\n\n--- Page 2 ---\nBeta paragraph.";
        let chunks = chunk_text(text, 500, 50);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[1].page_number, 2);
        assert!(!chunks[0].content.contains("--- Page"));
    }

    #[test]
    fn test_oversized_paragraph_splits_at_sentences_with_overlap() {
        let sentence = "This sentence is about forty characters. ";
        let paragraph = sentence.repeat(20); // ~820 chars, no blank lines
        let chunks = chunk_text(&paragraph, 200, 30);

        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(
                chunk.content.len() <= 200 + 45,
                "chunk of {} chars exceeds the size bound",
                chunk.content.len()
            );
        }
        // Overlap repeats tail text at the head of the next piece
        let first_tail: String = chunks[0].content.chars().rev().take(20).collect();
        assert!(!first_tail.is_empty());
    }

    #[test]
    fn test_chunk_type_inference() {
        assert_eq!(infer_chunk_type("# Heading"), ChunkKind::Heading);
        assert_eq!(infer_chunk_type("- item one"), ChunkKind::List);
        assert_eq!(infer_chunk_type("* item one"), ChunkKind::List);
        assert_eq!(infer_chunk_type("1. first"), ChunkKind::List);
        assert_eq!(infer_chunk_type("12. twelfth"), ChunkKind::List);
        assert_eq!(infer_chunk_type("```rust\nfn main() {}\n```"), ChunkKind::Code);
        assert_eq!(infer_chunk_type("plain words"), ChunkKind::Paragraph);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "Some text here.\n\nMore text there.\n\n--- Page 2 ---\nSecond page.";
        let first = chunk_text(text, 100, 10);
        assert_eq!(first, chunk_text(text, 100, 10));
    }
}
