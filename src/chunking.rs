use crate::schema::{DocumentChunk, GroundingDoc};

pub const MAX_CHUNK_CHARS: usize = 2000;
const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Splits a document into chunks of at most `max_chars` characters.
///
/// Paragraphs are packed greedily; a paragraph that is longer than the limit
/// on its own is cut at character boundaries. Chunk ids are derived from the
/// source name so re-indexing a document overwrites its previous vectors.
pub fn split_document(doc: &GroundingDoc, max_chars: usize) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in doc.content.split(PARAGRAPH_SEPARATOR) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        for part in hard_split(paragraph, max_chars) {
            let joined_len = if current.is_empty() {
                part.chars().count()
            } else {
                current.chars().count() + PARAGRAPH_SEPARATOR.len() + part.chars().count()
            };

            if joined_len > max_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str(PARAGRAPH_SEPARATOR);
            }
            current.push_str(part);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| DocumentChunk {
            chunk_id: format!("{}#{}", doc.source, index),
            source: doc.source.clone(),
            index,
            text,
        })
        .collect()
}

fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in text.char_indices() {
        if count == max_chars {
            parts.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}
