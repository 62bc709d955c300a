//! Paragraph packing for the per-contract chat collections.

/// Packs paragraphs (blank-line separated) into chunks of at most roughly
/// `max_chars` characters. Paragraphs longer than the budget are cut at a
/// sentence boundary when one exists in the second half of the window.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_len = para.chars().count();

        if current_len > 0 && current_len + para_len + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if para_len > max_chars {
            chunks.extend(split_long_paragraph(para, max_chars));
            continue;
        }

        if current_len > 0 {
            current.push_str("\n\n");
            current_len += 2;
        }
        current.push_str(para);
        current_len += para_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '\n')
}

fn split_long_paragraph(para: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest: Vec<char> = para.chars().collect();

    while rest.len() > max_chars {
        let cut = (max_chars / 2..max_chars)
            .rev()
            .find(|&i| is_sentence_end(rest[i]))
            .map_or(max_chars, |i| i + 1);

        let piece: String = rest[..cut].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        let tail: String = rest[cut..].iter().collect();
        rest = tail.trim_start().chars().collect();
    }

    let last: String = rest.into_iter().collect();
    let last = last.trim();
    if !last.is_empty() {
        pieces.push(last.to_string());
    }
    pieces
}

/// Stable chunk ids for a contract collection: `<collection>_chunk<n>`.
pub fn chunk_ids(collection: &str, count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("{collection}_chunk{n}")).collect()
}
