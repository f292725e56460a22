//! Splitting long replies into transport-sized chunks.
//!
//! Limits are counted in characters, not bytes, because channel
//! transports advertise their caps that way (Telegram's 4096, for
//! example, is a character count).

/// Split `text` into chunks of at most `limit` characters.
///
/// Prefers breaking at the last newline inside the window, then the
/// last space, and falls back to a hard split when a single word
/// exceeds the limit. Emitted chunks have trailing whitespace trimmed;
/// whitespace-only pieces are skipped. A `limit` of `0` means
/// unlimited and returns the text as a single untouched chunk.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if limit == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let Some(window_end) = char_window_end(remaining, limit) else {
            // Fewer than `limit` chars left.
            if !remaining.is_empty() {
                chunks.push(remaining.to_string());
            }
            break;
        };

        // Try to split at a newline, then a space, then hard-split.
        let window = &remaining[..window_end];
        let (split_at, at_separator) = match window.rfind('\n') {
            Some(idx) => (idx, true),
            None => match window.rfind(' ') {
                Some(idx) => (idx, true),
                None => (window_end, false),
            },
        };

        let piece = remaining[..split_at].trim_end();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        let advance = if at_separator { split_at + 1 } else { split_at };
        remaining = remaining[advance..].trim_start();
    }

    chunks
}

/// Byte offset just past the first `limit` chars of `s`, or `None` when
/// `s` has fewer than `limit` chars.
fn char_window_end(s: &str, limit: usize) -> Option<usize> {
    let mut seen = 0;
    for (idx, _) in s.char_indices() {
        if seen == limit {
            return Some(idx);
        }
        seen += 1;
    }
    (seen == limit).then_some(s.len())
}
