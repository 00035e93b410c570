mod telegram;

pub use telegram::TelegramChannel;

/// Split a long reply into chunks that fit the channel's message size cap,
/// preferring paragraph and line boundaries, never mid-character.
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while boundary > 0 && !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let search_region = &remaining[..boundary];

        let split_at = search_region
            .rfind("\n\n")
            .map(|p| p + 1)
            .or_else(|| search_region.rfind('\n'))
            .unwrap_or(boundary);

        // Force progress when no boundary exists at all.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        chunks.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::split_message;

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(split_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn splits_on_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = split_message(&text, 80);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chars().all(|c| c == 'a'));
        assert!(chunks[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn never_splits_mid_char() {
        let text = "é".repeat(50);
        for chunk in split_message(&text, 21) {
            assert!(chunk.chars().all(|c| c == 'é'));
        }
    }
}
