/// Normalize a string by removing zero-width and special Unicode whitespace characters and lowercasing it.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| {
            // Remove zero-width and non-breaking spaces, but keep regular spaces
            !matches!(
                *c,
                '\u{200B}' | // zero-width space
                '\u{200C}' | // zero-width non-joiner
                '\u{200D}' | // zero-width joiner
                '\u{00A0}' | // non-breaking space
                '\u{FEFF}' // zero-width no-break space
            )
        })
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// How closely a control's visible text matches a recorded name.
/// Lower is better: 0 exact, 1 one contains the other, 2 no match.
pub fn text_match_score(recorded: &str, candidate: &str) -> u8 {
    let recorded = normalize(recorded);
    let candidate = normalize(candidate);
    if recorded.is_empty() || candidate.is_empty() {
        return 2;
    }
    if recorded == candidate {
        0
    } else if candidate.contains(&recorded) || recorded.contains(&candidate) {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_invisible_characters() {
        assert_eq!(normalize("\u{200B}Save\u{00A0} "), "save");
    }

    #[test]
    fn test_text_match_score() {
        assert_eq!(text_match_score("Save", "save"), 0);
        assert_eq!(text_match_score("Save", "Save As..."), 1);
        assert_eq!(text_match_score("Save", "Cancel"), 2);
        assert_eq!(text_match_score("", "Cancel"), 2);
    }
}
