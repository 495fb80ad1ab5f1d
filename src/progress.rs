// Progress-token extraction - isolated per the Design Notes' call-out: this
// is a stringly-typed contract with the external indexer, kept exactly as
// specified rather than "improved", with one test per token.

/// Map one line of indexer output to a progress value, if it carries a
/// recognized token. Matching is case-insensitive substring search; the
/// first matching token in table order wins.
pub fn progress_for_line(line: &str) -> Option<u8> {
    const TOKENS: &[(&str, u8)] = &[
        ("chunk", 20),
        ("split", 20),
        ("entity", 40),
        ("extract", 40),
        ("relationship", 60),
        ("graph", 60),
        ("community", 80),
        ("cluster", 80),
        ("embed", 90),
        ("vector", 90),
    ];
    let lower = line.to_lowercase();
    TOKENS
        .iter()
        .find(|(token, _)| lower.contains(token))
        .map(|(_, value)| *value)
}

/// Fold a new progress observation into the current value, enforcing the
/// monotonic-non-decreasing rule: a token that maps to a lower value than
/// already observed is ignored.
pub fn advance(current: u8, line: &str) -> u8 {
    match progress_for_line(line) {
        Some(value) if value > current => value,
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_token_maps_to_20() {
        assert_eq!(progress_for_line("Chunking documents..."), Some(20));
        assert_eq!(progress_for_line("splitting text into units"), Some(20));
    }

    #[test]
    fn entity_token_maps_to_40() {
        assert_eq!(progress_for_line("Extracting entities"), Some(40));
        assert_eq!(progress_for_line("running extract step"), Some(40));
    }

    #[test]
    fn relationship_token_maps_to_60() {
        assert_eq!(progress_for_line("Relationship extraction"), Some(60));
        assert_eq!(progress_for_line("building graph"), Some(60));
    }

    #[test]
    fn community_token_maps_to_80() {
        assert_eq!(progress_for_line("Detecting communities"), Some(80));
        assert_eq!(progress_for_line("clustering nodes"), Some(80));
    }

    #[test]
    fn embed_token_maps_to_90() {
        assert_eq!(progress_for_line("Generating embeddings"), Some(90));
        assert_eq!(progress_for_line("vectorizing chunks"), Some(90));
    }

    #[test]
    fn unrecognized_line_yields_none() {
        assert_eq!(progress_for_line("INFO: starting up"), None);
    }

    #[test]
    fn advance_is_monotonic_non_decreasing() {
        let mut progress = 0u8;
        progress = advance(progress, "chunking input"); // 20
        assert_eq!(progress, 20);
        progress = advance(progress, "INFO: chunk 3 of 10"); // still 20, not lower
        assert_eq!(progress, 20);
        progress = advance(progress, "extracting entities"); // 40
        assert_eq!(progress, 40);
        progress = advance(progress, "chunking more input"); // 20 < 40, ignored
        assert_eq!(progress, 40);
        progress = advance(progress, "embedding vectors"); // 90
        assert_eq!(progress, 90);
    }

    #[test]
    fn case_insensitive_matching() {
        assert_eq!(progress_for_line("COMMUNITY DETECTION"), Some(80));
    }
}
