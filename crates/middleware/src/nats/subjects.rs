/// Make a partition key safe to use as a single NATS subject token.
///
/// Subject tokens may not contain `.`, whitespace or the wildcards `*` and `>`.
/// Anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn sanitize_subject_token(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Subject a message with partition key `key` is published on: `{topic}.{key}`
pub fn subject_for(topic: &str, key: &str) -> String {
    let token = sanitize_subject_token(key);
    if token.is_empty() {
        format!("{}._", topic)
    } else {
        format!("{}.{}", topic, token)
    }
}

/// Whether a message belongs to the `requested` partition.
///
/// Distinct keys can share a subject once sanitized (`Bond.1` and `Bond_1`),
/// so the exact key carried in the message header decides. Messages without
/// the header are accepted on the subject match alone.
pub fn partition_matches(requested: Option<&str>, header_key: Option<&str>) -> bool {
    match (requested, header_key) {
        (Some(requested), Some(key)) => requested == key,
        _ => true,
    }
}

/// Wildcard covering every partition of a topic
pub fn topic_wildcard(topic: &str) -> String {
    format!("{}.>", topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_safe_tokens() {
        assert_eq!(sanitize_subject_token("job-1"), "job-1");
        assert_eq!(sanitize_subject_token("Bond_42"), "Bond_42");
    }

    #[test]
    fn test_sanitize_replaces_separators_and_wildcards() {
        assert_eq!(sanitize_subject_token("US.912828.ZT"), "US_912828_ZT");
        assert_eq!(sanitize_subject_token("a*b>c d"), "a_b_c_d");
    }

    #[test]
    fn test_subject_for() {
        assert_eq!(subject_for("financial-messages", "job-1"), "financial-messages.job-1");
        assert_eq!(subject_for("financial-messages", ""), "financial-messages._");
        assert_eq!(topic_wildcard("financial-messages"), "financial-messages.>");
    }

    #[test]
    fn test_colliding_keys_are_told_apart_by_header() {
        assert_eq!(subject_for("t", "Bond.1"), subject_for("t", "Bond_1"));

        assert!(partition_matches(Some("Bond.1"), Some("Bond.1")));
        assert!(!partition_matches(Some("Bond.1"), Some("Bond_1")));
        assert!(!partition_matches(Some("Bond_1"), Some("Bond.1")));
    }

    #[test]
    fn test_unfiltered_or_headerless_messages_match() {
        assert!(partition_matches(None, Some("Bond_1")));
        assert!(partition_matches(None, None));
        assert!(partition_matches(Some("Bond.1"), None));
    }
}
