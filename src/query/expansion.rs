//! Synonym expansion for low-confidence retries

use ahash::HashSet;

/// Doc-vocabulary synonyms keyed by lowercased query term
const SYNONYMS: &[(&str, &[&str])] = &[
    ("auth", &["authentication", "authorization", "credentials", "login"]),
    ("authentication", &["auth", "authorization", "credentials", "login"]),
    ("header", &["headers", "http header", "request header"]),
    ("endpoint", &["endpoints", "api", "url", "route"]),
    ("error", &["errors", "error code", "exception", "failure"]),
    ("sdk", &["library", "framework", "package", "module"]),
    ("mobile", &["android", "ios", "app"]),
    ("token", &["tokens", "api key", "bearer"]),
    ("webhook", &["webhooks", "callback", "event"]),
];

fn synonyms(term: &str) -> Option<&'static [&'static str]> {
    SYNONYMS
        .iter()
        .find(|(key, _)| *key == term)
        .map(|(_, words)| *words)
}

/// Append synonyms of known terms to `query`.
///
/// Returns `None` when no term has synonyms, so callers can skip a retry that
/// would repeat the original search.
pub fn expand_query(query: &str) -> Option<String> {
    let mut seen: HashSet<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let mut additions: Vec<&str> = Vec::new();
    for word in query.split_whitespace() {
        let term = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let Some(words) = synonyms(&term) else {
            continue;
        };
        for synonym in words {
            if seen.insert(synonym.to_string()) {
                additions.push(synonym);
            }
        }
    }

    if additions.is_empty() {
        return None;
    }
    Some(format!("{} {}", query, additions.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_known_terms() {
        let expanded = expand_query("Auth header?").unwrap();
        assert!(expanded.starts_with("Auth header? "));
        assert!(expanded.contains("authentication"));
        assert!(expanded.contains("request header"));
    }

    #[test]
    fn test_no_duplicates() {
        let expanded = expand_query("auth authentication").unwrap();
        assert_eq!(expanded.matches("authentication").count(), 1);
        assert_eq!(expanded.matches("credentials").count(), 1);
    }

    #[test]
    fn test_unknown_terms_yield_none() {
        assert_eq!(expand_query("quarterly revenue forecast"), None);
    }
}
