//! Query tokenization shared by the prefilter and the lexical signal.
//!
//! A term is a run of letters, digits or underscores in any script,
//! lower-cased. The same terms feed the FTS5 match expression and the
//! containment score, so a chunk the prefilter finds always has a positive
//! lexical score.

/// Terms beyond this many are ignored.
pub const MAX_QUERY_TERMS: usize = 24;

/// Distinct lower-cased terms of `query`, in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .take(MAX_QUERY_TERMS)
    {
        let lowered = token.to_lowercase();
        if !terms.contains(&lowered) {
            terms.push(lowered);
        }
    }
    terms
}

/// FTS5 expression matching any of `terms`, or `None` when there are none.
///
/// Every term becomes a quoted FTS5 string, so operators and punctuation in it
/// are matched literally.
pub fn fts_match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Share of `terms` contained (as substrings) in the lower-cased `text`.
pub fn containment_score(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let matched = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}
