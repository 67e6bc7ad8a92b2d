//! Inline `[n]` citation markers.
//!
//! Markers are matched against the provider's source list, renumbered by
//! first appearance, and rewritten in the text to match. Markers inside
//! fenced code blocks are left alone.

use crate::protocol::Citation;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Answer text with its markers renumbered, plus the cited sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub citations: Vec<Citation>,
}

fn marker_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| Regex::new(r"\[(\d{1,3})\]").expect("citation regex must compile"))
}

/// Resolve the markers in `text` against `sources` (1-based in the text).
///
/// Markers outside `1..=sources.len()` are kept verbatim and produce no
/// citation. Sources never referenced are dropped.
pub fn extract(text: &str, sources: &[String]) -> Extraction {
    // original 1-based index, in order of first appearance
    let mut order: Vec<usize> = Vec::new();
    let mut rewritten = String::with_capacity(text.len());
    let mut in_fence = false;

    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            rewritten.push_str(line);
            continue;
        }
        if in_fence {
            rewritten.push_str(line);
            continue;
        }

        let replaced = marker_regex().replace_all(line, |caps: &Captures| {
            let original = match caps[1].parse::<usize>() {
                Ok(n) if n >= 1 && n <= sources.len() => n,
                _ => return caps[0].to_string(),
            };
            let position = match order.iter().position(|&seen| seen == original) {
                Some(position) => position,
                None => {
                    order.push(original);
                    order.len() - 1
                }
            };
            format!("[{}]", position + 1)
        });
        rewritten.push_str(&replaced);
    }

    let citations = order
        .iter()
        .enumerate()
        .map(|(position, &original)| Citation {
            index: position + 1,
            url: sources[original - 1].clone(),
        })
        .collect();

    Extraction {
        text: rewritten,
        citations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|s| s.to_string()).collect()
    }

    fn urls(extraction: &Extraction) -> Vec<String> {
        extraction.citations.iter().map(|c| c.url.clone()).collect()
    }

    #[test]
    fn test_in_order_markers_unchanged() {
        let src = sources(&["https://a", "https://b"]);
        let result = extract("Paris[1] is big[2].", &src);
        assert_eq!(result.text, "Paris[1] is big[2].");
        assert_eq!(
            result.citations,
            vec![
                Citation {
                    index: 1,
                    url: "https://a".to_string()
                },
                Citation {
                    index: 2,
                    url: "https://b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_renumbered_by_first_appearance() {
        let src = sources(&["https://a", "https://b", "https://c"]);
        let result = extract("First[3], then[1], again[3].", &src);
        assert_eq!(result.text, "First[1], then[2], again[1].");
        assert_eq!(urls(&result), vec!["https://c", "https://a"]);
    }

    #[test]
    fn test_unused_sources_dropped() {
        let src = sources(&["https://a", "https://b", "https://c"]);
        let result = extract("Only[2].", &src);
        assert_eq!(result.text, "Only[1].");
        assert_eq!(urls(&result), vec!["https://b"]);
    }

    #[test]
    fn test_out_of_range_kept_verbatim() {
        let src = sources(&["https://a"]);
        let result = extract("Zero[0], one[1], nine[9].", &src);
        assert_eq!(result.text, "Zero[0], one[1], nine[9].");
        assert_eq!(result.citations.len(), 1);
    }

    #[test]
    fn test_no_sources_means_no_citations() {
        let result = extract("Claim[1].", &[]);
        assert_eq!(result.text, "Claim[1].");
        assert!(result.citations.is_empty());
    }

    #[test]
    fn test_code_fences_skipped() {
        let src = sources(&["https://a", "https://b"]);
        let text = "See[2].\n```\nlet x = v[1];\n```\nAlso[1].\n";
        let result = extract(text, &src);
        assert_eq!(result.text, "See[1].\n```\nlet x = v[1];\n```\nAlso[2].\n");
        assert_eq!(urls(&result), vec!["https://b", "https://a"]);
    }

    #[test]
    fn test_idempotent() {
        let src = sources(&["https://a", "https://b", "https://c", "https://d"]);
        let text = "X[4] and Y[2]. Z[4][3]. Out[7].";
        let first = extract(text, &src);
        let second = extract(&first.text, &urls(&first));
        assert_eq!(first, second);
        assert_eq!(extract(text, &src), first);
    }
}
