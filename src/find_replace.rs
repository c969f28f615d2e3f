use crate::models::{DocumentDetail, LeafSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindReplaceOutcome {
    pub updated: Vec<DocumentDetail>,
}

impl FindReplaceOutcome {
    pub fn count(&self) -> usize {
        self.updated.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub text: String,
    pub matched: bool,
}

/// Literal, case-sensitive replacement in both fields. Returns `None` when
/// nothing would change.
pub fn replace_fields(title: &str, content: &str, query: &str, replacement: &str) -> Option<(String, String)> {
    if query.is_empty() || !(title.contains(query) || content.contains(query)) {
        return None;
    }
    let next_title = title.replace(query, replacement);
    let next_content = content.replace(query, replacement);
    if next_title == title && next_content == content {
        return None;
    }
    Some((next_title, next_content))
}

/// Scans `docs` and returns the mutated copies. `scope` restricts the scan to
/// documents filed directly in that folder.
pub fn find_replace(docs: &[DocumentDetail], query: &str, replacement: &str, scope: Option<i64>) -> FindReplaceOutcome {
    if query.is_empty() {
        return FindReplaceOutcome::default();
    }
    let updated = docs
        .iter()
        .filter(|doc| scope.map_or(true, |folder_id| doc.folder_id == Some(folder_id)))
        .filter_map(|doc| {
            replace_fields(&doc.title, &doc.content, query, replacement).map(|(title, content)| DocumentDetail {
                title,
                content,
                ..doc.clone()
            })
        })
        .collect();
    FindReplaceOutcome { updated }
}

/// Preview of the documents a search would hit, matched on title or snippet.
pub fn find_matches(summaries: &[LeafSummary], query: &str) -> Vec<LeafSummary> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    summaries
        .iter()
        .filter(|summary| summary.title.contains(query) || summary.snippet.contains(query))
        .cloned()
        .collect()
}

pub fn highlight_segments(text: &str, query: &str) -> Vec<Segment> {
    if query.is_empty() || !text.contains(query) {
        return vec![Segment {
            text: text.to_string(),
            matched: false,
        }];
    }
    let mut segments = Vec::new();
    let mut parts = text.split(query).peekable();
    while let Some(part) = parts.next() {
        if !part.is_empty() {
            segments.push(Segment {
                text: part.to_string(),
                matched: false,
            });
        }
        if parts.peek().is_some() {
            segments.push(Segment {
                text: query.to_string(),
                matched: true,
            });
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: i64, folder_id: Option<i64>, title: &str, content: &str) -> DocumentDetail {
        let now = Utc::now();
        DocumentDetail {
            id,
            folder_id,
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn replaces_in_title_and_content_and_converges() {
        let docs = vec![doc(1, None, "AQB", "QQ"), doc(2, None, "nothing", "here")];
        let outcome = find_replace(&docs, "Q", "R", None);
        assert_eq!(outcome.count(), 1);
        assert_eq!(outcome.updated[0].title, "ARB");
        assert_eq!(outcome.updated[0].content, "RR");

        let mutated = vec![outcome.updated[0].clone(), docs[1].clone()];
        assert_eq!(find_replace(&mutated, "Q", "R", None).count(), 0);
    }

    #[test]
    fn scope_excludes_other_folders() {
        let docs = vec![doc(1, Some(1), "Q", ""), doc(2, Some(2), "Q", ""), doc(3, None, "Q", "")];
        let outcome = find_replace(&docs, "Q", "R", Some(1));
        assert_eq!(outcome.updated.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn empty_query_is_noop() {
        let docs = vec![doc(1, None, "abc", "abc")];
        assert_eq!(find_replace(&docs, "", "x", None).count(), 0);
        assert!(replace_fields("abc", "abc", "", "x").is_none());
    }

    #[test]
    fn identical_replacement_is_not_an_update() {
        assert!(replace_fields("abc", "abc", "b", "b").is_none());
    }

    #[test]
    fn matching_is_case_sensitive_and_non_overlapping() {
        assert!(replace_fields("Quiet", "", "q", "x").is_none());
        let (title, _) = replace_fields("aaa", "", "aa", "b").expect("changed");
        assert_eq!(title, "ba");
    }

    #[test]
    fn preview_matches_title_or_snippet() {
        let summaries = vec![
            LeafSummary {
                id: 1,
                folder_id: None,
                title: "Weekly report".to_string(),
                snippet: "".to_string(),
                updated_at: Utc::now(),
                size: 0,
            },
            LeafSummary {
                id: 2,
                folder_id: None,
                title: "Notes".to_string(),
                snippet: "the weekly sync".to_string(),
                updated_at: Utc::now(),
                size: 15,
            },
        ];
        assert_eq!(find_matches(&summaries, " report ").len(), 1);
        assert_eq!(find_matches(&summaries, "weekly")[0].id, 2);
        assert!(find_matches(&summaries, "  ").is_empty());
    }

    #[test]
    fn highlight_splits_around_matches() {
        let segments = highlight_segments("abXcdX", "X");
        let rendered: Vec<(&str, bool)> = segments.iter().map(|s| (s.text.as_str(), s.matched)).collect();
        assert_eq!(rendered, vec![("ab", false), ("X", true), ("cd", false), ("X", true)]);
        assert_eq!(highlight_segments("plain", "X").len(), 1);
    }
}
