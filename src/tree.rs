use crate::models::{DocumentDetail, FolderNode, FolderRow, LeafSummary, TemplateRecord};
use icu_collator::{Collator, CollatorOptions};
use icu_locid::locale;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

pub const SNIPPET_CHARS: usize = 120;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Materializes the flat folder rows into an ordered forest.
///
/// Rows whose parent is missing from `rows` become roots. Rows caught in a
/// parent cycle are promoted to roots in input order so nothing is dropped.
/// Leaves without a folder, or pointing at an unknown folder, are not attached
/// to any node.
pub fn build_tree(rows: &[FolderRow], leaves: &[LeafSummary]) -> Vec<FolderNode> {
    let mut leaves_by_folder: HashMap<i64, Vec<LeafSummary>> = HashMap::new();
    for leaf in leaves {
        if let Some(folder_id) = leaf.folder_id {
            leaves_by_folder.entry(folder_id).or_default().push(leaf.clone());
        }
    }

    let known: HashSet<i64> = rows.iter().map(|row| row.id).collect();
    let mut children_of: HashMap<i64, Vec<&FolderRow>> = HashMap::new();
    let mut root_rows = Vec::new();
    for row in rows {
        match row.parent_id {
            Some(parent_id) if parent_id != row.id && known.contains(&parent_id) => {
                children_of.entry(parent_id).or_default().push(row);
            }
            _ => root_rows.push(row),
        }
    }

    let mut visited = HashSet::with_capacity(rows.len());
    let mut roots = Vec::with_capacity(root_rows.len());
    for row in root_rows {
        roots.push(materialize(row, &children_of, &mut leaves_by_folder, &mut visited));
    }
    for row in rows {
        if !visited.contains(&row.id) {
            roots.push(materialize(row, &children_of, &mut leaves_by_folder, &mut visited));
        }
    }

    sort_nodes(&mut roots);
    roots
}

fn materialize(
    row: &FolderRow,
    children_of: &HashMap<i64, Vec<&FolderRow>>,
    leaves_by_folder: &mut HashMap<i64, Vec<LeafSummary>>,
    visited: &mut HashSet<i64>,
) -> FolderNode {
    visited.insert(row.id);
    let mut children = Vec::new();
    if let Some(kids) = children_of.get(&row.id) {
        for kid in kids {
            if visited.contains(&kid.id) {
                continue;
            }
            children.push(materialize(kid, children_of, leaves_by_folder, visited));
        }
    }
    sort_nodes(&mut children);

    FolderNode {
        id: row.id,
        name: row.name.clone(),
        parent_id: row.parent_id,
        sort_order: row.sort_order,
        children,
        leaves: leaves_by_folder.remove(&row.id).unwrap_or_default(),
    }
}

fn sort_nodes(nodes: &mut [FolderNode]) {
    nodes.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| locale_cmp(&a.name, &b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

thread_local! {
    // Chinese collation orders Han names by pinyin.
    static COLLATOR: Option<Collator> = Collator::try_new(&locale!("zh").into(), CollatorOptions::new())
        .map_err(|error| tracing::warn!(error = %error, "collator unavailable, using case folding"))
        .ok();
}

/// Locale-aware name ordering. Names equal up to case put lowercase first.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    COLLATOR
        .with(|collator| match collator {
            Some(collator) => collator.compare(a, b),
            None => folded_cmp(a, b),
        })
        .then_with(|| b.cmp(a))
}

fn folded_cmp(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Returns `root` and every folder below it.
pub fn collect_descendant_ids(rows: &[FolderRow], root: i64) -> HashSet<i64> {
    let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        if let Some(parent_id) = row.parent_id {
            children_of.entry(parent_id).or_default().push(row.id);
        }
    }

    let mut ids = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        if let Some(kids) = children_of.get(&current) {
            for kid in kids {
                if ids.insert(*kid) {
                    queue.push_back(*kid);
                }
            }
        }
    }
    ids
}

pub fn collect_descendants_only(rows: &[FolderRow], root: i64) -> HashSet<i64> {
    let mut ids = collect_descendant_ids(rows, root);
    ids.remove(&root);
    ids
}

pub fn strip_html(markup: &str) -> String {
    let without_tags = TAG_RE.replace_all(markup, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn snippet_of(markup: &str) -> String {
    strip_html(markup).chars().take(SNIPPET_CHARS).collect()
}

pub fn document_summary(detail: &DocumentDetail) -> LeafSummary {
    LeafSummary {
        id: detail.id,
        folder_id: detail.folder_id,
        title: detail.title.clone(),
        snippet: snippet_of(&detail.content),
        updated_at: detail.updated_at,
        size: detail.content.chars().count(),
    }
}

pub fn template_summary(template: &TemplateRecord) -> LeafSummary {
    LeafSummary {
        id: template.id,
        folder_id: template.folder_id,
        title: template.name.clone(),
        snippet: snippet_of(&template.content),
        updated_at: template.updated_at,
        size: template.content.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(id: i64, name: &str, parent_id: Option<i64>, sort_order: i64) -> FolderRow {
        FolderRow {
            id,
            name: name.to_string(),
            parent_id,
            sort_order,
        }
    }

    fn leaf(id: i64, folder_id: Option<i64>) -> LeafSummary {
        LeafSummary {
            id,
            folder_id,
            title: format!("doc-{}", id),
            snippet: String::new(),
            updated_at: Utc::now(),
            size: 0,
        }
    }

    fn names(nodes: &[FolderNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn nests_children_and_attaches_leaves() {
        let rows = vec![row(1, "root", None, 1), row(2, "child", Some(1), 1), row(3, "grandchild", Some(2), 1)];
        let leaves = vec![leaf(10, Some(2)), leaf(11, None), leaf(12, Some(3)), leaf(13, Some(2))];

        let tree = build_tree(&rows, &leaves);
        assert_eq!(tree.len(), 1);
        let child = &tree[0].children[0];
        assert_eq!(child.name, "child");
        assert_eq!(child.leaves.iter().map(|l| l.id).collect::<Vec<_>>(), vec![10, 13]);
        assert_eq!(child.children[0].leaves[0].id, 12);
        assert!(tree[0].leaves.is_empty());
    }

    #[test]
    fn building_twice_yields_identical_forest() {
        let rows = vec![row(1, "b", None, 2), row(2, "a", None, 2), row(3, "x", Some(1), 0), row(4, "y", Some(1), 0)];
        let leaves = vec![leaf(1, Some(3)), leaf(2, Some(1))];
        assert_eq!(build_tree(&rows, &leaves), build_tree(&rows, &leaves));
    }

    #[test]
    fn orphan_rows_become_roots() {
        let rows = vec![row(1, "kept", None, 1), row(2, "orphan", Some(99), 2)];
        let tree = build_tree(&rows, &[]);
        assert_eq!(names(&tree), vec!["kept", "orphan"]);
        assert_eq!(tree[1].parent_id, Some(99));
    }

    #[test]
    fn equal_sort_order_falls_back_to_name_comparison() {
        let rows = vec![
            row(1, "cherry", None, 5),
            row(2, "Banana", None, 5),
            row(3, "apple", None, 5),
            row(4, "zulu", None, 1),
        ];
        let tree = build_tree(&rows, &[]);
        assert_eq!(names(&tree), vec!["zulu", "apple", "Banana", "cherry"]);
    }

    #[test]
    fn ordering_applies_recursively() {
        let rows = vec![row(1, "root", None, 0), row(2, "second", Some(1), 2), row(3, "first", Some(1), 1)];
        let tree = build_tree(&rows, &[]);
        assert_eq!(names(&tree[0].children), vec!["first", "second"]);
    }

    #[test]
    fn parent_cycles_do_not_lose_rows() {
        let rows = vec![row(1, "a", Some(2), 0), row(2, "b", Some(1), 0), row(3, "self", Some(3), 0)];
        let tree = build_tree(&rows, &[]);
        let mut seen = Vec::new();
        fn walk(nodes: &[FolderNode], seen: &mut Vec<i64>) {
            for node in nodes {
                seen.push(node.id);
                walk(&node.children, seen);
            }
        }
        walk(&tree, &mut seen);
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn locale_cmp_ignores_case_first() {
        assert_eq!(locale_cmp("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_cmp("a", "A"), Ordering::Less);
        assert_eq!(locale_cmp("same", "same"), Ordering::Equal);
    }

    #[test]
    fn accented_and_han_names_sort_by_collation() {
        let rows = vec![
            row(1, "Zebra", None, 0),
            row(2, "Éclair", None, 0),
            row(3, "张三", None, 0),
            row(4, "阿里", None, 0),
        ];
        let tree = build_tree(&rows, &[]);
        let order = names(&tree);
        let position = |name: &str| order.iter().position(|candidate| *candidate == name).expect("present");
        assert!(position("Éclair") < position("Zebra"), "{:?}", order);
        assert!(position("阿里") < position("张三"), "{:?}", order);
    }

    #[test]
    fn identical_names_fall_back_to_id() {
        let rows = vec![row(7, "Notes", None, 0), row(3, "Notes", None, 0)];
        let tree = build_tree(&rows, &[]);
        assert_eq!(tree.iter().map(|node| node.id).collect::<Vec<_>>(), vec![3, 7]);
    }

    #[test]
    fn collects_descendants() {
        let rows = vec![row(1, "a", None, 0), row(2, "b", Some(1), 0), row(3, "c", Some(2), 0), row(4, "d", None, 0)];
        assert_eq!(collect_descendant_ids(&rows, 1), HashSet::from([1, 2, 3]));
        assert_eq!(collect_descendants_only(&rows, 1), HashSet::from([2, 3]));
        assert!(collect_descendants_only(&rows, 4).is_empty());
    }

    #[test]
    fn strips_markup_for_snippets() {
        assert_eq!(strip_html("<p>Hello</p><p>  big&nbsp;world </p>"), "Hello big world");
        assert_eq!(strip_html("a &lt;b&gt; &amp; c"), "a <b> & c");
        let long = format!("<p>{}</p>", "x".repeat(500));
        assert_eq!(snippet_of(&long).chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn summary_size_counts_raw_markup() {
        let now = Utc::now();
        let detail = DocumentDetail {
            id: 1,
            folder_id: Some(2),
            title: "t".to_string(),
            content: "<b>é</b>".to_string(),
            created_at: now,
            updated_at: now,
        };
        let summary = document_summary(&detail);
        assert_eq!(summary.size, 8);
        assert_eq!(summary.snippet, "é");
        assert_eq!(summary.folder_id, Some(2));
    }
}
