//! Page-aligned retrievable nodes.
//!
//! Splits parsed document text into one [`Node`] per page chunk, attaching
//! the page image and markdown rendition where available. Page numbers are
//! 1-indexed and assigned in chunk order. Text and markdown excerpts are
//! independently truncated to `max_metadata_len` characters with an ellipsis
//! marker so index metadata stays bounded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Delimiter separating page chunks inside a parsed text document.
pub const PAGE_DELIMITER: &str = "---";

/// Marker appended to truncated metadata strings.
pub const ELLIPSIS: &str = "...";

/// A retrievable unit derived from roughly one page of a source document.
/// Immutable after ingestion; removed only by a full index rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// 1-indexed, monotonically assigned per document.
    pub page_num: usize,
    /// Source file path, stamped by the orchestrator after building.
    pub file_name: String,
    pub parsed_text: String,
    pub parsed_text_markdown: Option<String>,
    pub image_path: Option<PathBuf>,
}

impl Node {
    /// Metadata rendition handed to the synthesis model, one `key: value`
    /// line per populated field.
    pub fn llm_content(&self) -> String {
        let mut lines = vec![
            format!("page_num: {}", self.page_num),
            format!("file_name: {}", self.file_name),
        ];
        if let Some(ref md) = self.parsed_text_markdown {
            lines.push(format!("parsed_text_markdown: {}", md));
        }
        lines.push(format!("parsed_text: {}", self.parsed_text));
        lines.join("\n")
    }
}

/// Build nodes from parsed text documents.
///
/// Each document is split on [`PAGE_DELIMITER`] into page chunks. If
/// `image_dir` is given, its files are sorted by page number and attached by
/// chunk index; if `markdown_pages` is given, pages are attached the same
/// way. Indices past the end of either list fall back to the first element —
/// a deliberate degrade-gracefully policy, see [`pick_or_first`].
pub fn build_nodes(
    docs: &[String],
    image_dir: Option<&Path>,
    markdown_pages: Option<&[String]>,
    max_metadata_len: usize,
) -> std::io::Result<Vec<Node>> {
    let image_files = match image_dir {
        Some(dir) => Some(sorted_image_files(dir)?),
        None => None,
    };

    let chunks: Vec<&str> = docs
        .iter()
        .flat_map(|d| d.split(PAGE_DELIMITER))
        .collect();

    let mut nodes = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.iter().enumerate() {
        let image_path = image_files
            .as_deref()
            .and_then(|files| pick_or_first(files, idx))
            .cloned();

        let markdown = markdown_pages
            .and_then(|pages| pick_or_first(pages, idx))
            .map(|md| truncate_metadata(md, max_metadata_len));

        nodes.push(Node {
            id: Uuid::new_v4().to_string(),
            page_num: idx + 1,
            file_name: String::new(),
            parsed_text: truncate_metadata(chunk, max_metadata_len),
            parsed_text_markdown: markdown,
            image_path,
        });
    }

    Ok(nodes)
}

/// Index into `items`, falling back to the first element when `idx` is out
/// of range. Parsed page counts and image counts can disagree (cover pages,
/// parse quirks); serving the first page's artifact beats failing the whole
/// document.
pub fn pick_or_first<T>(items: &[T], idx: usize) -> Option<&T> {
    items.get(idx).or_else(|| items.first())
}

/// Truncate to `max_len` characters, appending [`ELLIPSIS`] when cut.
pub fn truncate_metadata(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let cut: String = text.chars().take(max_len).collect();
        format!("{}{}", cut, ELLIPSIS)
    } else {
        text.to_string()
    }
}

/// Page number parsed from a `-page-N.jpg` file name. Non-matching names
/// get page 0 and therefore sort first.
pub fn page_number_from_file_name(name: &str) -> usize {
    let Some(rest) = name.strip_suffix(".jpg") else {
        return 0;
    };
    let Some(pos) = rest.rfind("-page-") else {
        return 0;
    };
    rest[pos + "-page-".len()..].parse().unwrap_or(0)
}

fn sorted_image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();

    files.sort_by_key(|path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (page_number_from_file_name(&name), name)
    });

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn pages_are_one_indexed_and_monotone() {
        let docs = vec!["first page\n---\nsecond page\n---\nthird page".to_string()];
        let nodes = build_nodes(&docs, None, None, 512).unwrap();
        assert_eq!(nodes.len(), 3);
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.page_num, i + 1);
        }
    }

    #[test]
    fn metadata_never_exceeds_limit_plus_ellipsis() {
        let long = "x".repeat(2000);
        let docs = vec![long.clone()];
        let md = vec![long];
        let nodes = build_nodes(&docs, None, Some(&md), 512).unwrap();
        let node = &nodes[0];
        assert_eq!(node.parsed_text.chars().count(), 512 + ELLIPSIS.len());
        assert!(node.parsed_text.ends_with(ELLIPSIS));
        let md = node.parsed_text_markdown.as_ref().unwrap();
        assert_eq!(md.chars().count(), 512 + ELLIPSIS.len());
    }

    #[test]
    fn short_metadata_is_untouched() {
        let docs = vec!["short".to_string()];
        let nodes = build_nodes(&docs, None, None, 512).unwrap();
        assert_eq!(nodes[0].parsed_text, "short");
    }

    #[test]
    fn page_number_parsing() {
        assert_eq!(page_number_from_file_name("report-page-7.jpg"), 7);
        assert_eq!(page_number_from_file_name("report-page-12.jpg"), 12);
        assert_eq!(page_number_from_file_name("cover.jpg"), 0);
        assert_eq!(page_number_from_file_name("report-page-7.png"), 0);
    }

    #[test]
    fn images_sorted_by_page_with_non_matching_first() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["doc-page-2.jpg", "doc-page-1.jpg", "stray.jpg"] {
            fs::write(tmp.path().join(name), b"img").unwrap();
        }
        let files = sorted_image_files(tmp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["stray.jpg", "doc-page-1.jpg", "doc-page-2.jpg"]);
    }

    #[test]
    fn out_of_range_index_falls_back_to_first() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("doc-page-1.jpg"), b"img").unwrap();
        let docs = vec!["one\n---\ntwo".to_string()];
        let md = vec!["only page".to_string()];
        let nodes = build_nodes(&docs, Some(tmp.path()), Some(&md), 512).unwrap();
        assert_eq!(nodes.len(), 2);
        // Second chunk has no matching image/markdown; both fall back to the first.
        assert_eq!(nodes[1].image_path, nodes[0].image_path);
        assert_eq!(
            nodes[1].parsed_text_markdown.as_deref(),
            Some("only page")
        );
    }

    #[test]
    fn llm_content_includes_metadata_lines() {
        let docs = vec!["body text".to_string()];
        let mut nodes = build_nodes(&docs, None, None, 512).unwrap();
        nodes[0].file_name = "handbook.pdf".to_string();
        let content = nodes[0].llm_content();
        assert!(content.contains("page_num: 1"));
        assert!(content.contains("file_name: handbook.pdf"));
        assert!(content.contains("parsed_text: body text"));
    }
}
