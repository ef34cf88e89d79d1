//! Text utilities shared by the crawler and the workers: visible-text and
//! link extraction from HTML, overlapping chunk windows, whitespace
//! normalization, and stable content hashing.

use std::collections::HashSet;

use scraper::{Html, Node, Selector};
use sha2::{Digest, Sha256};
use url::Url;

/// Elements whose text content is never user-visible.
const NON_VISIBLE: &[&str] = &["script", "style", "noscript", "head", "template"];

/// Extract the visible text of an HTML document, one line per text node.
pub fn extract_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let doc = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();
    for node in doc.tree.nodes() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .parent()
                .and_then(|p| match p.value() {
                    Node::Element(el) => Some(NON_VISIBLE.contains(&el.name())),
                    _ => None,
                })
                .unwrap_or(false);
            if hidden {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
    }
    parts.join("\n")
}

/// Collapse all runs of whitespace to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract absolute http(s) links from a document, resolved against `base`.
/// Fragments are stripped; order of first appearance is preserved.
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    let base = match Url::parse(base) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in doc.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

/// Split text into overlapping windows of `chunk_size` characters, stepping
/// by `chunk_size - overlap`. The final window may be shorter.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

/// SHA-256 of the input as lowercase hex. Used for URL ids, page content
/// hashes, and chunk hashes.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_skips_script_and_style() {
        let html = r#"
            <html><head><title>t</title><style>.a { color: red }</style></head>
            <body><h1>Hello</h1><script>var x = 1;</script><p>World</p></body></html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn extract_links_resolves_and_dedupes() {
        let html = r#"
            <a href="/docs">docs</a>
            <a href="https://other.example/page#section">other</a>
            <a href="/docs">docs again</a>
            <a href="mailto:x@example.com">mail</a>
        "#;
        let links = extract_links(html, "https://example.com/start");
        assert_eq!(
            links,
            vec![
                "https://example.com/docs".to_string(),
                "https://other.example/page".to_string(),
            ]
        );
    }

    #[test]
    fn split_text_overlapping_windows() {
        let text = "abcdefghij"; // 10 chars
        let chunks = split_text(text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij", "ij"]);
    }

    #[test]
    fn split_text_short_input_is_one_chunk() {
        assert_eq!(split_text("abc", 100, 10), vec!["abc"]);
        assert!(split_text("", 100, 10).is_empty());
    }

    #[test]
    fn sha256_is_stable() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex("hello "));
    }

    #[test]
    fn collapse_whitespace_flattens_runs() {
        assert_eq!(collapse_whitespace("a \n\n b\t\tc"), "a b c");
    }
}
