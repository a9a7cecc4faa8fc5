//! HTML to plain-text extraction for indexed pages.
//!
//! Picks the most content-like root (`article`, then `main`, then `body`),
//! walks its block elements in document order and joins their collapsed
//! text with blank lines. Scripts, styles and navigation are skipped.

use scraper::{ElementRef, Html, Selector};

/// Text pulled out of an HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "template", "noscript", "svg", "nav", "header", "footer", "form",
];

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td", "th", "dt", "dd",
    "figcaption",
];

pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = pick_root(&document);
    let mut blocks: Vec<String> = Vec::new();
    for element in root.descendants().filter_map(ElementRef::wrap) {
        let tag = element.value().name();
        if !BLOCK_TAGS.contains(&tag) || has_skipped_ancestor(element) {
            continue;
        }
        // Nested blocks (`li > p`) are recorded once, at the innermost level
        if element
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|d| BLOCK_TAGS.contains(&d.value().name()))
        {
            continue;
        }
        let text = if tag == "pre" {
            collapse_newlines(&element.text().collect::<String>())
        } else {
            collapse_whitespace(&element.text().collect::<String>())
        };
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    // Pages without block markup still carry text in the root itself
    if blocks.is_empty() {
        let text = visible_text(root);
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    ExtractedPage {
        title,
        text: blocks.join("\n\n"),
    }
}

fn pick_root(document: &Html) -> ElementRef<'_> {
    ["article", "main", "body"]
        .iter()
        .filter_map(|name| Selector::parse(name).ok())
        .find_map(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element())
}

fn has_skipped_ancestor(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| SKIPPED_TAGS.contains(&a.value().name()))
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            let inside_skipped = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| SKIPPED_TAGS.contains(&a.value().name()));
            if !inside_skipped {
                raw.push_str(text);
                raw.push(' ');
            }
        }
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

fn collapse_newlines(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
