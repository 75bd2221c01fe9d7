//! Presentational renderer for generated briefings.
//!
//! The generation template emits a small markdown subset: `#`/`##`/`###`
//! headings, `**bold**` and `*italic*` emphasis, and `-`/`*` bullet lists.
//! This module renders that subset into a paginated plain-text document:
//! headings become underlined lines, bullets become `•` items, emphasis
//! markers are stripped, and pages are separated by form feeds. Anything
//! else passes through as text.

/// Lines per rendered page.
const LINES_PER_PAGE: usize = 54;

pub fn render_document(markdown: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for raw in markdown.lines() {
        let line = raw.trim_end();

        if let Some(text) = line.strip_prefix("# ") {
            let text = strip_emphasis(text);
            lines.push(text.to_uppercase());
            lines.push("=".repeat(text.chars().count().max(1)));
        } else if let Some(text) = line.strip_prefix("## ") {
            let text = strip_emphasis(text);
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(text.clone());
            lines.push("-".repeat(text.chars().count().max(1)));
        } else if let Some(text) = line.strip_prefix("### ") {
            let text = strip_emphasis(text);
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(text);
        } else if let Some(text) = line
            .trim_start()
            .strip_prefix("- ")
            .or_else(|| line.trim_start().strip_prefix("* "))
        {
            lines.push(format!("  • {}", strip_emphasis(text)));
        } else if line == "---" {
            lines.push("-".repeat(40));
        } else {
            lines.push(strip_emphasis(line));
        }
    }

    paginate(&lines)
}

/// Remove `**bold**` and `*italic*` markers, keeping the enclosed text.
/// Unbalanced markers are left alone.
fn strip_emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('*') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];

        let (marker, inner_start) = if after.starts_with("**") {
            ("**", 2)
        } else {
            ("*", 1)
        };

        match after[inner_start..].find(marker) {
            Some(end) => {
                out.push_str(&after[inner_start..inner_start + end]);
                rest = &after[inner_start + end + marker.len()..];
            }
            None => {
                // No closing marker; emit as-is.
                out.push_str(after);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn paginate(lines: &[String]) -> String {
    let mut pages: Vec<String> = Vec::new();
    for page_lines in lines.chunks(LINES_PER_PAGE) {
        pages.push(page_lines.join("\n"));
    }
    pages.join("\n\u{0C}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_are_underlined() {
        let out = render_document("# Briefing: Weekly\n\n## Recent activity\nAll good.");
        assert!(out.contains("BRIEFING: WEEKLY\n================"));
        assert!(out.contains("Recent activity\n---------------"));
        assert!(out.contains("All good."));
    }

    #[test]
    fn bullets_are_rendered() {
        let out = render_document("## Planned tasks\n- ship the release\n* write docs");
        assert!(out.contains("  • ship the release"));
        assert!(out.contains("  • write docs"));
    }

    #[test]
    fn emphasis_markers_are_stripped() {
        assert_eq!(strip_emphasis("a **bold** and *subtle* word"), "a bold and subtle word");
        assert_eq!(strip_emphasis("no markers"), "no markers");
        assert_eq!(strip_emphasis("dangling *star"), "dangling *star");
    }

    #[test]
    fn long_documents_are_paginated() {
        let body: String = (0..200)
            .map(|i| format!("line {}\n", i))
            .collect();
        let out = render_document(&body);
        let pages = out.split('\u{0C}').count();
        assert_eq!(pages, 200_usize.div_ceil(54));
    }

    #[test]
    fn unknown_markup_passes_through() {
        let out = render_document("plain paragraph with `code` and [link](x)");
        assert!(out.contains("plain paragraph with `code` and [link](x)"));
    }
}
