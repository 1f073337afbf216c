/*
 * escape.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Output escaping for `<%= %>` tags.

use serde::{Deserialize, Serialize};

/// The escape function applied to escaped-expression output.
///
/// The escaper is data rather than a closure so that client templates can
/// carry it in their serialized form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Escaper {
    /// HTML entity escaping of `& < > ' "`.
    #[default]
    Html,
    /// No escaping; `<%= %>` behaves like `<%- %>` apart from nullish values.
    Identity,
}

impl Escaper {
    pub fn escape(self, text: &str) -> String {
        match self {
            Escaper::Html => escape_html(text),
            Escaper::Identity => text.to_string(),
        }
    }
}

/// Replace `&`, `<`, `>`, `'` and `"` with their HTML entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("&nbsp;<script>"), "&amp;nbsp;&lt;script&gt;");
        assert_eq!(escape_html("The Jones's"), "The Jones&#39;s");
        assert_eq!(escape_html("&foo_bar;"), "&amp;foo_bar;");
        assert_eq!(escape_html("say \"hi\""), "say &quot;hi&quot;");
    }

    #[test]
    fn test_identity() {
        assert_eq!(Escaper::Identity.escape("<b>"), "<b>");
        assert_eq!(Escaper::default().escape("<b>"), "&lt;b&gt;");
    }
}
