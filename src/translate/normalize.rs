//! Placeholder protection for catalog text.
//! Tokens the provider must not touch (markup, URLs, e-mails, measurements,
//! SKU codes) are swapped for `<<PHn>>` tags before the request and restored after.

use regex::Regex;

/// A placeholder substitution that must be restored after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderEntry {
    pub tag: String,      // e.g. "<<PH0>>"
    pub original: String, // e.g. "https://example.com"
}

pub struct PlaceholderProtector {
    patterns: Vec<Regex>,
}

impl PlaceholderProtector {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: vec![
                // HTML tags in descriptions
                Regex::new(r"</?[a-zA-Z][^<>]*>")?,
                // URLs
                Regex::new(r"https?://[^\s,)\]<>]+")?,
                // Emails
                Regex::new(r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}")?,
                // Measurements (12kg, 2.5 mm, 1500W, 64GB, 30%)
                Regex::new(
                    r"\b\d+(?:[.,]\d+)?\s?(?:mm|cm|m|km|mg|g|kg|ml|l|W|kW|V|A|mAh|Hz|GB|TB|MB|%)(?:\b|$)",
                )?,
                // SKU / article codes (AB-1234, X200S)
                Regex::new(r"\b[A-Z]{1,5}-?\d{2,}[A-Z0-9\-]*\b")?,
            ],
        })
    }

    /// Replace protected tokens with `<<PH0>>`, `<<PH1>>`, ...
    /// Matches from all patterns are resolved left to right; on overlap the
    /// earlier, then longer, match wins.
    pub fn protect(&self, text: &str) -> (String, Vec<PlaceholderEntry>) {
        let mut spans: Vec<(usize, usize)> = self
            .patterns
            .iter()
            .flat_map(|pat| pat.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut out = String::with_capacity(text.len());
        let mut entries = Vec::new();
        let mut cursor = 0;
        for (start, end) in spans {
            if start < cursor {
                continue;
            }
            out.push_str(&text[cursor..start]);
            let tag = format!("<<PH{}>>", entries.len());
            out.push_str(&tag);
            entries.push(PlaceholderEntry {
                tag,
                original: text[start..end].to_string(),
            });
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        (out, entries)
    }

    /// Restore placeholders in the translated text.
    /// Returns the text and the number of tags the provider dropped.
    pub fn restore(&self, text: &str, entries: &[PlaceholderEntry]) -> (String, usize) {
        let mut result = text.to_string();
        let mut missing = 0;
        for entry in entries {
            if result.contains(&entry.tag) {
                result = result.replace(&entry.tag, &entry.original);
            } else {
                missing += 1;
            }
        }
        (result, missing)
    }
}
