//! Extracting hashed CSS-module class names from captured stylesheets.
//!
//! css-modules emit selectors shaped like `._button_x7f2q_14` (base name,
//! content hash, line number). The scanner collects `(base, hashed)` pairs
//! so the build can map original class names onto the captured ones.
//! Selectors without the trailing line number are substrings of real
//! selectors and are not collected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words that show up after `.` in plain CSS (`margin: .5em` neighbors,
/// property-like fragments) and never name a css-modules class.
const CSS_PROPERTY_WORDS: &[&str] = &[
    "active", "after", "before", "checked", "disabled", "empty", "first", "focus", "hover",
    "important", "last", "link", "not", "root", "visited", "webkit", "moz", "ms",
];

/// The persisted class-name map (`_class-name-map.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassNameMap {
    pub version: u32,
    pub generated_at: String,
    pub source_files: Vec<String>,
    /// Base name to hashed variants; the first entry is the canonical
    /// resolution, further entries record ambiguity.
    pub mappings: BTreeMap<String, Vec<String>>,
}

impl ClassNameMap {
    /// Base names that resolved to more than one hashed variant; flagged to
    /// callers but not resolved here.
    pub fn ambiguous(&self) -> Vec<&str> {
        self.mappings
            .iter()
            .filter(|(_, hashed)| hashed.len() > 1)
            .map(|(base, _)| base.as_str())
            .collect()
    }

    pub fn canonical(&self, base: &str) -> Option<&str> {
        self.mappings.get(base).and_then(|h| h.first()).map(String::as_str)
    }
}

/// Splits a selector token into `(base, hash, line)` when it matches the
/// css-modules shape, with an optional leading underscore.
fn split_hashed_class(token: &str) -> Option<(String, &str, &str)> {
    let trimmed = token.strip_prefix('_').unwrap_or(token);
    let parts: Vec<&str> = trimmed.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let line = parts[parts.len() - 1];
    let hash = parts[parts.len() - 2];
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    let base = parts[..parts.len() - 2].join("_");
    if base.len() <= 1 {
        return None;
    }
    if CSS_PROPERTY_WORDS.contains(&base.to_ascii_lowercase().as_str()) {
        return None;
    }
    if !base.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((base, hash, line))
}

/// Scans stylesheet text for hashed class selectors, returning
/// `(base, full_hashed_name)` pairs in document order.
///
/// Case is preserved exactly as found in the CSS; class names are
/// case-sensitive and no code path lowercases them.
pub fn scan_css_classes(content: &str) -> Vec<(String, String)> {
    let bytes = content.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    let mut prev_significant = b'\0';

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'"' | b'\'' => {
                let quote = c;
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                prev_significant = quote;
            }
            b'.' => {
                // a class selector follows separators or combinators, not
                // property values or numbers
                let selector_position = matches!(
                    prev_significant,
                    b'\0' | b',' | b'{' | b'}' | b'>' | b'+' | b'~' | b'(' | b')' | b' '
                );
                i += 1;
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'-')
                {
                    i += 1;
                }
                if selector_position && i > start {
                    let token = &content[start..i];
                    if let Some((base, _, _)) = split_hashed_class(token) {
                        out.push((base, token.to_string()));
                    }
                }
                prev_significant = b'.';
            }
            c if c.is_ascii_whitespace() => {
                // the descendant combinator is whitespace, so a space keeps
                // selector position; numeric values like `.5em` are ruled
                // out by the identifier shape instead
                prev_significant = b' ';
                i += 1;
            }
            _ => {
                prev_significant = c;
                i += 1;
            }
        }
    }

    out
}

/// Builds the class-name map from captured CSS files.
///
/// `generated_at` is supplied by the caller so runs are reproducible under
/// a fixed clock.
pub fn build_class_name_map(
    css_files: &[(String, String)],
    generated_at: &str,
) -> ClassNameMap {
    let mut mappings: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut source_files = Vec::new();

    for (path, content) in css_files {
        let pairs = scan_css_classes(content);
        if pairs.is_empty() {
            continue;
        }
        source_files.push(path.clone());
        for (base, hashed) in pairs {
            let variants = mappings.entry(base).or_default();
            if !variants.contains(&hashed) {
                variants.push(hashed);
            }
        }
    }

    let map = ClassNameMap {
        version: 1,
        generated_at: generated_at.to_string(),
        source_files,
        mappings,
    };
    for base in map.ambiguous() {
        warn!("class name `{base}` maps to multiple hashed variants");
    }
    map
}
