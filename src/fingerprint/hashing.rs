//! Content hashing that survives cosmetic reformatting, plus structural
//! signatures that survive identifier minification.

use crate::utils;

/// Keywords that shape control flow; they survive minification unchanged.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "try", "catch", "finally",
    "throw", "function", "class", "new", "async", "await", "yield", "typeof", "instanceof",
    "delete", "break", "continue",
];

/// Signatures are capped so a single huge vendor chunk cannot dominate
/// memory or comparison time.
const MAX_SIGNATURE_TOKENS: usize = 2000;

/// Returns the content with comments removed, line endings normalized and
/// whitespace runs collapsed to a single space.
pub fn normalize_content(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let bytes = content.as_bytes();
    let mut i = 0;
    let mut pending_space = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' && bytes[i] != b'\r' {
                    i += 1;
                }
                pending_space = true;
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                pending_space = true;
            }
            '"' | '\'' | '`' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                let quote = bytes[i];
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                    } else if bytes[i] == quote {
                        i += 1;
                        break;
                    } else {
                        i += 1;
                    }
                }
                out.push_str(&content[start..i.min(bytes.len())]);
            }
            c if c.is_whitespace() => {
                pending_space = true;
                i += c.len_utf8();
            }
            c => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
                i += c.len_utf8();
            }
        }
    }

    out
}

/// md5 of the raw bytes.
pub fn content_hash(content: &str) -> String {
    utils::md5_hex(content)
}

/// md5 of the normalized content: stable across whitespace, comment and
/// line-ending changes.
pub fn normalized_hash(content: &str) -> String {
    utils::md5_hex(normalize_content(content))
}

/// Extracts a pipe-joined list of structural tokens from code shape:
/// control-flow keywords, call arities and string-literal size categories.
///
/// Identifier names are deliberately not part of the signature so it
/// survives minification, while differing across versions whose logic
/// differs.
pub fn structural_signature(content: &str) -> String {
    signature_tokens(content).join("|")
}

pub(crate) fn signature_tokens(content: &str) -> Vec<String> {
    let bytes = content.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() && tokens.len() < MAX_SIGNATURE_TOKENS {
        let c = bytes[i] as char;
        match c {
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            '"' | '\'' | '`' => {
                let quote = bytes[i];
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                    } else if bytes[i] == quote {
                        i += 1;
                        break;
                    } else {
                        i += 1;
                    }
                }
                let len = i.saturating_sub(start + 2);
                let category = if len < 8 {
                    "s0"
                } else if len < 32 {
                    "s1"
                } else {
                    "s2"
                };
                tokens.push(category.to_string());
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let ident = &content[start..i];
                if STRUCTURAL_KEYWORDS.contains(&ident) {
                    tokens.push(format!("k:{ident}"));
                } else if next_significant(bytes, i) == Some(b'(') {
                    tokens.push(format!("c:{}", call_arity(bytes, i)));
                }
            }
            _ => i += c.len_utf8(),
        }
    }

    tokens
}

fn next_significant(bytes: &[u8], mut i: usize) -> Option<u8> {
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    bytes.get(i).copied()
}

/// Counts top-level commas between the matching parens that follow `i`.
fn call_arity(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'(' {
        i += 1;
    }
    let mut depth = 0usize;
    let mut commas = 0usize;
    let mut any = false;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            b',' if depth == 1 => commas += 1,
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                    } else if bytes[i] == quote {
                        break;
                    } else {
                        i += 1;
                    }
                }
            }
            c if depth >= 1 && !(c as char).is_whitespace() => any = true,
            _ => {}
        }
        i += 1;
    }
    if !any && commas == 0 {
        0
    } else {
        commas + 1
    }
}

/// Heuristic minification check; any strong signal marks the content.
pub fn looks_minified(content: &str) -> bool {
    if content.len() < 200 {
        return false;
    }

    let line_count = content.lines().count().max(1);
    let avg_line_len = content.len() / line_count;
    if avg_line_len > 250 {
        return true;
    }

    let whitespace = content.chars().filter(|c| c.is_whitespace()).count();
    let whitespace_ratio = whitespace as f64 / content.len() as f64;
    if whitespace_ratio < 0.05 {
        return true;
    }

    let semicolons = content.matches(';').count();
    if semicolons / line_count > 10 {
        return true;
    }

    // minifiers rename locals to single letters; sources rarely have many
    let mut single = 0usize;
    let mut idents = 0usize;
    let mut chars = content.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let mut len = 1;
            while let Some((_, n)) = chars.peek() {
                if n.is_ascii_alphanumeric() || *n == '_' || *n == '$' {
                    len += 1;
                    chars.next();
                } else {
                    break;
                }
            }
            idents += 1;
            if len == 1 {
                single += 1;
            }
        }
    }
    // short locals alone are common in hand-written code; only flag them
    // when the lines are long enough to suggest a minifier at work
    avg_line_len > 60 && idents > 50 && single as f64 / idents as f64 > 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_hash_ignores_formatting() {
        let a = "function add(a, b) {\n  // sum\n  return a + b;\n}\n";
        let b = "function add(a,b){return a+b;}";
        assert_eq!(normalized_hash(a), normalized_hash(b));
        assert_ne!(content_hash(a), content_hash(b));
    }

    #[test]
    fn normalized_hash_preserves_string_contents() {
        let a = r#"const s = "a  b";"#;
        let b = r#"const s = "a b";"#;
        assert_ne!(normalized_hash(a), normalized_hash(b));
    }

    #[test]
    fn signature_survives_renaming() {
        let original = "function calc(first, second) { if (first) { return handle(first, second); } }";
        let minified = "function a(b,c){if(b){return d(b,c)}}";
        assert_eq!(structural_signature(original), structural_signature(minified));
    }

    #[test]
    fn signature_tracks_call_arity() {
        let tokens = signature_tokens("fn(); g(1); h(1, 2, 3);");
        assert_eq!(tokens, vec!["c:0", "c:1", "c:3"]);
    }

    #[test]
    fn signature_categorizes_strings() {
        let tokens = signature_tokens(r#"const a = "ab"; const b = "a string of medium size";"#);
        assert_eq!(tokens, vec!["s0", "s1"]);
    }

    #[test]
    fn detects_minified_content() {
        let minified = format!("var a=1;{}", "function b(c){return c+1};var d=b(a);".repeat(30));
        assert!(looks_minified(&minified));

        let readable = "function add(a, b) {\n  return a + b;\n}\n".repeat(20);
        assert!(!looks_minified(&readable));
    }
}
