//! Utility functions

use crate::error::{LiftError, Result};
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

/// A regex that matches a well-formed environment variable name,
/// e.g. `API_URL` but not `NODE_ENV` handling, which is filtered separately.
pub static RE_ENV_VAR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

/// A regex used to remove extra lines after span edits
pub static RE_THREE_OR_MORE_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new("\n{3,}").unwrap());

/// File extensions that are treated as ECMAScript sources.
pub const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// File extensions that are treated as stylesheet sources.
pub const CSS_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less"];

/// Returns the current time as milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

/// Returns the lowercase hex md5 digest of the input.
pub fn md5_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Returns the first `len` hex chars of the md5 digest of the input.
pub fn md5_hex_prefix(bytes: impl AsRef<[u8]>, len: usize) -> String {
    let mut digest = md5_hex(bytes);
    digest.truncate(len);
    digest
}

/// Move a range by a specified offset
pub fn range_by_offset(range: &Range<usize>, offset: isize) -> Range<usize> {
    Range {
        start: offset.saturating_add(range.start as isize) as usize,
        end: offset.saturating_add(range.end as isize) as usize,
    }
}

/// Returns `true` if the file name has one of the given extensions.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension().and_then(|ext| ext.to_str()).map(|ext| extensions.contains(&ext)).unwrap_or(false)
}

/// Returns an iterator that yields all files with the given extensions under
/// the root path, or the root itself if it matches.
///
/// This also follows symlinks.
pub fn source_files_iter<'a>(
    root: &Path,
    extensions: &'a [&'a str],
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            !e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n == "node_modules" || n.starts_with('.'))
                .unwrap_or(false)
        })
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(move |e| has_extension(e.path(), extensions))
        .map(|e| e.path().to_path_buf())
}

/// Converts a path into a forward-slash string, dropping any non-utf8 parts.
pub fn slash_path(path: &Path) -> String {
    use path_slash::PathExt;
    path.to_slash_lossy().into_owned()
}

/// Lexically normalizes a forward-slash path: collapses `.` segments, resolves
/// `..` against preceding segments and drops leading `..` segments, so the
/// result never escapes its root.
pub fn normalize_slash_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// Returns the relative slash path from `base` to `path`, both forward-slash
/// relative paths under the same root.
pub fn relative_slash_path(base: &str, path: &str) -> String {
    let base_parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let common = base_parts.iter().zip(path_parts.iter()).take_while(|(a, b)| a == b).count();
    let mut out: Vec<String> = std::iter::repeat("..".to_string()).take(base_parts.len() - common).collect();
    out.extend(path_parts[common..].iter().map(|s| s.to_string()));
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}

/// Reads the json file and deserializes it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|err| LiftError::io(err, path))?;
    let file = std::io::BufReader::new(file);
    let val: T = serde_json::from_reader(file)?;
    Ok(val)
}

/// Writes serializes the provided value to JSON and writes it to a file via a
/// sibling temp file, so concurrent readers never observe a partial write.
pub fn write_json_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LiftError::io(err, parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = fs::File::create(&tmp).map_err(|err| LiftError::io(err, &tmp))?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush().map_err(|err| LiftError::io(err, &tmp))?;
    }
    fs::rename(&tmp, path).map_err(|err| LiftError::io(err, path))?;
    Ok(())
}

/// Strips `//` and `/* */` comments plus trailing commas from a jsonc
/// document (`tsconfig.json` and friends), leaving string literals intact.
pub fn strip_jsonc(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '"' => {
                let start = i;
                i += 1;
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'"' => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                out.push_str(&input[start..i.min(bytes.len())]);
            }
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
            ',' => {
                // drop the comma if the next non-whitespace closes a scope
                let mut j = i + 1;
                while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                    j += 1;
                }
                if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                    i += 1;
                    continue;
                }
                out.push(',');
                i += 1;
            }
            _ => {
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    out
}

/// Canonicalize the path, platform-agnostic.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    dunce::canonicalize(path).map_err(|err| LiftError::io(err, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_normalize_slash_paths() {
        assert_eq!(normalize_slash_path("./src/a.ts"), "src/a.ts");
        assert_eq!(normalize_slash_path("src/../lib/b.ts"), "lib/b.ts");
        assert_eq!(normalize_slash_path("../../escape.ts"), "escape.ts");
        assert_eq!(normalize_slash_path("a//b/./c"), "a/b/c");
    }

    #[test]
    fn can_compute_relative_paths() {
        assert_eq!(relative_slash_path("src/components", "src/components/Button.ts"), "Button.ts");
        assert_eq!(relative_slash_path("src/components", "src/lib/util.ts"), "../lib/util.ts");
        assert_eq!(relative_slash_path("src", "src"), ".");
    }

    #[test]
    fn can_strip_jsonc() {
        let input = r#"{
  // line comment
  "a": 1, /* block */
  "b": "http://not-a-comment",
}"#;
        let stripped = strip_jsonc(input);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], "http://not-a-comment");
    }

    #[test]
    fn md5_is_stable() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex_prefix("abc", 12), "900150983cd2");
    }
}
