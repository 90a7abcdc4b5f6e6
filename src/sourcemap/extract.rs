//! Materializing original sources from a source map's `sourcesContent`.

use crate::{report, sourcemap::SourceMapV3, utils};
use serde::Serialize;
use std::collections::BTreeSet;

/// Bundler-specific scheme prefixes stripped from source paths.
const KNOWN_SCHEMES: &[&str] = &["webpack", "vite", "rollup", "turbopack", "file", "ng"];

/// Controls which recovered sources are kept.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Glob patterns for paths that are skipped, `node_modules/*` by default.
    pub exclude: Vec<String>,
    /// Package names that are first-party even though they live under
    /// `node_modules` in the recovered tree.
    pub internal_packages: BTreeSet<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { exclude: vec!["node_modules/*".to_string()], internal_packages: BTreeSet::new() }
    }
}

/// One recovered source file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSource {
    /// Normalized forward-slash relative path.
    pub path: String,
    pub content: String,
    /// The raw `sources[]` entry the path was derived from.
    pub original_path: String,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub total_sources: usize,
    pub extracted_count: usize,
    pub skipped_count: usize,
    pub null_content_count: usize,
    pub source_root: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionError {
    pub message: String,
}

/// The result of materializing one source map.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    pub sources: Vec<ExtractedSource>,
    pub metadata: ExtractionMetadata,
    pub errors: Vec<ExtractionError>,
}

/// Extracts `{path, content}` tuples from a validated source map.
///
/// Every `sources[]` entry is accounted for exactly once:
/// `extracted + skipped + null_content == sources.len()`.
pub fn extract_sources(
    map: &SourceMapV3,
    bundle_url: &str,
    options: &ExtractOptions,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    outcome.metadata.total_sources = map.sources.len();
    outcome.metadata.source_root = map.source_root.clone();

    let Some(contents) = map.sources_content.as_ref().filter(|c| !c.is_empty()) else {
        outcome.errors.push(ExtractionError { message: "no sourcesContent".to_string() });
        outcome.metadata.null_content_count = map.sources.len();
        return outcome;
    };

    let excludes: Vec<glob::Pattern> =
        options.exclude.iter().filter_map(|p| glob::Pattern::new(p).ok()).collect();

    let mut seen = BTreeSet::new();
    for (i, source) in map.sources.iter().enumerate() {
        let content = contents.get(i).and_then(|c| c.as_ref());
        let Some(content) = content else {
            outcome.metadata.null_content_count += 1;
            continue;
        };

        let Some(original_path) = source.as_ref().filter(|s| !s.is_empty()) else {
            trace!("skipping unnamed source {i} of {bundle_url}");
            outcome.metadata.skipped_count += 1;
            continue;
        };

        let path = normalize_source_path(original_path, map.source_root.as_deref());
        if path.is_empty() {
            outcome.metadata.skipped_count += 1;
            continue;
        }

        if is_excluded(&path, &excludes, &options.internal_packages) {
            outcome.metadata.skipped_count += 1;
            continue;
        }

        // identical paths can appear more than once in concatenated maps
        if !seen.insert(path.clone()) {
            outcome.metadata.skipped_count += 1;
            continue;
        }

        outcome.sources.push(ExtractedSource {
            path,
            content: content.clone(),
            original_path: original_path.clone(),
        });
        outcome.metadata.extracted_count += 1;
    }

    report::sources_extracted(
        bundle_url,
        outcome.metadata.extracted_count,
        outcome.metadata.skipped_count,
    );
    outcome
}

/// Normalizes a raw `sources[]` entry into a forward-slash relative path.
///
/// Strips bundler scheme+authority prefixes (`webpack://project/`,
/// `vite:///` etc.) and leading `./`, then prepends `sourceRoot`.
pub fn normalize_source_path(raw: &str, source_root: Option<&str>) -> String {
    let mut path = raw.trim();

    if let Some(idx) = path.find("://") {
        let scheme = &path[..idx];
        if KNOWN_SCHEMES.contains(&scheme) || scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            let rest = &path[idx + 3..];
            // the segment before the first `/` is the authority (webpack
            // puts the project name there); `webpack:///src` has none
            path = match rest.split_once('/') {
                Some((_, tail)) => tail,
                None => rest,
            };
        }
    }

    let mut path = path.trim_start_matches('/');
    while let Some(stripped) = path.strip_prefix("./") {
        path = stripped;
    }

    let joined = match source_root.map(|r| r.trim_matches('/')).filter(|r| !r.is_empty()) {
        Some(root) => format!("{root}/{path}"),
        None => path.to_string(),
    };

    utils::normalize_slash_path(&joined)
}

fn is_excluded(
    path: &str,
    excludes: &[glob::Pattern],
    internal_packages: &BTreeSet<String>,
) -> bool {
    if !excludes.iter().any(|p| p.matches(path)) {
        return false;
    }
    // whitelisted internal packages survive the node_modules exclusion
    if let Some(rest) = path.strip_prefix("node_modules/") {
        let mut segments = rest.splitn(3, '/');
        let first = segments.next().unwrap_or_default();
        let package = if first.starts_with('@') {
            match segments.next() {
                Some(second) => format!("{first}/{second}"),
                None => first.to_string(),
            }
        } else {
            first.to_string()
        };
        if internal_packages.contains(&package) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(sources: Vec<Option<&str>>, contents: Vec<Option<&str>>) -> SourceMapV3 {
        SourceMapV3 {
            version: 3,
            sources: sources.into_iter().map(|s| s.map(str::to_owned)).collect(),
            sources_content: Some(
                contents.into_iter().map(|c| c.map(str::to_owned)).collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn normalizes_bundler_prefixes() {
        assert_eq!(normalize_source_path("webpack://app/./src/index.ts", None), "src/index.ts");
        assert_eq!(normalize_source_path("webpack:///src/main.ts", None), "src/main.ts");
        assert_eq!(normalize_source_path("./src/a.ts", None), "src/a.ts");
        assert_eq!(normalize_source_path("vite://deps/chunk.js", None), "chunk.js");
    }

    #[test]
    fn applies_source_root() {
        assert_eq!(normalize_source_path("a.ts", Some("packages/app/")), "packages/app/a.ts");
    }

    #[test]
    fn counts_add_up() {
        let map = map_with(
            vec![
                Some("webpack://app/src/kept.ts"),
                Some("webpack://app/node_modules/react/index.js"),
                Some("webpack://app/src/null.ts"),
            ],
            vec![Some("export {}"), Some("module.exports = {}"), None],
        );
        let outcome = extract_sources(&map, "https://example.com/b.js", &ExtractOptions::default());
        let meta = &outcome.metadata;
        assert_eq!(meta.extracted_count, 1);
        assert_eq!(meta.skipped_count, 1);
        assert_eq!(meta.null_content_count, 1);
        assert_eq!(
            meta.extracted_count + meta.skipped_count + meta.null_content_count,
            meta.total_sources
        );
        assert_eq!(outcome.sources[0].path, "src/kept.ts");
    }

    #[test]
    fn internal_packages_survive_exclusion() {
        let map = map_with(
            vec![Some("webpack://app/node_modules/@acme/ui/src/button.tsx")],
            vec![Some("export const Button = 1;")],
        );
        let mut options = ExtractOptions::default();
        options.internal_packages.insert("@acme/ui".to_string());
        let outcome = extract_sources(&map, "https://example.com/b.js", &options);
        assert_eq!(outcome.metadata.extracted_count, 1);
        assert_eq!(outcome.sources[0].path, "node_modules/@acme/ui/src/button.tsx");
    }

    #[test]
    fn missing_sources_content_is_a_single_error() {
        let map = SourceMapV3 {
            version: 3,
            sources: vec![Some("a.ts".to_string()), Some("b.ts".to_string())],
            ..Default::default()
        };
        let outcome = extract_sources(&map, "https://example.com/b.js", &ExtractOptions::default());
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "no sourcesContent");
        assert_eq!(outcome.metadata.null_content_count, 2);
    }

    #[test]
    fn duplicate_paths_are_skipped() {
        let map = map_with(
            vec![Some("src/a.ts"), Some("src/a.ts")],
            vec![Some("one"), Some("two")],
        );
        let outcome = extract_sources(&map, "https://example.com/b.js", &ExtractOptions::default());
        assert_eq!(outcome.metadata.extracted_count, 1);
        assert_eq!(outcome.metadata.skipped_count, 1);
        assert_eq!(outcome.sources[0].content, "one");
    }
}
