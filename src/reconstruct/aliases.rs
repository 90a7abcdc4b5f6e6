//! Inferring import aliases for the reconstructed project.
//!
//! Three sources feed the alias table: `tsconfig.json` paths, workspace
//! package folders, and overlap between unresolvable import paths and the
//! recovered file tree. Existing aliases always win. The final list is
//! sorted by decreasing specificity because the downstream resolver is
//! first-match-wins.

use crate::{
    analyze::{SourceTreeAnalysis, SpecifierKind},
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

/// One alias entry; `path` is relative to the project root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasMapping {
    pub alias: String,
    pub path: String,
}

impl AliasMapping {
    pub fn new(alias: impl Into<String>, path: impl Into<String>) -> Self {
        Self { alias: alias.into(), path: path.into() }
    }
}

/// Overlap evidence below this count is discarded as coincidence.
const MIN_OVERLAP_EVIDENCE: usize = 2;

fn segment_count(alias: &str) -> usize {
    alias.split('/').filter(|s| !s.is_empty()).count()
}

/// Sorts by decreasing segment count, then decreasing string length.
///
/// First-match resolution requires more-specific aliases to precede
/// less-specific ones.
pub fn sort_aliases(aliases: &mut [AliasMapping]) {
    aliases.sort_by(|a, b| {
        segment_count(&b.alias)
            .cmp(&segment_count(&a.alias))
            .then_with(|| b.alias.len().cmp(&a.alias.len()))
            .then_with(|| a.alias.cmp(&b.alias))
    });
}

/// Extracts alias mappings from a `tsconfig.json` document.
///
/// Wildcard keys subsume non-wildcard keys with the same prefix; targets
/// resolve against `baseUrl`, preferring ones that exist under `root` and
/// falling back to the first declared target.
pub fn parse_tsconfig_paths(tsconfig: &str, root: &Path) -> Vec<AliasMapping> {
    let Ok(document) = serde_json::from_str::<serde_json::Value>(&utils::strip_jsonc(tsconfig))
    else {
        debug!("tsconfig.json did not parse; skipping path aliases");
        return Vec::new();
    };
    let options = document.get("compilerOptions");
    let base_url = options
        .and_then(|o| o.get("baseUrl"))
        .and_then(|v| v.as_str())
        .unwrap_or(".")
        .trim_start_matches("./")
        .trim_end_matches('/');
    let Some(paths) = options.and_then(|o| o.get("paths")).and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let wildcard_prefixes: BTreeSet<String> = paths
        .keys()
        .filter_map(|k| k.strip_suffix("/*"))
        .map(str::to_owned)
        .collect();

    let mut aliases = Vec::new();
    for (key, targets) in paths {
        let (alias, wildcard) = match key.strip_suffix("/*") {
            Some(prefix) => (prefix, true),
            None => (key.as_str(), false),
        };
        if alias.is_empty() {
            continue;
        }
        if !wildcard && wildcard_prefixes.contains(alias) {
            continue;
        }

        let declared: Vec<String> = targets
            .as_array()
            .map(|list| {
                list.iter().filter_map(|t| t.as_str()).map(normalize_target).collect()
            })
            .unwrap_or_default();
        if declared.is_empty() {
            continue;
        }

        let resolved = declared
            .iter()
            .find(|target| {
                let joined = join_base(base_url, target);
                root.join(&joined).exists()
            })
            .unwrap_or(&declared[0]);

        aliases.push(AliasMapping::new(alias, format!("./{}", join_base(base_url, resolved))));
    }

    aliases
}

fn normalize_target(target: &str) -> String {
    let target = target.strip_suffix("/*").unwrap_or(target);
    let target = target.strip_suffix('*').unwrap_or(target);
    utils::normalize_slash_path(target)
}

fn join_base(base_url: &str, target: &str) -> String {
    if base_url.is_empty() || base_url == "." {
        target.to_string()
    } else {
        utils::normalize_slash_path(&format!("{base_url}/{target}"))
    }
}

/// Returns every package name imported bare anywhere in the tree.
fn bare_imported_packages(analysis: &SourceTreeAnalysis) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for file in analysis.files.values() {
        for import in &file.imports {
            if let SpecifierKind::Bare(bare) = &import.kind {
                out.insert(bare.package_name());
            }
        }
    }
    out
}

/// Detects workspace package folders that sources import bare.
///
/// A directory counts as a package when it has a `src/`, an index file or a
/// `package.json`. An alias is added only when the name is not already a
/// declared dependency and at least one source imports it. A scoped
/// dependency with a matching unscoped folder maps `@scope/name` to the
/// folder (or its `src/`).
pub fn detect_workspace_aliases(
    root: &Path,
    analysis: &SourceTreeAnalysis,
    declared_deps: &BTreeSet<String>,
) -> Vec<AliasMapping> {
    let imported = bare_imported_packages(analysis);
    let mut aliases = Vec::new();

    let Ok(entries) = std::fs::read_dir(root) else { return aliases };
    let mut dirs: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| {
            name != "node_modules" && !name.starts_with('.') && !name.starts_with('_')
        })
        .collect();
    dirs.sort();

    for name in dirs {
        let dir = root.join(&name);
        let has_src = dir.join("src").is_dir();
        let has_index = utils::JS_EXTENSIONS.iter().any(|ext| dir.join(format!("index.{ext}")).is_file());
        let has_manifest = dir.join("package.json").is_file();
        if !(has_src || has_index || has_manifest) {
            continue;
        }

        let target = if has_src && !has_index {
            format!("./{name}/src")
        } else {
            format!("./{name}")
        };

        if !declared_deps.contains(&name) && imported.contains(&name) {
            aliases.push(AliasMapping::new(name.clone(), target.clone()));
        }

        // a scoped dependency with a matching unscoped folder is the
        // workspace copy of that package
        for dep in declared_deps {
            if let Some((_, unscoped)) = dep.strip_prefix('@').and_then(|d| d.split_once('/')) {
                if unscoped == name && imported.contains(dep) {
                    aliases.push(AliasMapping::new(dep.clone(), target.clone()));
                }
            }
        }
    }

    aliases
}

/// Infers aliases from overlap between unresolved import paths and the
/// file tree: an import `A/B/C` with a source file at `D/B/C.*` suggests
/// `A -> D`. Evidence below [`MIN_OVERLAP_EVIDENCE`] matches is dropped.
pub fn infer_overlap_aliases(
    analysis: &SourceTreeAnalysis,
    resolved_aliases: &[AliasMapping],
    declared_deps: &BTreeSet<String>,
) -> Vec<AliasMapping> {
    let known: BTreeSet<&str> = resolved_aliases.iter().map(|a| a.alias.as_str()).collect();
    // (alias prefix -> directory -> evidence count)
    let mut evidence: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for file in analysis.files.values() {
        for import in &file.imports {
            let SpecifierKind::Bare(bare) = &import.kind else { continue };
            let package = bare.package_name();
            let Some(subpath) = &bare.subpath else { continue };
            if declared_deps.contains(&package) || known.contains(package.as_str()) {
                continue;
            }

            let suffix_variants: Vec<String> = utils::JS_EXTENSIONS
                .iter()
                .map(|ext| format!("{subpath}.{ext}"))
                .chain(std::iter::once(format!("{subpath}/index.ts")))
                .collect();
            for path in analysis.files.keys() {
                for suffix in &suffix_variants {
                    if let Some(prefix) = path.strip_suffix(suffix) {
                        if prefix.is_empty() || prefix.ends_with('/') {
                            let dir = prefix.trim_end_matches('/').to_string();
                            *evidence
                                .entry(package.clone())
                                .or_default()
                                .entry(dir)
                                .or_default() += 1;
                        }
                    }
                }
            }
        }
    }

    let mut aliases = Vec::new();
    for (package, dirs) in evidence {
        let Some((dir, count)) = dirs.into_iter().max_by_key(|(_, count)| *count) else {
            continue;
        };
        if count < MIN_OVERLAP_EVIDENCE {
            trace!("discarding low-confidence alias {package} ({count} matches)");
            continue;
        }
        let path = if dir.is_empty() { ".".to_string() } else { format!("./{dir}") };
        aliases.push(AliasMapping::new(package, path));
    }
    aliases
}

/// Runs all three strategies and merges them with existing-alias
/// precedence, returning the table in resolver order.
pub fn infer_aliases(
    root: &Path,
    analysis: &SourceTreeAnalysis,
    existing: &[AliasMapping],
    declared_deps: &BTreeSet<String>,
) -> Vec<AliasMapping> {
    let mut merged: Vec<AliasMapping> = Vec::new();
    let mut push_all = |source: Vec<AliasMapping>, merged: &mut Vec<AliasMapping>| {
        for alias in source {
            if !merged.iter().any(|a| a.alias == alias.alias) {
                merged.push(alias);
            }
        }
    };

    push_all(existing.to_vec(), &mut merged);

    let tsconfig_path = root.join("tsconfig.json");
    if let Ok(tsconfig) = std::fs::read_to_string(&tsconfig_path) {
        push_all(parse_tsconfig_paths(&tsconfig, root), &mut merged);
    }

    push_all(detect_workspace_aliases(root, analysis, declared_deps), &mut merged);
    let overlap = infer_overlap_aliases(analysis, &merged, declared_deps);
    push_all(overlap, &mut merged);

    sort_aliases(&mut merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze_sources;

    fn tree(files: &[(&str, &str)]) -> SourceTreeAnalysis {
        let sources: Vec<(String, String)> =
            files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect();
        analyze_sources(&sources)
    }

    #[test]
    fn sorts_by_specificity() {
        let mut aliases = vec![
            AliasMapping::new("foo", "p1"),
            AliasMapping::new("foo/bar", "p2"),
            AliasMapping::new("foo/bar/baz", "p3"),
        ];
        sort_aliases(&mut aliases);
        let order: Vec<&str> = aliases.iter().map(|a| a.alias.as_str()).collect();
        assert_eq!(order, vec!["foo/bar/baz", "foo/bar", "foo"]);

        // segment count beats raw length
        let mut aliases = vec![
            AliasMapping::new("averylongaliasname", "p1"),
            AliasMapping::new("a/b", "p2"),
        ];
        sort_aliases(&mut aliases);
        assert_eq!(aliases[0].alias, "a/b");
    }

    #[test]
    fn parses_tsconfig_wildcards() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        let tsconfig = r##"{
            // project config
            "compilerOptions": {
                "baseUrl": ".",
                "paths": {
                    "@/*": ["src/*"],
                    "@": ["src/other"],
                    "#lib/*": ["src/lib/*", "missing/lib/*"],
                }
            }
        }"##;
        let aliases = parse_tsconfig_paths(tsconfig, dir.path());
        assert_eq!(aliases.len(), 2);
        assert!(aliases.contains(&AliasMapping::new("@", "./src")));
        assert!(aliases.contains(&AliasMapping::new("#lib", "./src/lib")));
    }

    #[test]
    fn tsconfig_falls_back_to_declared_target() {
        let dir = tempfile::tempdir().unwrap();
        let tsconfig = r#"{"compilerOptions": {"paths": {"@app/*": ["apps/web/*"]}}}"#;
        let aliases = parse_tsconfig_paths(tsconfig, dir.path());
        assert_eq!(aliases, vec![AliasMapping::new("@app", "./apps/web")]);
    }

    #[test]
    fn workspace_folders_become_aliases_when_imported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ui/src")).unwrap();
        std::fs::create_dir_all(dir.path().join("unused-lib/src")).unwrap();
        std::fs::create_dir_all(dir.path().join("_server")).unwrap();

        let analysis = tree(&[("app.ts", "import { Button } from 'ui';")]);
        let aliases = detect_workspace_aliases(dir.path(), &analysis, &BTreeSet::new());
        assert_eq!(aliases, vec![AliasMapping::new("ui", "./ui/src")]);
    }

    #[test]
    fn scoped_dep_maps_to_unscoped_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("design/src")).unwrap();

        let analysis = tree(&[("app.ts", "import { tokens } from '@acme/design';")]);
        let deps: BTreeSet<String> = ["@acme/design".to_string()].into_iter().collect();
        let aliases = detect_workspace_aliases(dir.path(), &analysis, &deps);
        assert_eq!(aliases, vec![AliasMapping::new("@acme/design", "./design/src")]);
    }

    #[test]
    fn overlap_inference_needs_repeated_evidence() {
        let analysis = tree(&[
            ("app/a.ts", "import { x } from 'shared/utils/math';"),
            ("app/b.ts", "import { y } from 'shared/utils/strings';"),
            ("lib/utils/math.ts", "export const x = 1;"),
            ("lib/utils/strings.ts", "export const y = 2;"),
        ]);
        let aliases = infer_overlap_aliases(&analysis, &[], &BTreeSet::new());
        assert_eq!(aliases, vec![AliasMapping::new("shared", "./lib")]);
    }

    #[test]
    fn single_overlap_match_is_discarded() {
        let analysis = tree(&[
            ("app/a.ts", "import { x } from 'shared/utils/math';"),
            ("lib/utils/math.ts", "export const x = 1;"),
        ]);
        assert!(infer_overlap_aliases(&analysis, &[], &BTreeSet::new()).is_empty());
    }
}
