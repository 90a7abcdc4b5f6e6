//! Rebuilding module index files from consumer demand.
//!
//! Every relative import of a directory records which symbols that
//! directory's index must re-export. Whatever the existing index (plus its
//! transitive re-exports) does not already provide is looked up across the
//! tree and appended as grouped re-export statements. Symbols with no
//! defining file are listed in a trailing comment, never stubbed, so the
//! build fails at the right location.

use crate::{
    analyze::{FileAnalysis, SourceTreeAnalysis},
    utils,
};
use std::collections::{BTreeMap, BTreeSet};

/// Index file names probed in order.
const INDEX_STEMS: &[&str] = &["index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs"];

/// Comment that separates preserved content from reconstructed exports.
const SEPARATOR: &str = "// --- reconstructed re-exports ---";

/// A symbol a directory is expected to export, with its consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedImport {
    pub symbol: String,
    pub imported_by: Vec<String>,
    /// Only true when every consumer imports the symbol type-only.
    pub is_type_only: bool,
}

/// A planned index file write.
#[derive(Clone, Debug)]
pub struct IndexPlan {
    /// Directory the index belongs to, forward-slash relative.
    pub dir: String,
    /// Path of the index file to write.
    pub path: String,
    pub content: String,
    pub unresolved: Vec<ExpectedImport>,
    pub warnings: Vec<String>,
}

/// The full set of planned index writes for a tree.
#[derive(Clone, Debug, Default)]
pub struct IndexReconstruction {
    pub plans: Vec<IndexPlan>,
    pub warnings: Vec<String>,
}

/// Resolves what `spec` (a relative import written in `from_file`) points
/// at, as a normalized tree path without extension.
fn resolve_relative_target(from_file: &str, spec: &str) -> String {
    let dir = match from_file.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };
    utils::normalize_slash_path(&format!("{dir}/{spec}"))
}

fn is_file_import(analysis: &SourceTreeAnalysis, target: &str) -> bool {
    utils::JS_EXTENSIONS.iter().any(|ext| analysis.files.contains_key(&format!("{target}.{ext}")))
        || analysis.files.contains_key(target)
}

fn is_directory(analysis: &SourceTreeAnalysis, target: &str) -> bool {
    let prefix = format!("{target}/");
    analysis.files.keys().any(|path| path.starts_with(&prefix))
}

/// Aggregates, per imported directory, the symbols its consumers demand.
pub fn collect_expected_imports(
    analysis: &SourceTreeAnalysis,
) -> BTreeMap<String, Vec<ExpectedImport>> {
    let mut demands: BTreeMap<String, BTreeMap<String, ExpectedImport>> = BTreeMap::new();

    for (path, file) in &analysis.files {
        for import in &file.imports {
            if !matches!(import.kind, crate::analyze::SpecifierKind::Relative) {
                continue;
            }
            let target = resolve_relative_target(path, &import.source);
            if target.is_empty() || is_file_import(analysis, &target) {
                continue;
            }
            if !is_directory(analysis, &target) {
                continue;
            }

            let entry = demands.entry(target).or_default();
            let mut demand = |symbol: String, type_only: bool| {
                let expected = entry.entry(symbol.clone()).or_insert_with(|| ExpectedImport {
                    symbol,
                    imported_by: Vec::new(),
                    is_type_only: true,
                });
                if !expected.imported_by.contains(path) {
                    expected.imported_by.push(path.clone());
                }
                expected.is_type_only &= type_only;
            };

            for named in &import.named {
                demand(named.name.clone(), named.is_type_only || import.is_type_only);
            }
            if import.has_default_import {
                demand("default".to_string(), false);
            }
            // namespace imports demand the whole surface, nothing specific
        }
    }

    demands
        .into_iter()
        .map(|(dir, symbols)| (dir, symbols.into_values().collect()))
        .collect()
}

fn index_path_of(analysis: &SourceTreeAnalysis, dir: &str) -> Option<String> {
    INDEX_STEMS.iter().map(|stem| format!("{dir}/{stem}")).find(|p| analysis.files.contains_key(p))
}

/// Symbols an index already provides, following star re-exports through
/// the tree.
fn available_exports(
    analysis: &SourceTreeAnalysis,
    file_path: &str,
    visited: &mut BTreeSet<String>,
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if !visited.insert(file_path.to_string()) {
        return out;
    }
    let Some(file) = analysis.files.get(file_path) else { return out };

    out.extend(file.exports.named.iter().cloned());
    out.extend(file.exports.type_exports.iter().cloned());
    if file.exports.has_default {
        out.insert("default".to_string());
    }

    for reexport in &file.exports.reexports {
        if !reexport.star {
            continue;
        }
        let target = resolve_relative_target(file_path, &reexport.source);
        if let Some(resolved) = resolve_module_file(analysis, &target) {
            // `export *` forwards everything except the default export
            let mut nested = available_exports(analysis, &resolved, visited);
            nested.remove("default");
            out.extend(nested);
        }
    }

    out
}

/// Resolves a tree path to a module file: the path itself with a JS
/// extension, or its index file.
fn resolve_module_file(analysis: &SourceTreeAnalysis, target: &str) -> Option<String> {
    for ext in utils::JS_EXTENSIONS {
        let candidate = format!("{target}.{ext}");
        if analysis.files.contains_key(&candidate) {
            return Some(candidate);
        }
    }
    index_path_of(analysis, target)
}

fn files_directly_in<'a>(
    analysis: &'a SourceTreeAnalysis,
    dir: &str,
) -> impl Iterator<Item = (&'a String, &'a FileAnalysis)> {
    let prefix = format!("{dir}/");
    analysis.files.iter().filter(move |(path, _)| {
        path.strip_prefix(&prefix).map(|rest| !rest.contains('/')).unwrap_or(false)
    })
}

fn dirs_directly_under(analysis: &SourceTreeAnalysis, dir: &str) -> BTreeSet<String> {
    let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
    let mut out = BTreeSet::new();
    for path in analysis.files.keys() {
        if let Some(rest) = path.strip_prefix(&prefix) {
            if let Some((first, tail)) = rest.split_once('/') {
                if !tail.is_empty() {
                    out.insert(if prefix.is_empty() {
                        first.to_string()
                    } else {
                        format!("{prefix}{first}")
                    });
                }
            }
        }
    }
    out
}

/// Finds the file that exports `symbol` for directory `dir`, searching the
/// directory itself, its `src/`, sibling directories and grandparent
/// packages, in that order. Extra matches beyond the first produce a
/// warning but do not change the result.
fn find_defining_file(
    analysis: &SourceTreeAnalysis,
    dir: &str,
    symbol: &str,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let mut tiers: Vec<Vec<String>> = Vec::new();

    let index_here = index_path_of(analysis, dir);
    let own: Vec<String> = files_directly_in(analysis, dir)
        .map(|(p, _)| p.clone())
        .filter(|p| Some(p) != index_here.as_ref())
        .collect();
    tiers.push(own);
    tiers.push(files_directly_in(analysis, &format!("{dir}/src")).map(|(p, _)| p.clone()).collect());

    let parent = dir.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
    let mut sibling_tier = Vec::new();
    for sibling in dirs_directly_under(analysis, &parent) {
        if sibling == dir {
            continue;
        }
        sibling_tier.extend(files_directly_in(analysis, &sibling).map(|(p, _)| p.clone()));
        sibling_tier
            .extend(files_directly_in(analysis, &format!("{sibling}/src")).map(|(p, _)| p.clone()));
    }
    tiers.push(sibling_tier);

    if let Some((grandparent, _)) = parent.rsplit_once('/') {
        let mut package_tier = Vec::new();
        for package in dirs_directly_under(analysis, grandparent) {
            if package == parent || package == dir {
                continue;
            }
            package_tier.extend(files_directly_in(analysis, &package).map(|(p, _)| p.clone()));
            package_tier.extend(
                files_directly_in(analysis, &format!("{package}/src")).map(|(p, _)| p.clone()),
            );
        }
        tiers.push(package_tier);
    }

    let mut found: Option<String> = None;
    let mut extra = Vec::new();
    for tier in tiers {
        for path in tier {
            let Some(file) = analysis.files.get(&path) else { continue };
            if file_exports_symbol(file, symbol) {
                if found.is_none() {
                    found = Some(path);
                } else if !extra.contains(&path) {
                    extra.push(path);
                }
            }
        }
        if found.is_some() {
            break;
        }
    }

    if let (Some(found), false) = (&found, extra.is_empty()) {
        warnings.push(format!(
            "symbol `{symbol}` for {dir} is also defined in {}; using {found}",
            extra.join(", ")
        ));
    }
    found
}

fn file_exports_symbol(file: &FileAnalysis, symbol: &str) -> bool {
    file.exports.exports_symbol(symbol)
}

/// Module specifier from the index's directory to a defining file.
fn relative_module_specifier(dir: &str, file: &str) -> String {
    let without_ext = match file.rsplit_once('.') {
        Some((stem, ext)) if utils::JS_EXTENSIONS.contains(&ext) => stem,
        _ => file,
    };
    let relative = utils::relative_slash_path(dir, without_ext);
    if relative.starts_with('.') {
        relative
    } else {
        format!("./{relative}")
    }
}

/// Plans the index file for one directory given its expected imports.
fn plan_index(
    analysis: &SourceTreeAnalysis,
    dir: &str,
    expected: &[ExpectedImport],
) -> Option<IndexPlan> {
    let index_path = index_path_of(analysis, dir);
    let available = match &index_path {
        Some(path) => available_exports(analysis, path, &mut BTreeSet::new()),
        None => BTreeSet::new(),
    };

    let missing: Vec<&ExpectedImport> =
        expected.iter().filter(|e| !available.contains(&e.symbol)).collect();
    if missing.is_empty() {
        return None;
    }

    let mut warnings = Vec::new();
    // (specifier -> (value symbols, type symbols))
    let mut groups: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
    let mut unresolved = Vec::new();

    for expected in missing {
        match find_defining_file(analysis, dir, &expected.symbol, &mut warnings) {
            Some(file) => {
                let specifier = relative_module_specifier(dir, &file);
                let group = groups.entry(specifier).or_default();
                if expected.is_type_only {
                    group.1.insert(expected.symbol.clone());
                } else {
                    group.0.insert(expected.symbol.clone());
                }
            }
            None => unresolved.push(expected.clone()),
        }
    }

    if groups.is_empty() && unresolved.is_empty() {
        return None;
    }

    let path = index_path.clone().unwrap_or_else(|| format!("{dir}/index.ts"));
    let mut content = String::new();
    push_reconstructed_block(&mut content, &groups, &unresolved);

    Some(IndexPlan { dir: dir.to_string(), path, content, unresolved, warnings })
}

/// Renders the separator, the grouped export statements and the trailing
/// unresolved comment block.
fn push_reconstructed_block(
    content: &mut String,
    groups: &BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)>,
    unresolved: &[ExpectedImport],
) {
    content.push_str(SEPARATOR);
    content.push('\n');

    for (specifier, (values, types)) in groups {
        if !values.is_empty() {
            let symbols: Vec<&str> = values.iter().map(String::as_str).collect();
            content.push_str(&format!("export {{ {} }} from '{specifier}';\n", symbols.join(", ")));
        }
        if !types.is_empty() {
            let symbols: Vec<&str> = types.iter().map(String::as_str).collect();
            content
                .push_str(&format!("export type {{ {} }} from '{specifier}';\n", symbols.join(", ")));
        }
    }

    if !unresolved.is_empty() {
        content.push('\n');
        content.push_str("// Unresolved exports (no defining file found):\n");
        for expected in unresolved {
            content.push_str(&format!(
                "//   {}: imported by {}\n",
                expected.symbol,
                expected.imported_by.join(", ")
            ));
        }
    }
}

/// Plans index updates for every directory with unmet consumer demand.
///
/// Each plan's `content` holds only the reconstructed block; the writer
/// appends it to the existing index content (if any) with a blank line in
/// between.
pub fn reconstruct_indexes(analysis: &SourceTreeAnalysis) -> IndexReconstruction {
    let mut reconstruction = IndexReconstruction::default();
    for (dir, expected) in collect_expected_imports(analysis) {
        if let Some(plan) = plan_index(analysis, &dir, &expected) {
            reconstruction.warnings.extend(plan.warnings.iter().cloned());
            reconstruction.plans.push(plan);
        }
    }
    reconstruction
}

/// Second pass: barrel indexes for alias-target directories that have
/// module files but no index at all.
pub fn plan_barrel_indexes(
    analysis: &SourceTreeAnalysis,
    alias_dirs: &[String],
) -> Vec<IndexPlan> {
    let mut plans = Vec::new();
    for dir in alias_dirs {
        let dir = dir.trim_end_matches('/');
        if index_path_of(analysis, dir).is_some() {
            continue;
        }
        let stems: BTreeSet<String> = files_directly_in(analysis, dir)
            .map(|(path, _)| relative_module_specifier(dir, path))
            .collect();
        if stems.is_empty() {
            continue;
        }
        let mut content = String::new();
        for stem in &stems {
            content.push_str(&format!("export * from '{stem}';\n"));
        }
        plans.push(IndexPlan {
            dir: dir.to_string(),
            path: format!("{dir}/index.ts"),
            content,
            unresolved: Vec::new(),
            warnings: Vec::new(),
        });
    }
    plans
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
    fn aggregates_demand_per_directory() {
        let analysis = tree(&[
            ("src/a.ts", "import { bar } from './m';"),
            ("src/b.ts", "import { bar, qux } from './m';"),
            ("src/m/x.ts", "export const bar = 1;"),
        ]);
        let demands = collect_expected_imports(&analysis);
        let expected = &demands["src/m"];
        assert_eq!(expected.len(), 2);
        let bar = expected.iter().find(|e| e.symbol == "bar").unwrap();
        assert_eq!(bar.imported_by, vec!["src/a.ts", "src/b.ts"]);
    }

    #[test]
    fn file_imports_are_not_directory_demand() {
        let analysis = tree(&[
            ("src/a.ts", "import { x } from './util';"),
            ("src/util.ts", "export const x = 1;"),
        ]);
        assert!(collect_expected_imports(&analysis).is_empty());
    }

    #[test]
    fn reconstructs_grouped_sorted_index() {
        let analysis = tree(&[
            ("foo.ts", "import { bar, qux } from './m';"),
            ("m/x.ts", "export const bar = 1;"),
            ("m/y.ts", "export const qux = 2;"),
        ]);
        let reconstruction = reconstruct_indexes(&analysis);
        assert_eq!(reconstruction.plans.len(), 1);
        let plan = &reconstruction.plans[0];
        assert_eq!(plan.path, "m/index.ts");
        assert!(plan.content.contains("export { bar } from './x';"));
        assert!(plan.content.contains("export { qux } from './y';"));
        assert!(plan.unresolved.is_empty());

        // groups come out in specifier order
        let x_pos = plan.content.find("./x").unwrap();
        let y_pos = plan.content.find("./y").unwrap();
        assert!(x_pos < y_pos);
    }

    #[test]
    fn existing_exports_are_subtracted() {
        let analysis = tree(&[
            ("foo.ts", "import { bar, qux } from './m';"),
            ("m/index.ts", "export { bar } from './x';"),
            ("m/x.ts", "export const bar = 1;"),
            ("m/y.ts", "export const qux = 2;"),
        ]);
        let reconstruction = reconstruct_indexes(&analysis);
        let plan = &reconstruction.plans[0];
        assert!(!plan.content.contains("export { bar }"));
        assert!(plan.content.contains("export { qux } from './y';"));
    }

    #[test]
    fn transitive_star_reexports_count_as_available() {
        let analysis = tree(&[
            ("foo.ts", "import { bar } from './m';"),
            ("m/index.ts", "export * from './x';"),
            ("m/x.ts", "export const bar = 1;"),
        ]);
        assert!(reconstruct_indexes(&analysis).plans.is_empty());
    }

    #[test]
    fn unresolved_symbols_end_up_in_comments() {
        let analysis = tree(&[
            ("foo.ts", "import { ghost } from './m';"),
            ("m/x.ts", "export const real = 1;"),
        ]);
        let reconstruction = reconstruct_indexes(&analysis);
        let plan = &reconstruction.plans[0];
        assert_eq!(plan.unresolved.len(), 1);
        assert!(plan.content.contains("// Unresolved exports"));
        assert!(plan.content.contains("ghost: imported by foo.ts"));
        assert!(!plan.content.contains("export { ghost }"));
    }

    #[test]
    fn type_only_demand_emits_type_clause() {
        let analysis = tree(&[
            ("foo.ts", "import type { Props } from './m';\nimport { val } from './m';"),
            ("m/x.ts", "export interface Props { id: number }\nexport const val = 1;"),
        ]);
        let reconstruction = reconstruct_indexes(&analysis);
        let plan = &reconstruction.plans[0];
        assert!(plan.content.contains("export { val } from './x';"));
        assert!(plan.content.contains("export type { Props } from './x';"));
    }

    #[test]
    fn searches_src_subdirectory_and_siblings() {
        let analysis = tree(&[
            ("app/page.ts", "import { deep, wide } from './m';"),
            ("app/m/src/inner.ts", "export const deep = 1;"),
            ("app/other/wide.ts", "export const wide = 2;"),
        ]);
        let reconstruction = reconstruct_indexes(&analysis);
        let plan = &reconstruction.plans[0];
        assert!(plan.content.contains("export { deep } from './src/inner';"));
        assert!(plan.content.contains("export { wide } from '../other/wide';"));
    }

    #[test]
    fn barrel_pass_fills_indexless_alias_dirs() {
        let analysis = tree(&[
            ("ui/button.tsx", "export const Button = 1;"),
            ("ui/input.tsx", "export const Input = 1;"),
        ]);
        let plans = plan_barrel_indexes(&analysis, &["ui".to_string()]);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].path, "ui/index.ts");
        assert_eq!(plans[0].content, "export * from './button';\nexport * from './input';\n");
    }
}
