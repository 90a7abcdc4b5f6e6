//! Removing duplicate exported identifiers from a file.
//!
//! Bundler-recovered sources sometimes carry the same symbol in several
//! `export { .. }` clauses. The repair keeps the first occurrence of each
//! identifier across the file, rebuilds affected clauses and deletes the
//! ones that end up empty. Edits are applied in reverse document order so
//! earlier byte offsets stay valid, then excess blank lines are collapsed.

use crate::{
    analyze::{parse_module, ParsedModule},
    error::Result,
    utils,
};
use std::collections::HashSet;
use swc_ecma_ast::{
    Decl, ExportSpecifier, ModuleDecl, ModuleExportName, ModuleItem, NamedExport,
};

/// The repaired file plus what was removed.
#[derive(Clone, Debug)]
pub struct RepairOutcome {
    pub content: String,
    /// Identifiers whose duplicate occurrences were dropped.
    pub removed: Vec<String>,
    pub changed: bool,
}

#[derive(Debug)]
struct ClauseEdit {
    range: std::ops::Range<usize>,
    replacement: String,
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string_lossy().to_string(),
    }
}

/// The quote character the clause's source specifier was written with.
fn source_quote(named: &NamedExport) -> char {
    named
        .src
        .as_ref()
        .and_then(|s| s.raw.as_ref())
        .and_then(|raw| raw.chars().next())
        .filter(|c| *c == '"' || *c == '\'')
        .unwrap_or('\'')
}

/// Repairs duplicate exports in one file; returns the original content
/// unchanged when there is nothing to do.
pub fn repair_duplicate_exports(path: &str, source: &str) -> Result<RepairOutcome> {
    let parsed = parse_module(path, source)?;
    let (edits, removed) = collect_clause_edits(&parsed);

    if edits.is_empty() {
        return Ok(RepairOutcome { content: source.to_string(), removed, changed: false });
    }

    let mut content = source.to_string();
    // reverse document order preserves the byte offsets of earlier edits
    let mut edits = edits;
    edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    for edit in edits {
        content.replace_range(edit.range, &edit.replacement);
    }

    let content = utils::RE_THREE_OR_MORE_NEWLINES.replace_all(&content, "\n\n").into_owned();
    Ok(RepairOutcome { content, removed, changed: true })
}

/// Walks the module in document order, seeding seen-names from declaration
/// exports and rewriting `export { .. }` clauses that repeat a name.
fn collect_clause_edits(parsed: &ParsedModule) -> (Vec<ClauseEdit>, Vec<String>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut removed = Vec::new();
    let mut edits = Vec::new();

    for item in &parsed.module.body {
        let ModuleItem::ModuleDecl(decl) = item else { continue };
        match decl {
            ModuleDecl::ExportDecl(export) => {
                let mut names = Vec::new();
                match &export.decl {
                    Decl::Class(class) => names.push(class.ident.sym.to_string()),
                    Decl::Fn(function) => names.push(function.ident.sym.to_string()),
                    Decl::Var(var) => {
                        for declarator in &var.decls {
                            super::imports::pat_idents(&declarator.name, &mut names);
                        }
                    }
                    Decl::TsInterface(interface) => names.push(interface.id.sym.to_string()),
                    Decl::TsTypeAlias(alias) => names.push(alias.id.sym.to_string()),
                    Decl::TsEnum(ts_enum) => names.push(ts_enum.id.sym.to_string()),
                    _ => {}
                }
                for name in names {
                    seen.insert(name);
                }
            }
            ModuleDecl::ExportDefaultDecl(_) | ModuleDecl::ExportDefaultExpr(_) => {
                seen.insert("default".to_string());
            }
            ModuleDecl::ExportNamed(named) => {
                // clauses with namespace or default specifiers are left alone
                let plain = named
                    .specifiers
                    .iter()
                    .all(|s| matches!(s, ExportSpecifier::Named(_)));
                if !plain {
                    for specifier in &named.specifiers {
                        if let ExportSpecifier::Namespace(ns) = specifier {
                            seen.insert(export_name(&ns.name));
                        }
                    }
                    continue;
                }

                let mut kept = Vec::new();
                let mut dropped_any = false;
                for specifier in &named.specifiers {
                    let ExportSpecifier::Named(spec) = specifier else { unreachable!() };
                    let exported = spec
                        .exported
                        .as_ref()
                        .map(export_name)
                        .unwrap_or_else(|| export_name(&spec.orig));
                    if seen.insert(exported.clone()) {
                        kept.push(spec);
                    } else {
                        removed.push(exported);
                        dropped_any = true;
                    }
                }
                if !dropped_any {
                    continue;
                }

                let range = parsed.byte_range(named.span);
                let replacement = if kept.is_empty() {
                    String::new()
                } else {
                    render_clause(named, &kept)
                };
                edits.push(ClauseEdit { range, replacement });
            }
            _ => {}
        }
    }

    (edits, removed)
}

/// Re-emits a clause with its surviving specifiers, preserving the
/// type-only modifier and the original quote character.
fn render_clause(
    named: &NamedExport,
    kept: &[&swc_ecma_ast::ExportNamedSpecifier],
) -> String {
    let mut parts = Vec::with_capacity(kept.len());
    for spec in kept {
        let orig = export_name(&spec.orig);
        let rendered = match &spec.exported {
            Some(exported) => format!("{orig} as {}", export_name(exported)),
            None => orig,
        };
        if spec.is_type_only && !named.type_only {
            parts.push(format!("type {rendered}"));
        } else {
            parts.push(rendered);
        }
    }

    let keyword = if named.type_only { "export type" } else { "export" };
    match &named.src {
        Some(src) => {
            let quote = source_quote(named);
            format!(
                "{keyword} {{ {} }} from {quote}{}{quote};",
                parts.join(", "),
                src.value.to_string_lossy()
            )
        }
        None => format!("{keyword} {{ {} }};", parts.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{analyze_file, imports::FileExports};

    fn all_exports(exports: &FileExports) -> Vec<String> {
        let mut out = exports.named.clone();
        out.extend(exports.type_exports.clone());
        out
    }

    #[test]
    fn drops_repeated_identifiers_keeping_the_first() {
        let source = "export { a, b } from './one';\nexport { b, c } from './two';\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.removed, vec!["b"]);
        assert!(outcome.content.contains("export { a, b } from './one';"));
        assert!(outcome.content.contains("export { c } from './two';"));

        // the repaired file parses clean and repeats nothing
        let analysis = analyze_file("index.ts", &outcome.content).unwrap();
        let names = all_exports(&analysis.exports);
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn deletes_clauses_that_become_empty() {
        let source = "export { a } from './one';\nexport { a } from './two';\nconst keep = 1;\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(!outcome.content.contains("./two"));
        assert!(outcome.content.contains("const keep = 1;"));
    }

    #[test]
    fn declaration_exports_win_over_later_clauses() {
        let source = "export const value = 1;\nexport { value } from './dup';\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(outcome.changed);
        assert!(!outcome.content.contains("./dup"));
        assert!(outcome.content.contains("export const value = 1;"));
    }

    #[test]
    fn preserves_quote_style_and_type_modifier() {
        let source = "export type { A, B } from \"./types\";\nexport type { A } from \"./types\";\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(outcome.content.contains("export type { A, B } from \"./types\";"));
        assert!(!outcome.content.contains("export type { A } from \"./types\";"));
    }

    #[test]
    fn untouched_files_round_trip_byte_identical() {
        let source = "export { a } from './one';\nexport { b } from './two';\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.content, source);
    }

    #[test]
    fn collapses_runs_of_blank_lines_left_by_deletions() {
        let source = "export { a } from './one';\n\n\nexport { a } from './two';\n\n\nexport { b } from './three';\n";
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        assert!(!outcome.content.contains("\n\n\n"));
    }

    #[test]
    fn every_surviving_export_existed_in_the_original() {
        let source = "export { a, b } from './one';\nexport { b as c, a } from './two';\n";
        let original = analyze_file("index.ts", source).unwrap();
        let outcome = repair_duplicate_exports("index.ts", source).unwrap();
        let repaired = analyze_file("index.ts", &outcome.content).unwrap();
        let original_names = all_exports(&original.exports);
        for name in all_exports(&repaired.exports) {
            assert!(original_names.contains(&name), "{name} not in original");
        }
    }
}
