//! Parsing recovered sources and extracting their import/export surface.
//!
//! Parsing runs at file granularity on the rayon pool; the analysis of a
//! single file is strictly sequential and deterministic.

use crate::{
    error::{LiftError, Result},
    utils,
};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    path::Path,
};
use swc_common::{FileName, SourceMap};
use swc_ecma_ast::Module;
use swc_ecma_parser::{EsSyntax, Parser, StringInput, Syntax, TsSyntax};

pub mod envvars;
pub mod imports;
pub mod repair;

pub use envvars::EnvVarUsage;
pub use imports::{
    BareSpecifier, FileExports, ImportRecord, NamedImport, Reexport, SpecifierKind,
};
pub use repair::repair_duplicate_exports;

/// A parsed file plus what is needed to map AST spans back onto the text.
pub struct ParsedModule {
    pub module: Module,
    pub source: String,
    /// Offset of the file inside its (single-file) source map; spans are
    /// rebased against it to obtain byte ranges into `source`.
    pub start_pos: swc_common::BytePos,
}

impl ParsedModule {
    /// Byte range of a span within `source`.
    pub fn byte_range(&self, span: swc_common::Span) -> std::ops::Range<usize> {
        let lo = span.lo.0.saturating_sub(self.start_pos.0) as usize;
        let hi = span.hi.0.saturating_sub(self.start_pos.0) as usize;
        lo..hi.min(self.source.len())
    }
}

fn syntax_for(path: &str) -> Syntax {
    let ext = path.rsplit('.').next().unwrap_or_default();
    match ext {
        "ts" => Syntax::Typescript(TsSyntax { tsx: false, ..Default::default() }),
        "tsx" => Syntax::Typescript(TsSyntax { tsx: true, ..Default::default() }),
        "jsx" => Syntax::Es(EsSyntax { jsx: true, ..Default::default() }),
        _ => Syntax::Es(EsSyntax { jsx: true, ..Default::default() }),
    }
}

/// Parses one JS/TS source into an AST.
pub fn parse_module(path: &str, source: &str) -> Result<ParsedModule> {
    let source_map = SourceMap::default();
    let source_file =
        source_map.new_source_file(FileName::Custom(path.to_string()).into(), source.to_string());

    let mut parser = Parser::new(syntax_for(path), StringInput::from(&*source_file), None);
    let module = parser
        .parse_module()
        .map_err(|e| LiftError::parse(path, format!("{e:?}")))?;
    // the parser recovers from some syntax errors; treat those as failures
    // too so downstream span edits never run on a mangled tree
    let errors = parser.take_errors();
    if let Some(error) = errors.first() {
        return Err(LiftError::parse(path, format!("{error:?}")));
    }

    Ok(ParsedModule {
        module,
        source: source.to_string(),
        start_pos: source_file.start_pos,
    })
}

/// Everything the reconstructor needs to know about one file.
#[derive(Clone, Debug, Default)]
pub struct FileAnalysis {
    pub path: String,
    pub imports: Vec<ImportRecord>,
    pub exports: FileExports,
    pub env_vars: EnvVarUsage,
}

/// Analyzes one file into its import/export and env-var records.
pub fn analyze_file(path: &str, source: &str) -> Result<FileAnalysis> {
    let parsed = parse_module(path, source)?;
    Ok(FileAnalysis {
        path: path.to_string(),
        imports: imports::extract_imports(&parsed.module),
        exports: imports::extract_exports(&parsed.module),
        env_vars: envvars::collect_env_vars(&parsed.module),
    })
}

/// The analyzed recovered tree; paths are forward-slash relative.
#[derive(Debug, Default)]
pub struct SourceTreeAnalysis {
    pub files: BTreeMap<String, FileAnalysis>,
    /// Files that failed to parse, with the parser message.
    pub errors: Vec<(String, String)>,
}

impl SourceTreeAnalysis {
    pub fn file(&self, path: &str) -> Option<&FileAnalysis> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The union of env-var references across the tree.
    pub fn env_vars(&self) -> EnvVarUsage {
        let mut usage = EnvVarUsage::new();
        for file in self.files.values() {
            envvars::merge_usage(&mut usage, file.env_vars.clone());
        }
        usage
    }
}

/// Analyzes in-memory sources, parallelized at file granularity.
pub fn analyze_sources<S: AsRef<str> + Sync>(sources: &[(String, S)]) -> SourceTreeAnalysis {
    let results: Vec<(String, Result<FileAnalysis>)> = sources
        .par_iter()
        .filter(|(path, _)| utils::has_extension(Path::new(path), utils::JS_EXTENSIONS))
        .map(|(path, content)| (path.clone(), analyze_file(path, content.as_ref())))
        .collect();

    let mut analysis = SourceTreeAnalysis::default();
    for (path, result) in results {
        match result {
            Ok(file) => {
                analysis.files.insert(path, file);
            }
            Err(err) => {
                debug!("failed to analyze {path}: {err}");
                analysis.errors.push((path, err.to_string()));
            }
        }
    }
    analysis
}

/// Walks a source tree on disk and analyzes every JS/TS file.
pub fn analyze_tree(root: &Path) -> Result<SourceTreeAnalysis> {
    let mut sources = Vec::new();
    for path in utils::source_files_iter(root, utils::JS_EXTENSIONS) {
        let content =
            std::fs::read_to_string(&path).map_err(|err| LiftError::io(err, &path))?;
        let relative = path.strip_prefix(root).unwrap_or(&path);
        sources.push((utils::slash_path(relative), content));
    }
    trace!("analyzing {} files under {}", sources.len(), root.display());
    Ok(analyze_sources(&sources))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typescript_with_types() {
        let source = "export interface Props { id: number }\nexport const x: Props = { id: 1 };\n";
        let analysis = analyze_file("src/types.ts", source).unwrap();
        assert!(analysis.exports.type_exports.contains(&"Props".to_string()));
        assert!(analysis.exports.named.contains(&"x".to_string()));
    }

    #[test]
    fn parses_tsx_components() {
        let source = "export function App() { return <div>hello</div>; }\n";
        let analysis = analyze_file("src/App.tsx", source).unwrap();
        assert!(analysis.exports.named.contains(&"App".to_string()));
    }

    #[test]
    fn records_parse_errors_without_aborting() {
        let sources = vec![
            ("src/ok.ts".to_string(), "export const a = 1;".to_string()),
            ("src/broken.ts".to_string(), "export const = ;".to_string()),
            ("styles/skip.css".to_string(), ".a{}".to_string()),
        ];
        let analysis = analyze_sources(&sources);
        assert_eq!(analysis.files.len(), 1);
        assert_eq!(analysis.errors.len(), 1);
        assert_eq!(analysis.errors[0].0, "src/broken.ts");
    }
}
