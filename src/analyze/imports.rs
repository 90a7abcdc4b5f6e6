//! Import/export records extracted from module ASTs.

use swc_ecma_ast::{
    Decl, DefaultDecl, ExportSpecifier, ImportSpecifier, Module, ModuleDecl, ModuleExportName,
    ModuleItem, ObjectPatProp, Pat,
};

/// How an import source string resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecifierKind {
    /// `./x` or `../x`.
    Relative,
    /// A package specifier, split into scope/name/subpath.
    Bare(BareSpecifier),
    /// A build-time module served by a bundler plugin.
    Virtual,
}

/// A bare package specifier such as `@scope/name/subpath`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BareSpecifier {
    pub scope: Option<String>,
    pub name: String,
    pub subpath: Option<String>,
}

impl BareSpecifier {
    /// The full package name, including the scope.
    pub fn package_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Classifies an import source string.
pub fn classify_specifier(source: &str) -> SpecifierKind {
    if source.starts_with("./") || source.starts_with("../") || source == "." || source == ".." {
        return SpecifierKind::Relative;
    }
    if source.starts_with("virtual:") {
        return SpecifierKind::Virtual;
    }
    if let Some(rest) = source.strip_prefix('@') {
        let mut parts = rest.splitn(3, '/');
        let scope = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let subpath = parts.next().map(str::to_owned);
        return SpecifierKind::Bare(BareSpecifier {
            scope: Some(format!("@{scope}")),
            name: name.to_string(),
            subpath,
        });
    }
    let mut parts = source.splitn(2, '/');
    let name = parts.next().unwrap_or_default();
    let subpath = parts.next().map(str::to_owned);
    SpecifierKind::Bare(BareSpecifier { scope: None, name: name.to_string(), subpath })
}

/// One named binding inside an import clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedImport {
    /// The exported name on the source module.
    pub name: String,
    /// Local alias, when it differs from `name`.
    pub alias: Option<String>,
    pub is_type_only: bool,
}

/// One `import ... from '...'` statement.
#[derive(Clone, Debug)]
pub struct ImportRecord {
    pub source: String,
    pub kind: SpecifierKind,
    /// `import type { .. }` at statement level.
    pub is_type_only: bool,
    pub named: Vec<NamedImport>,
    pub has_default_import: bool,
    pub has_namespace_import: bool,
}

/// One `export ... from '...'` statement.
#[derive(Clone, Debug)]
pub struct Reexport {
    pub source: String,
    /// Empty when this is a star re-export.
    pub names: Vec<String>,
    pub star: bool,
    pub type_only: bool,
}

/// The export surface of one file.
#[derive(Clone, Debug, Default)]
pub struct FileExports {
    pub named: Vec<String>,
    pub type_exports: Vec<String>,
    pub has_default: bool,
    /// The declared name behind `export default`, when it has one.
    pub default_name: Option<String>,
    pub reexports: Vec<Reexport>,
}

impl FileExports {
    /// Whether this file directly exports the symbol (ignoring re-exports).
    pub fn exports_symbol(&self, symbol: &str) -> bool {
        if symbol == "default" {
            return self.has_default;
        }
        self.named.iter().any(|n| n == symbol) || self.type_exports.iter().any(|n| n == symbol)
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string_lossy().to_string(),
    }
}

/// Collects the bound identifiers of a (possibly destructuring) pattern.
pub(crate) fn pat_idents(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(ident) => out.push(ident.id.sym.to_string()),
        Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                pat_idents(elem, out);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => pat_idents(&kv.value, out),
                    ObjectPatProp::Assign(assign) => out.push(assign.key.sym.to_string()),
                    ObjectPatProp::Rest(rest) => pat_idents(&rest.arg, out),
                }
            }
        }
        Pat::Assign(assign) => pat_idents(&assign.left, out),
        Pat::Rest(rest) => pat_idents(&rest.arg, out),
        Pat::Expr(_) | Pat::Invalid(_) => {}
    }
}

/// Extracts all import statements of a module.
pub fn extract_imports(module: &Module) -> Vec<ImportRecord> {
    let mut records = Vec::new();

    for item in &module.body {
        let ModuleItem::ModuleDecl(ModuleDecl::Import(import)) = item else { continue };
        let source = import.src.value.to_string_lossy().to_string();
        let mut record = ImportRecord {
            kind: classify_specifier(&source),
            source,
            is_type_only: import.type_only,
            named: Vec::new(),
            has_default_import: false,
            has_namespace_import: false,
        };

        for specifier in &import.specifiers {
            match specifier {
                ImportSpecifier::Named(named) => {
                    let local = named.local.sym.to_string();
                    let (name, alias) = match &named.imported {
                        Some(imported) => (export_name(imported), Some(local)),
                        None => (local, None),
                    };
                    record.named.push(NamedImport {
                        name,
                        alias,
                        is_type_only: named.is_type_only || import.type_only,
                    });
                }
                ImportSpecifier::Default(_) => record.has_default_import = true,
                ImportSpecifier::Namespace(_) => record.has_namespace_import = true,
            }
        }

        records.push(record);
    }

    records
}

/// Extracts the export surface of a module.
pub fn extract_exports(module: &Module) -> FileExports {
    let mut exports = FileExports::default();

    for item in &module.body {
        let ModuleItem::ModuleDecl(decl) = item else { continue };
        match decl {
            ModuleDecl::ExportDecl(export) => match &export.decl {
                Decl::Class(class) => exports.named.push(class.ident.sym.to_string()),
                Decl::Fn(function) => exports.named.push(function.ident.sym.to_string()),
                Decl::Var(var) => {
                    for declarator in &var.decls {
                        pat_idents(&declarator.name, &mut exports.named);
                    }
                }
                Decl::TsInterface(interface) => {
                    exports.type_exports.push(interface.id.sym.to_string())
                }
                Decl::TsTypeAlias(alias) => exports.type_exports.push(alias.id.sym.to_string()),
                Decl::TsEnum(ts_enum) => exports.named.push(ts_enum.id.sym.to_string()),
                _ => {}
            },
            ModuleDecl::ExportNamed(named) => {
                let source = named.src.as_ref().map(|s| s.value.to_string_lossy().to_string());
                let mut names = Vec::new();
                for specifier in &named.specifiers {
                    match specifier {
                        ExportSpecifier::Named(spec) => {
                            let exported = spec
                                .exported
                                .as_ref()
                                .map(export_name)
                                .unwrap_or_else(|| export_name(&spec.orig));
                            if exported == "default" {
                                exports.has_default = true;
                            } else if spec.is_type_only || named.type_only {
                                exports.type_exports.push(exported.clone());
                            } else {
                                exports.named.push(exported.clone());
                            }
                            names.push(exported);
                        }
                        ExportSpecifier::Namespace(spec) => {
                            let exported = export_name(&spec.name);
                            exports.named.push(exported.clone());
                            names.push(exported);
                        }
                        ExportSpecifier::Default(_) => exports.has_default = true,
                    }
                }
                if let Some(source) = source {
                    exports.reexports.push(Reexport {
                        source,
                        names,
                        star: false,
                        type_only: named.type_only,
                    });
                }
            }
            ModuleDecl::ExportAll(export_all) => {
                exports.reexports.push(Reexport {
                    source: export_all.src.value.to_string_lossy().to_string(),
                    names: Vec::new(),
                    star: true,
                    type_only: export_all.type_only,
                });
            }
            ModuleDecl::ExportDefaultDecl(default_decl) => {
                exports.has_default = true;
                exports.default_name = match &default_decl.decl {
                    DefaultDecl::Class(class) => class.ident.as_ref().map(|i| i.sym.to_string()),
                    DefaultDecl::Fn(function) => {
                        function.ident.as_ref().map(|i| i.sym.to_string())
                    }
                    DefaultDecl::TsInterfaceDecl(interface) => Some(interface.id.sym.to_string()),
                };
            }
            ModuleDecl::ExportDefaultExpr(_) => exports.has_default = true,
            _ => {}
        }
    }

    exports
}
