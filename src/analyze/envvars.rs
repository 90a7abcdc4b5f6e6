//! Detecting environment variables referenced by recovered sources.
//!
//! Any `process.env.X` or `import.meta.env.X` member access where `X` is an
//! upper-case name counts, except `NODE_ENV` which the bundler defines
//! itself. Nested access like `process.env.Y.foo` is recorded as a string
//! tree for the generated env typing.

use crate::utils;
use std::collections::{BTreeMap, BTreeSet};
use swc_ecma_ast::{Expr, MemberProp, MetaPropKind, Module};
use swc_ecma_visit::{Visit, VisitWith};

/// All referenced env vars: name to the set of nested access paths
/// (empty for plain `process.env.X` reads).
pub type EnvVarUsage = BTreeMap<String, BTreeSet<String>>;

/// Flattens a static member chain (`a.b.c`) into its segments; returns
/// `false` when the chain contains a computed or non-identifier link.
fn member_chain(expr: &Expr, out: &mut Vec<String>) -> bool {
    match expr {
        Expr::Ident(ident) => {
            out.push(ident.sym.to_string());
            true
        }
        Expr::MetaProp(meta) if meta.kind == MetaPropKind::ImportMeta => {
            out.push("import".to_string());
            out.push("meta".to_string());
            true
        }
        Expr::Member(member) => {
            if !member_chain(&member.obj, out) {
                return false;
            }
            match &member.prop {
                MemberProp::Ident(ident) => {
                    out.push(ident.sym.to_string());
                    true
                }
                MemberProp::Computed(computed) => match computed.expr.as_ref() {
                    Expr::Lit(swc_ecma_ast::Lit::Str(s)) => {
                        out.push(s.value.to_string_lossy().to_string());
                        true
                    }
                    _ => false,
                },
                MemberProp::PrivateName(_) => false,
            }
        }
        Expr::Paren(paren) => member_chain(&paren.expr, out),
        _ => false,
    }
}

/// Returns the env var segments of a chain when it starts with
/// `process.env` or `import.meta.env`: `(name, nested_path)`.
fn env_access(chain: &[String]) -> Option<(&str, Vec<String>)> {
    let rest = if chain.len() >= 3 && chain[0] == "process" && chain[1] == "env" {
        &chain[2..]
    } else if chain.len() >= 4 && chain[0] == "import" && chain[1] == "meta" && chain[2] == "env" {
        &chain[3..]
    } else {
        return None;
    };
    let name = rest.first()?;
    Some((name, rest[1..].to_vec()))
}

struct EnvVarCollector {
    usage: EnvVarUsage,
}

impl Visit for EnvVarCollector {
    fn visit_member_expr(&mut self, member: &swc_ecma_ast::MemberExpr) {
        let mut chain = Vec::new();
        if member_chain(&Expr::Member(member.clone()), &mut chain) {
            if let Some((name, nested)) = env_access(&chain) {
                if utils::RE_ENV_VAR_NAME.is_match(name) && name != "NODE_ENV" {
                    let paths = self.usage.entry(name.to_string()).or_default();
                    if !nested.is_empty() {
                        paths.insert(nested.join("."));
                    }
                }
            }
        }
        member.visit_children_with(self);
    }
}

/// Collects env var references from one module.
pub fn collect_env_vars(module: &Module) -> EnvVarUsage {
    let mut collector = EnvVarCollector { usage: EnvVarUsage::new() };
    module.visit_with(&mut collector);
    collector.usage
}

/// Merges per-file usages into one tree.
pub fn merge_usage(into: &mut EnvVarUsage, from: EnvVarUsage) {
    for (name, nested) in from {
        into.entry(name).or_default().extend(nested);
    }
}

/// Renders the generated env typing (`env.d.ts`) for the detected
/// variables, including nested string trees.
pub fn render_env_typing(usage: &EnvVarUsage) -> String {
    let mut out = String::from("interface RecoveredEnv {\n");
    for (name, nested) in usage {
        if nested.is_empty() {
            out.push_str(&format!("  readonly {name}: string;\n"));
        } else {
            out.push_str(&format!("  readonly {name}: {};\n", render_nested_type(nested)));
        }
    }
    out.push_str("}\n\ninterface ImportMetaEnv extends RecoveredEnv {}\n");
    out
}

/// Builds a nested `{ foo: { bar: string } }` type from dotted paths.
fn render_nested_type(paths: &BTreeSet<String>) -> String {
    #[derive(Default)]
    struct Node(BTreeMap<String, Node>);

    let mut root = Node::default();
    for path in paths {
        let mut node = &mut root;
        for segment in path.split('.') {
            node = node.0.entry(segment.to_string()).or_default();
        }
    }

    fn render(node: &Node) -> String {
        if node.0.is_empty() {
            return "string".to_string();
        }
        let fields: Vec<String> =
            node.0.iter().map(|(key, child)| format!("{key}: {}", render(child))).collect();
        format!("{{ {} }}", fields.join("; "))
    }

    render(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::parse_module;

    fn usage_of(source: &str) -> EnvVarUsage {
        collect_env_vars(&parse_module("test.ts", source).unwrap().module)
    }

    #[test]
    fn finds_process_env_reads() {
        let usage = usage_of("const url = process.env.API_URL;\nfetch(process.env.TOKEN_V2);");
        assert!(usage.contains_key("API_URL"));
        assert!(usage.contains_key("TOKEN_V2"));
    }

    #[test]
    fn finds_import_meta_env_reads() {
        let usage = usage_of("console.log(import.meta.env.VITE_API);");
        assert!(usage.contains_key("VITE_API"));
    }

    #[test]
    fn skips_node_env_and_lowercase_names() {
        let usage = usage_of(
            "if (process.env.NODE_ENV === 'production') {}\nconst x = process.env.lowercase;",
        );
        assert!(usage.is_empty());
    }

    #[test]
    fn records_nested_access_trees() {
        let usage = usage_of("const a = process.env.CONFIG.endpoint.host;");
        let nested = &usage["CONFIG"];
        assert!(nested.contains("endpoint.host"));
    }

    #[test]
    fn computed_string_access_counts() {
        let usage = usage_of("const t = process.env['FEATURE_FLAG'];");
        assert!(usage.contains_key("FEATURE_FLAG"));
    }

    #[test]
    fn renders_nested_typing() {
        let usage = usage_of("const a = process.env.CONFIG.endpoint;\nconst b = process.env.PLAIN;");
        let typing = render_env_typing(&usage);
        assert!(typing.contains("readonly CONFIG: { endpoint: string };"));
        assert!(typing.contains("readonly PLAIN: string;"));
    }
}
