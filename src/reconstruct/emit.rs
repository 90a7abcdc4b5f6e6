//! Emitting the bundler configuration and companion artifacts.
//!
//! The generated `vite.config.ts` carries the alias table in specificity
//! order, env defines with empty-string fallbacks, a virtual-module stub
//! plugin and a CSS-module stub plugin backed by the class-name map. A
//! missing or unknown framework degrades to a vanilla configuration with a
//! warning.

use crate::{
    analyze::EnvVarUsage,
    error::Result,
    reconstruct::aliases::AliasMapping,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Frameworks with a first-class vite plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framework {
    React,
    Vue,
    Svelte,
    Solid,
    Preact,
}

impl Framework {
    /// Picks the framework from the project's dependency names.
    pub fn detect(dependencies: &BTreeMap<String, String>) -> Option<Self> {
        // preact before react: preact/compat projects depend on both names
        if dependencies.contains_key("preact") {
            return Some(Self::Preact);
        }
        if dependencies.contains_key("react") {
            return Some(Self::React);
        }
        if dependencies.contains_key("vue") {
            return Some(Self::Vue);
        }
        if dependencies.contains_key("svelte") {
            return Some(Self::Svelte);
        }
        if dependencies.contains_key("solid-js") {
            return Some(Self::Solid);
        }
        None
    }

    /// The vite plugin package for this framework.
    pub fn plugin_package(&self) -> &'static str {
        match self {
            Self::React => "@vitejs/plugin-react",
            Self::Vue => "@vitejs/plugin-vue",
            Self::Svelte => "@sveltejs/vite-plugin-svelte",
            Self::Solid => "vite-plugin-solid",
            Self::Preact => "@preact/preset-vite",
        }
    }

    fn plugin_version(&self) -> &'static str {
        match self {
            Self::React => "^4.2.0",
            Self::Vue => "^5.0.0",
            Self::Svelte => "^3.0.0",
            Self::Solid => "^2.8.0",
            Self::Preact => "^2.7.0",
        }
    }

    fn import_ident(&self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Vue => "vue",
            Self::Svelte => "svelte",
            Self::Solid => "solid",
            Self::Preact => "preact",
        }
    }

    fn import_statement(&self) -> String {
        match self {
            Self::Svelte => format!(
                "import {{ svelte as {} }} from '{}';",
                self.import_ident(),
                self.plugin_package()
            ),
            _ => format!("import {} from '{}';", self.import_ident(), self.plugin_package()),
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.import_ident())
    }
}

/// Everything the config emitter needs.
#[derive(Clone, Debug, Default)]
pub struct BundlerConfig {
    pub framework: Option<Framework>,
    /// Already sorted by specificity; emitted in order.
    pub aliases: Vec<AliasMapping>,
    pub env_vars: EnvVarUsage,
    /// Build inputs relative to the project root (`index.html` first).
    pub entries: Vec<String>,
    /// Path of the class-name map, when css-module stubbing is wanted.
    pub class_map_path: Option<String>,
}

/// The emitted configuration text plus any degradation warnings.
#[derive(Clone, Debug)]
pub struct EmittedConfig {
    pub content: String,
    pub warnings: Vec<String>,
}

/// Renders `vite.config.ts`.
pub fn emit_vite_config(config: &BundlerConfig) -> EmittedConfig {
    let mut warnings = Vec::new();
    let mut out = String::new();

    out.push_str("import { defineConfig } from 'vite';\n");
    out.push_str("import path from 'node:path';\n");
    out.push_str("import fs from 'node:fs';\n");
    match &config.framework {
        Some(framework) => {
            out.push_str(&framework.import_statement());
            out.push('\n');
        }
        None => {
            warnings.push(
                "no framework detected; emitting a vanilla configuration".to_string(),
            );
        }
    }
    out.push('\n');

    out.push_str(&virtual_stub_plugin());
    out.push('\n');
    if let Some(class_map_path) = &config.class_map_path {
        out.push_str(&css_module_stub_plugin(class_map_path));
        out.push('\n');
    }

    out.push_str("export default defineConfig({\n");

    out.push_str("  plugins: [\n");
    if let Some(framework) = &config.framework {
        out.push_str(&format!("    {}(),\n", framework.import_ident()));
    }
    out.push_str("    virtualModuleStub(),\n");
    if config.class_map_path.is_some() {
        out.push_str("    cssModuleStub(),\n");
    }
    out.push_str("  ],\n");

    out.push_str("  resolve: {\n    alias: [\n");
    for alias in &config.aliases {
        out.push_str(&format!(
            "      {{ find: '{}', replacement: path.resolve(__dirname, '{}') }},\n",
            alias.alias, alias.path
        ));
    }
    out.push_str("    ],\n  },\n");

    if !config.env_vars.is_empty() {
        out.push_str("  define: {\n");
        for name in config.env_vars.keys() {
            out.push_str(&format!(
                "    'process.env.{name}': JSON.stringify(process.env.{name} ?? ''),\n"
            ));
            out.push_str(&format!(
                "    'import.meta.env.{name}': JSON.stringify(process.env.{name} ?? ''),\n"
            ));
        }
        out.push_str("  },\n");
    }

    out.push_str("  build: {\n    rollupOptions: {\n");
    if !config.entries.is_empty() {
        out.push_str("      input: {\n");
        for (i, entry) in config.entries.iter().enumerate() {
            let name = entry_name(entry, i);
            out.push_str(&format!(
                "        {name}: path.resolve(__dirname, '{entry}'),\n"
            ));
        }
        out.push_str("      },\n");
    }
    out.push_str("      output: {\n");
    out.push_str("        entryFileNames: '[name]-[hash].js',\n");
    out.push_str("        chunkFileNames: '[name]-[hash].js',\n");
    out.push_str("        assetFileNames: '[name]-[hash][extname]',\n");
    out.push_str("      },\n");
    out.push_str("    },\n  },\n");

    out.push_str("});\n");

    EmittedConfig { content: out, warnings }
}

fn entry_name(entry: &str, index: usize) -> String {
    let stem = entry
        .rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .unwrap_or_default();
    let cleaned: String =
        stem.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    if cleaned.is_empty() {
        format!("entry{index}")
    } else {
        cleaned
    }
}

/// The plugin that answers `virtual:` imports with a proxy module.
///
/// Named, namespace and default imports are rewritten into an import of
/// the stub module plus a destructuring assignment, and the stub module
/// hands out further proxies on any access, call or construction.
fn virtual_stub_plugin() -> String {
    r#"function virtualModuleStub() {
  const PREFIX = '\0virtual-stub:';
  const stubSource = [
    'const handler = {',
    '  get: (target, prop) => (prop === Symbol.toPrimitive ? () => "" : makeProxy()),',
    '  apply: () => makeProxy(),',
    '  construct: () => makeProxy(),',
    '};',
    'function makeProxy() { return new Proxy(function () {}, handler); }',
    'const stub = makeProxy();',
    'export default stub;',
  ].join('\n');
  return {
    name: 'virtual-module-stub',
    enforce: 'pre',
    resolveId(id) {
      if (id.startsWith('virtual:')) return PREFIX + id;
      return null;
    },
    load(id) {
      if (id.startsWith(PREFIX)) return stubSource;
      return null;
    },
    transform(code, id) {
      if (!/\.[cm]?[jt]sx?$/.test(id)) return null;
      if (!code.includes("virtual:")) return null;
      let counter = 0;
      const rewritten = code.replace(
        /import\s+([^;'"]+?)\s+from\s+(['"])(virtual:[^'"]+)\2\s*;?/g,
        (match, clause, quote, source) => {
          const local = `__virtual_stub_${counter++}`;
          const lines = [`import ${local} from ${quote}${source}${quote};`];
          clause = clause.trim();
          const starMatch = clause.match(/^\*\s+as\s+(\w+)$/);
          if (starMatch) {
            lines.push(`const ${starMatch[1]} = ${local};`);
          } else {
            const defaultMatch = clause.match(/^(\w+)\s*(?:,\s*(\{[^}]*\}))?$/);
            if (defaultMatch) {
              lines.push(`const ${defaultMatch[1]} = ${local};`);
              if (defaultMatch[2]) {
                lines.push(`const ${defaultMatch[2].replace(/\s+as\s+/g, ': ')} = ${local};`);
              }
            } else if (clause.startsWith('{')) {
              lines.push(`const ${clause.replace(/\s+as\s+/g, ': ')} = ${local};`);
            } else {
              lines.push(`const ${clause} = ${local};`);
            }
          }
          return lines.join('\n');
        },
      );
      return rewritten === code ? null : { code: rewritten, map: null };
    },
  };
}
"#
    .to_string()
}

/// The plugin that serves auto-generated CSS-module stubs from the
/// class-name map; unknown base names fall back to identity.
fn css_module_stub_plugin(class_map_path: &str) -> String {
    format!(
        r#"function cssModuleStub() {{
  const mapPath = path.resolve(__dirname, '{class_map_path}');
  const STUB_MARKER = '/* reconstructed-css-module-stub */';
  let classMap = {{ mappings: {{}} }};
  try {{
    classMap = JSON.parse(fs.readFileSync(mapPath, 'utf8'));
  }} catch {{
    // no captured class names; identity mapping still applies
  }}
  return {{
    name: 'css-module-stub',
    enforce: 'pre',
    load(id) {{
      if (!/\.module\.(css|scss|sass|less)$/.test(id)) return null;
      let source = '';
      try {{
        source = fs.readFileSync(id, 'utf8');
      }} catch {{
        return null;
      }}
      if (!source.startsWith(STUB_MARKER)) return null;
      const mappings = classMap.mappings || {{}};
      return [
        `const mappings = ${{JSON.stringify(mappings)}};`,
        'export default new Proxy({{}}, {{',
        '  get: (target, name) => {{',
        "    if (typeof name !== 'string') return undefined;",
        '    const hashed = mappings[name];',
        '    return hashed && hashed.length ? hashed[0] : name;',
        '  }},',
        '}});',
      ].join('\n');
    }},
  }};
}}
"#
    )
}

/// Dev-dependency pins added to the reconstructed `package.json`.
const VITE_VERSION: &str = "^5.4.0";
const TYPESCRIPT_VERSION: &str = "^5.4.0";

/// The outcome of augmenting `package.json`.
#[derive(Clone, Debug)]
pub struct PackageJsonUpdate {
    pub content: String,
    /// Dependencies moved to `_internalDependencies` (not on the registry).
    pub moved_internal: Vec<String>,
    /// `*` versions pinned to the floating-latest marker.
    pub pinned: Vec<String>,
}

/// Adds build-tool dev-dependencies and settles `*` versions.
///
/// A `*` dependency that exists on the registry is pinned to `latest`; one
/// that does not is moved to `_internalDependencies` with a workspace
/// specifier so installs do not fail on first-party names.
pub fn augment_package_json(
    original: &str,
    framework: Option<Framework>,
    existence: &BTreeMap<String, bool>,
) -> Result<PackageJsonUpdate> {
    let mut document: Map<String, Value> = serde_json::from_str(original)?;
    let mut moved_internal = Vec::new();
    let mut pinned = Vec::new();

    let mut internal = Map::new();
    if let Some(Value::Object(dependencies)) = document.get_mut("dependencies") {
        let names: Vec<String> = dependencies.keys().cloned().collect();
        for name in names {
            let is_floating =
                dependencies.get(&name).and_then(Value::as_str).map(|v| v == "*").unwrap_or(false);
            if !is_floating {
                continue;
            }
            match existence.get(&name) {
                Some(true) => {
                    dependencies.insert(name.clone(), json!("latest"));
                    pinned.push(name);
                }
                Some(false) => {
                    dependencies.remove(&name);
                    internal.insert(name.clone(), json!("workspace:*"));
                    moved_internal.push(name);
                }
                None => {}
            }
        }
    }
    if !internal.is_empty() {
        document.insert("_internalDependencies".to_string(), Value::Object(internal));
    }

    let dev = document
        .entry("devDependencies".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(dev) = dev {
        dev.entry("vite".to_string()).or_insert_with(|| json!(VITE_VERSION));
        dev.entry("typescript".to_string()).or_insert_with(|| json!(TYPESCRIPT_VERSION));
        if let Some(framework) = framework {
            dev.entry(framework.plugin_package().to_string())
                .or_insert_with(|| json!(framework.plugin_version()));
        }
    }

    let content = format!("{}\n", serde_json::to_string_pretty(&document)?);
    Ok(PackageJsonUpdate { content, moved_internal, pinned })
}

/// Rewrites `index.html` to reference the rebuilt bundle entries.
///
/// Script tags that pointed at captured bundles are dropped and one module
/// script per JS entry is injected before `</body>` (or appended when the
/// document has no body tag).
pub fn rewrite_index_html(html: &str, entries: &[String]) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    // drop script tags that load the old bundles
    while let Some(start) = rest.to_ascii_lowercase().find("<script") {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        let lower = tail.to_ascii_lowercase();
        let end = lower
            .find("</script>")
            .map(|e| e + "</script>".len())
            .or_else(|| tail.find('>').map(|e| e + 1))
            .unwrap_or(tail.len());
        let tag = &tail[..end];
        if !tag_references_external_src(tag) {
            out.push_str(tag);
        }
        rest = &tail[end..];
    }
    out.push_str(rest);

    let mut injected = String::new();
    for entry in entries {
        if entry.rsplit('.').next().map(|ext| ext == "html").unwrap_or(false) {
            continue;
        }
        let src = if entry.starts_with('/') { entry.clone() } else { format!("/{entry}") };
        injected.push_str(&format!("    <script type=\"module\" src=\"{src}\"></script>\n"));
    }
    if injected.is_empty() {
        return out;
    }

    if let Some(pos) = out.to_ascii_lowercase().rfind("</body>") {
        let mut with_scripts = String::with_capacity(out.len() + injected.len());
        with_scripts.push_str(&out[..pos]);
        with_scripts.push_str(&injected);
        with_scripts.push_str(&out[pos..]);
        with_scripts
    } else {
        out.push_str(&injected);
        out
    }
}

/// Whether a `<script ...>` tag loads JS from a src attribute (captured
/// bundles do; inline scripts and JSON payloads stay).
fn tag_references_external_src(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    let Some(head_end) = lower.find('>') else { return false };
    lower[..head_end].contains("src=")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(framework: Option<Framework>) -> BundlerConfig {
        let mut env_vars = EnvVarUsage::new();
        env_vars.insert("API_URL".to_string(), Default::default());
        BundlerConfig {
            framework,
            aliases: vec![
                AliasMapping::new("@/components", "./src/components"),
                AliasMapping::new("@", "./src"),
            ],
            env_vars,
            entries: vec!["index.html".to_string()],
            class_map_path: Some("./_class-name-map.json".to_string()),
        }
    }

    #[test]
    fn emits_react_config() {
        let emitted = emit_vite_config(&config_with(Some(Framework::React)));
        assert!(emitted.warnings.is_empty());
        assert!(emitted.content.contains("import react from '@vitejs/plugin-react';"));
        assert!(emitted.content.contains("react(),"));
        assert!(emitted.content.contains("virtualModuleStub(),"));
        assert!(emitted.content.contains("cssModuleStub(),"));
        assert!(emitted.content.contains("'process.env.API_URL': JSON.stringify(process.env.API_URL ?? '')"));
        assert!(emitted.content.contains("entryFileNames: '[name]-[hash].js'"));
    }

    #[test]
    fn alias_order_is_preserved() {
        let emitted = emit_vite_config(&config_with(Some(Framework::React)));
        let specific = emitted.content.find("find: '@/components'").unwrap();
        let general = emitted.content.find("find: '@',").unwrap();
        assert!(specific < general);
    }

    #[test]
    fn unknown_framework_degrades_to_vanilla() {
        let emitted = emit_vite_config(&config_with(None));
        assert_eq!(emitted.warnings.len(), 1);
        assert!(!emitted.content.contains("plugin-react"));
        assert!(emitted.content.contains("virtualModuleStub(),"));
    }

    #[test]
    fn detects_framework_from_dependencies() {
        let deps = |names: &[&str]| -> BTreeMap<String, String> {
            names.iter().map(|n| (n.to_string(), "^1.0.0".to_string())).collect()
        };
        assert_eq!(Framework::detect(&deps(&["react", "react-dom"])), Some(Framework::React));
        assert_eq!(Framework::detect(&deps(&["preact", "react"])), Some(Framework::Preact));
        assert_eq!(Framework::detect(&deps(&["vue"])), Some(Framework::Vue));
        assert_eq!(Framework::detect(&deps(&["lodash"])), None);
    }

    #[test]
    fn augments_package_json() {
        let original = r#"{
            "name": "site",
            "dependencies": {
                "react": "^18.2.0",
                "left-pad": "*",
                "@acme/internal-ui": "*"
            }
        }"#;
        let existence: BTreeMap<String, bool> = [
            ("left-pad".to_string(), true),
            ("@acme/internal-ui".to_string(), false),
        ]
        .into_iter()
        .collect();

        let update = augment_package_json(original, Some(Framework::React), &existence).unwrap();
        let value: Value = serde_json::from_str(&update.content).unwrap();
        assert_eq!(value["dependencies"]["left-pad"], "latest");
        assert!(value["dependencies"].get("@acme/internal-ui").is_none());
        assert_eq!(value["_internalDependencies"]["@acme/internal-ui"], "workspace:*");
        assert_eq!(value["devDependencies"]["vite"], VITE_VERSION);
        assert_eq!(value["devDependencies"]["@vitejs/plugin-react"], "^4.2.0");
        assert_eq!(update.pinned, vec!["left-pad"]);
        assert_eq!(update.moved_internal, vec!["@acme/internal-ui"]);
    }

    #[test]
    fn rewrites_index_html_scripts() {
        let html = "<html><head>\n<script src=\"/assets/main-abc123.js\"></script>\n<script>window.inline = 1;</script>\n</head><body>\n</body></html>";
        let rewritten = rewrite_index_html(html, &["src/main.tsx".to_string()]);
        assert!(!rewritten.contains("main-abc123.js"));
        assert!(rewritten.contains("window.inline = 1;"));
        assert!(rewritten.contains("<script type=\"module\" src=\"/src/main.tsx\"></script>"));
        let script_pos = rewritten.find("src/main.tsx").unwrap();
        let body_pos = rewritten.find("</body>").unwrap();
        assert!(script_pos < body_pos);
    }
}
