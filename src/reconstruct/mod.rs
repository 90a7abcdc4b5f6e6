//! Turning a recovered source tree into a buildable project.
//!
//! Reconstruction is a single-writer phase: it repairs duplicate exports,
//! rebuilds module indexes from consumer demand, infers the alias table,
//! derives the class-name map and emits the bundler configuration plus the
//! rewritten manifest files. All artifacts are produced in memory first;
//! [`write_artifacts`] persists them in one pass.

use crate::{
    analyze::{self, repair, EnvVarUsage},
    error::Result,
    report, utils,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

pub mod aliases;
pub mod cssmap;
pub mod emit;
pub mod index;

pub use aliases::{infer_aliases, sort_aliases, AliasMapping};
pub use cssmap::{build_class_name_map, ClassNameMap};
pub use emit::{
    augment_package_json, emit_vite_config, rewrite_index_html, BundlerConfig, Framework,
};
pub use index::{reconstruct_indexes, ExpectedImport, IndexPlan};

/// File name of the persisted class-name map.
pub const CLASS_NAME_MAP_FILE: &str = "_class-name-map.json";

/// Inputs to one reconstruction run.
#[derive(Clone, Debug, Default)]
pub struct ReconstructionInput {
    /// Recovered `(path, content)` sources, forward-slash relative.
    pub sources: Vec<(String, String)>,
    /// Captured stylesheet `(path, content)` pairs.
    pub css_files: Vec<(String, String)>,
    /// The recovered `package.json`, when one was found.
    pub package_json: Option<String>,
    /// The captured `index.html`, when one was found.
    pub index_html: Option<String>,
    /// Registry existence facts for `*` dependencies.
    pub package_existence: BTreeMap<String, bool>,
    /// Build entry points relative to the root.
    pub entries: Vec<String>,
    /// Timestamp stamped into generated artifacts; injected so runs are
    /// reproducible under a fixed clock.
    pub generated_at: String,
}

/// Everything a reconstruction produced, in memory.
#[derive(Clone, Debug, Default)]
pub struct ReconstructionOutcome {
    /// Sources whose duplicate exports were repaired (full new content).
    pub repaired_sources: Vec<(String, String)>,
    /// Final index file contents, including preserved originals.
    pub index_files: Vec<(String, String)>,
    pub aliases: Vec<AliasMapping>,
    pub env_vars: EnvVarUsage,
    pub class_map: Option<ClassNameMap>,
    pub vite_config: String,
    pub env_typing: String,
    pub package_json: Option<String>,
    pub index_html: Option<String>,
    pub unresolved: Vec<ExpectedImport>,
    pub warnings: Vec<String>,
}

fn declared_dependencies(package_json: Option<&str>) -> BTreeMap<String, String> {
    let mut deps = BTreeMap::new();
    let Some(raw) = package_json else { return deps };
    let Ok(document) = serde_json::from_str::<serde_json::Value>(raw) else { return deps };
    for key in ["dependencies", "devDependencies"] {
        if let Some(map) = document.get(key).and_then(|v| v.as_object()) {
            for (name, version) in map {
                if let Some(version) = version.as_str() {
                    deps.insert(name.clone(), version.to_string());
                }
            }
        }
    }
    deps
}

/// Runs the full reconstruction over recovered sources.
pub fn reconstruct_project(root: &Path, input: &ReconstructionInput) -> Result<ReconstructionOutcome> {
    let mut outcome = ReconstructionOutcome::default();

    // 1. repair duplicate exports before anything reads the export surface
    let mut sources: Vec<(String, String)> = Vec::with_capacity(input.sources.len());
    for (path, content) in &input.sources {
        if utils::has_extension(Path::new(path), utils::JS_EXTENSIONS) {
            match repair::repair_duplicate_exports(path, content) {
                Ok(repaired) if repaired.changed => {
                    debug!("repaired duplicate exports in {path}: {:?}", repaired.removed);
                    outcome.repaired_sources.push((path.clone(), repaired.content.clone()));
                    sources.push((path.clone(), repaired.content));
                    continue;
                }
                Ok(_) => {}
                Err(err) => trace!("export repair skipped for {path}: {err}"),
            }
        }
        sources.push((path.clone(), content.clone()));
    }

    // 2. analyze the (repaired) tree
    let analysis = analyze::analyze_sources(&sources);
    outcome.env_vars = analysis.env_vars();

    // 3. indexes from consumer demand
    let reconstruction = index::reconstruct_indexes(&analysis);
    outcome.warnings.extend(reconstruction.warnings.iter().cloned());
    let source_map: BTreeMap<&str, &str> =
        sources.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    for plan in &reconstruction.plans {
        outcome.unresolved.extend(plan.unresolved.iter().cloned());
        let content = match source_map.get(plan.path.as_str()) {
            Some(original) => format!("{}\n\n{}", original.trim_end(), plan.content),
            None => plan.content.clone(),
        };
        outcome.index_files.push((plan.path.clone(), content));
    }

    // 4. aliases, then barrel indexes for alias targets that lack one
    let deps = declared_dependencies(input.package_json.as_deref());
    let declared: BTreeSet<String> = deps.keys().cloned().collect();
    outcome.aliases = aliases::infer_aliases(root, &analysis, &[], &declared);

    let alias_dirs: Vec<String> = outcome
        .aliases
        .iter()
        .map(|a| a.path.trim_start_matches("./").to_string())
        .collect();
    for barrel in index::plan_barrel_indexes(&analysis, &alias_dirs) {
        if !outcome.index_files.iter().any(|(path, _)| *path == barrel.path) {
            outcome.index_files.push((barrel.path, barrel.content));
        }
    }

    // 5. class-name map from captured stylesheets
    if !input.css_files.is_empty() {
        let map = cssmap::build_class_name_map(&input.css_files, &input.generated_at);
        if !map.mappings.is_empty() {
            outcome.class_map = Some(map);
        }
    }

    // 6. bundler configuration
    let framework = Framework::detect(&deps);
    let config = BundlerConfig {
        framework,
        aliases: outcome.aliases.clone(),
        env_vars: outcome.env_vars.clone(),
        entries: input.entries.clone(),
        class_map_path: outcome.class_map.as_ref().map(|_| format!("./{CLASS_NAME_MAP_FILE}")),
    };
    let emitted = emit::emit_vite_config(&config);
    outcome.warnings.extend(emitted.warnings);
    outcome.vite_config = emitted.content;
    outcome.env_typing = analyze::envvars::render_env_typing(&outcome.env_vars);

    // 7. manifest rewrites
    if let Some(package_json) = &input.package_json {
        match emit::augment_package_json(package_json, framework, &input.package_existence) {
            Ok(update) => outcome.package_json = Some(update.content),
            Err(err) => {
                outcome.warnings.push(format!("package.json could not be augmented: {err}"));
            }
        }
    }
    if let Some(index_html) = &input.index_html {
        outcome.index_html = Some(emit::rewrite_index_html(index_html, &input.entries));
    }

    Ok(outcome)
}

/// Persists every artifact under the output root. Returns the forward-slash
/// relative paths that were written.
pub fn write_artifacts(root: &Path, outcome: &ReconstructionOutcome) -> Result<Vec<String>> {
    let mut written = Vec::new();
    let mut write = |relative: &str, content: &str, written: &mut Vec<String>| -> Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| crate::error::LiftError::io(err, parent))?;
        }
        std::fs::write(&path, content).map_err(|err| crate::error::LiftError::io(err, &path))?;
        report::artifact_written(relative);
        written.push(relative.to_string());
        Ok(())
    };

    for (path, content) in &outcome.repaired_sources {
        write(path, content, &mut written)?;
    }
    for (path, content) in &outcome.index_files {
        write(path, content, &mut written)?;
    }
    write("vite.config.ts", &outcome.vite_config, &mut written)?;
    if !outcome.env_vars.is_empty() {
        write("env.d.ts", &outcome.env_typing, &mut written)?;
    }
    if let Some(map) = &outcome.class_map {
        let json = serde_json::to_string_pretty(map)?;
        write(CLASS_NAME_MAP_FILE, &format!("{json}\n"), &mut written)?;
    }
    if let Some(package_json) = &outcome.package_json {
        write("package.json", package_json, &mut written)?;
    }
    if let Some(index_html) = &outcome.index_html {
        write("index.html", index_html, &mut written)?;
    }

    Ok(written)
}
