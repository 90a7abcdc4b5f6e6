//! Identifying which published package versions a recovered bundle was
//! built from.
//!
//! The orchestrator drives a per-package search across three bounded
//! concurrency axes: packages, versions within a package, and candidate
//! entry-point paths within a version. An exact match (similarity >= 0.99)
//! cancels the remaining version checks for that package; sibling checks
//! observe the signal at their next suspension point. Cancellation never
//! corrupts the cache: entries are written whole or not at all.

use crate::{
    error::Result,
    report, utils,
};
use futures_util::{stream, StreamExt};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::sync::Semaphore;

pub mod cache;
pub mod hashing;
pub mod planner;
pub mod registry;
pub mod similarity;

pub use cache::{
    ContentFingerprint, ExistenceEntry, FileListEntry, FingerprintStore, JsonFileStore,
    MatchResult, MemoryStore, PackageMetadata, VersionDetails,
};
pub use registry::RegistryClient;
pub use similarity::{Confidence, Score, Strategy};

/// Similarity at which a match is treated as exact and the search stops.
pub const EXACT_MATCH_THRESHOLD: f64 = 0.99;

/// Bounded parallelism and thresholds for the version search.
#[derive(Clone, Debug)]
pub struct FingerprintConfig {
    /// Packages fingerprinted at the same time.
    pub package_concurrency: usize,
    /// Versions checked at the same time within one package.
    pub version_concurrency: usize,
    /// Candidate entry paths fetched at the same time within one version.
    pub entry_path_concurrency: usize,
    pub include_prerelease: bool,
    /// Minimum similarity for a version to count as a match at all.
    pub match_threshold: f64,
    /// How many planned versions the structural fallback may probe.
    pub structural_probe_limit: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            package_concurrency: 5,
            version_concurrency: 10,
            entry_path_concurrency: 5,
            include_prerelease: false,
            match_threshold: 0.7,
            structural_probe_limit: 8,
        }
    }
}

/// The recovered sources of one package, as extracted from source maps.
#[derive(Clone, Debug)]
pub struct ExtractedPackage {
    pub name: String,
    /// `(path, content)` pairs; paths are relative to the package root.
    pub files: Vec<(String, String)>,
    /// Version from a recovered manifest or lockfile, if any.
    pub version_hint: Option<String>,
}

impl ExtractedPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), files: Vec::new(), version_hint: None }
    }

    /// The largest recovered file stands in for the package body.
    fn primary_file(&self) -> Option<&(String, String)> {
        self.files.iter().max_by_key(|(_, content)| content.len())
    }
}

/// The decided best match for one package.
#[derive(Clone, Debug)]
pub struct PackageMatch {
    pub package: String,
    pub matched_version: Option<String>,
    pub similarity: f64,
    pub confidence: Option<Confidence>,
    pub strategy: Option<Strategy>,
    pub from_cache: bool,
}

impl PackageMatch {
    fn no_match(package: &str) -> Self {
        Self {
            package: package.to_string(),
            matched_version: None,
            similarity: 0.0,
            confidence: None,
            strategy: None,
            from_cache: false,
        }
    }
}

#[derive(Debug)]
struct VersionOutcome {
    version: String,
    plan_index: usize,
    score: Score,
}

/// Drives the per-package version search.
#[derive(Clone)]
pub struct Fingerprinter {
    store: Arc<dyn FingerprintStore>,
    registry: RegistryClient,
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(store: Arc<dyn FingerprintStore>, registry: RegistryClient) -> Self {
        Self { store, registry, config: FingerprintConfig::default() }
    }

    pub fn with_config(mut self, config: FingerprintConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    /// Fingerprints all packages with bounded parallelism; per-package
    /// failures are demoted to no-match results.
    pub async fn fingerprint_packages(&self, packages: &[ExtractedPackage]) -> Vec<PackageMatch> {
        let names: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
        self.registry
            .prefetch_metadata(&names, self.config.package_concurrency, &self.store)
            .await;

        let semaphore = Arc::new(Semaphore::new(self.config.package_concurrency.max(1)));
        let futures = packages.iter().map(|package| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                match self.fingerprint_package(package).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("fingerprinting failed for {}: {err}", package.name);
                        PackageMatch::no_match(&package.name)
                    }
                }
            }
        });
        futures_util::future::join_all(futures).await
    }

    /// Finds the best-matching published version for one package.
    pub async fn fingerprint_package(&self, package: &ExtractedPackage) -> Result<PackageMatch> {
        let started = Instant::now();
        let Some((primary_path, primary_content)) = package.primary_file() else {
            return Ok(PackageMatch::no_match(&package.name));
        };

        let extracted = build_fingerprint(
            &package.name,
            "extracted",
            primary_path,
            primary_content,
        );

        if let Some(cached) = self
            .store
            .match_result(&package.name, &extracted.normalized_hash)
            .await?
        {
            trace!("cache hit for {} ({:?})", package.name, cached.matched_version);
            return Ok(PackageMatch {
                package: package.name.clone(),
                matched_version: cached.matched_version,
                similarity: cached.similarity,
                confidence: cached.confidence,
                strategy: None,
                from_cache: true,
            });
        }

        let Some(meta) = self.registry.ensure_metadata(&package.name, &self.store).await? else {
            debug!("package {} does not exist on the registry", package.name);
            if !self.registry.is_offline() {
                self.write_match(&package.name, &extracted.normalized_hash, None).await?;
            }
            return Ok(PackageMatch::no_match(&package.name));
        };

        let plan = planner::plan_versions(
            &meta,
            package.version_hint.as_deref(),
            self.config.include_prerelease,
        );
        debug!("checking {} versions of {}", plan.len(), package.name);

        let cancelled = Arc::new(AtomicBool::new(false));
        let transient_failures = Arc::new(AtomicUsize::new(0));
        let outcomes: Vec<Option<VersionOutcome>> = stream::iter(plan.iter().enumerate())
            .map(|(plan_index, version)| {
                let cancelled = cancelled.clone();
                let transient_failures = transient_failures.clone();
                let meta = &meta;
                let extracted = &extracted;
                async move {
                    if cancelled.load(Ordering::Relaxed) {
                        return None;
                    }
                    match self
                        .check_version(package, extracted, meta, version, plan_index)
                        .await
                    {
                        Ok(outcome) => {
                            if let Some(outcome) = &outcome {
                                report::version_checked(
                                    &package.name,
                                    &outcome.version,
                                    outcome.score.similarity,
                                );
                                if outcome.score.similarity >= EXACT_MATCH_THRESHOLD {
                                    cancelled.store(true, Ordering::Relaxed);
                                }
                            }
                            outcome
                        }
                        Err(err) => {
                            debug!("version check {}@{version} failed: {err}", package.name);
                            transient_failures.fetch_add(1, Ordering::Relaxed);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.config.version_concurrency.max(1))
            .collect()
            .await;

        let mut best: Option<VersionOutcome> = None;
        for outcome in outcomes.into_iter().flatten() {
            best = match best {
                None => Some(outcome),
                Some(current) => {
                    // ties resolve to the earlier plan position, which makes
                    // the planner ordering the effective tie-breaker
                    if outcome.score.similarity > current.score.similarity
                        || (outcome.score.similarity == current.score.similarity
                            && outcome.plan_index < current.plan_index)
                    {
                        Some(outcome)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let below_threshold = best
            .as_ref()
            .map(|b| b.score.similarity < self.config.match_threshold)
            .unwrap_or(true);
        if below_threshold && self.is_multi_file(package, &meta) {
            if let Some(structural) = self.structural_fallback(package, &plan).await {
                let better = best
                    .as_ref()
                    .map(|b| structural.score.similarity > b.score.similarity)
                    .unwrap_or(true);
                if better {
                    best = Some(structural);
                }
            }
        }

        let best = best.filter(|b| b.score.similarity >= self.config.match_threshold);

        if best.is_none() && transient_failures.load(Ordering::Relaxed) > 0 {
            // an all-errors run proves nothing; do not cache a negative
            return Err(crate::error::LiftError::msg(format!(
                "no usable version checks for {}",
                package.name
            )));
        }

        self.write_match(&package.name, &extracted.normalized_hash, best.as_ref()).await?;

        let result = match best {
            Some(best) => PackageMatch {
                package: package.name.clone(),
                matched_version: Some(best.version),
                similarity: best.score.similarity,
                confidence: best.score.confidence(),
                strategy: Some(best.score.strategy),
                from_cache: false,
            },
            None => PackageMatch::no_match(&package.name),
        };
        report::package_matched(
            &package.name,
            result.matched_version.as_deref(),
            result.similarity,
            started.elapsed(),
        );
        Ok(result)
    }

    /// Checks one version: resolve entry fingerprints (from cache or the
    /// CDN) and score them against the extracted content.
    async fn check_version(
        &self,
        package: &ExtractedPackage,
        extracted: &ContentFingerprint,
        meta: &PackageMetadata,
        version: &str,
        plan_index: usize,
    ) -> Result<Option<VersionOutcome>> {
        let primary_content =
            package.primary_file().map(|(_, content)| content.as_str()).unwrap_or("");

        let mut candidates: Vec<(ContentFingerprint, Option<String>)> = Vec::new();

        let cached_plain = self.store.fingerprint(&package.name, version).await?;
        let cached_min = self.store.minified_fingerprint(&package.name, version).await?;

        if cached_plain.is_none() || cached_min.is_none() {
            let (plain_paths, min_paths) =
                entry_path_candidates(meta.details(version), &package.name);
            if cached_plain.is_none() {
                if let Some((path, content)) =
                    self.fetch_first_existing(&package.name, version, &plain_paths).await?
                {
                    let fingerprint = build_fingerprint(&package.name, version, &path, &content);
                    self.store.set_fingerprint(&fingerprint).await?;
                    candidates.push((fingerprint, Some(content)));
                }
            }
            if cached_min.is_none() {
                if let Some((path, content)) =
                    self.fetch_first_existing(&package.name, version, &min_paths).await?
                {
                    let mut fingerprint = build_fingerprint(&package.name, version, &path, &content);
                    fingerprint.is_minified = Some(true);
                    self.store.set_minified_fingerprint(&fingerprint).await?;
                    candidates.push((fingerprint, Some(content)));
                }
            }
        }
        if let Some(fingerprint) = cached_plain {
            candidates.push((fingerprint, None));
        }
        if let Some(fingerprint) = cached_min {
            candidates.push((fingerprint, None));
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        let mut best: Option<Score> = None;
        for (candidate, content) in &candidates {
            let mut score = similarity::compare_contents(
                extracted,
                Some(primary_content),
                candidate,
                content.as_deref(),
            );

            // a package recovered as many small files is better judged by
            // the union of its features than by any single file
            if score.similarity < self.config.match_threshold && package.files.len() > 3 {
                if let Some(content) = content.as_deref() {
                    let aggregate = similarity::aggregate_similarity(
                        package.files.iter().map(|(_, c)| c.as_str()),
                        &similarity::extract_features(content),
                    );
                    if aggregate > score.similarity {
                        score = Score { strategy: Strategy::MultiFileAggregate, similarity: aggregate };
                    }
                }
            }

            if best.map(|b| score.similarity > b.similarity).unwrap_or(true) {
                best = Some(score);
            }
        }

        Ok(best.map(|score| VersionOutcome {
            version: version.to_string(),
            plan_index,
            score,
        }))
    }

    /// Fetches the first path that exists for the version, probing in
    /// priority order with bounded parallel chunks.
    async fn fetch_first_existing(
        &self,
        package: &str,
        version: &str,
        paths: &[String],
    ) -> Result<Option<(String, String)>> {
        for chunk in paths.chunks(self.config.entry_path_concurrency.max(1)) {
            let fetched = futures_util::future::join_all(
                chunk.iter().map(|path| async move {
                    (path.clone(), self.registry.fetch_file(package, version, path).await)
                }),
            )
            .await;
            // in-chunk order preserves the candidate priority
            let mut failure = None;
            for (path, result) in fetched {
                match result {
                    Ok(Some(content)) => return Ok(Some((path, content))),
                    Ok(None) => {}
                    Err(err) => failure = Some(err),
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(None)
    }

    /// A package is judged multi-file when its recovered tree is large,
    /// when the registry manifest names no entry point, or when the entry
    /// content is too small to carry signal.
    fn is_multi_file(&self, package: &ExtractedPackage, meta: &PackageMetadata) -> bool {
        if package.files.len() > 20 {
            return true;
        }
        let no_entry = meta.version_details.values().all(|details| {
            details.main.is_none() && details.module.is_none() && details.exports.is_none()
        });
        if no_entry && !meta.version_details.is_empty() {
            return true;
        }
        package
            .primary_file()
            .map(|(_, content)| content.len() < 2048)
            .unwrap_or(false)
    }

    /// Compares the recovered file tree against published file listings of
    /// the best-planned versions.
    async fn structural_fallback(
        &self,
        package: &ExtractedPackage,
        plan: &[String],
    ) -> Option<VersionOutcome> {
        let extracted_paths: Vec<String> = package.files.iter().map(|(p, _)| p.clone()).collect();
        let mut best: Option<VersionOutcome> = None;

        for (plan_index, version) in plan.iter().take(self.config.structural_probe_limit).enumerate()
        {
            let files = match self.ensure_file_list(&package.name, version).await {
                Ok(Some(files)) => files,
                Ok(None) => continue,
                Err(err) => {
                    debug!("file list fetch failed for {}@{version}: {err}", package.name);
                    continue;
                }
            };
            let similarity = similarity::structural_similarity(&extracted_paths, &files);
            let score = Score { strategy: Strategy::Structural, similarity };
            let better = best
                .as_ref()
                .map(|b| similarity > b.score.similarity)
                .unwrap_or(similarity > 0.0);
            if better {
                best = Some(VersionOutcome { version: version.clone(), plan_index, score });
            }
        }

        best
    }

    async fn ensure_file_list(&self, package: &str, version: &str) -> Result<Option<Vec<String>>> {
        if let Some(entry) = self.store.file_list(package, version).await? {
            return Ok(Some(entry.files));
        }
        let Some(files) = self.registry.fetch_file_list(package, version).await? else {
            return Ok(None);
        };
        self.store
            .set_file_list(&FileListEntry {
                package: package.to_string(),
                version: version.to_string(),
                files: files.clone(),
                fetched_at: utils::now_ms(),
            })
            .await?;
        Ok(Some(files))
    }

    async fn write_match(
        &self,
        package: &str,
        extracted_normalized_hash: &str,
        best: Option<&VersionOutcome>,
    ) -> Result<()> {
        let result = MatchResult {
            package: package.to_string(),
            extracted_normalized_hash: extracted_normalized_hash.to_string(),
            matched_version: best.map(|b| b.version.clone()),
            similarity: best.map(|b| b.score.similarity).unwrap_or(0.0),
            confidence: best.and_then(|b| b.score.confidence()),
            fetched_at: utils::now_ms(),
        };
        self.store.set_match_result(&result).await
    }
}

/// Builds a [`ContentFingerprint`] for one file body.
pub fn build_fingerprint(
    package: &str,
    version: &str,
    entry_path: &str,
    content: &str,
) -> ContentFingerprint {
    ContentFingerprint {
        package: package.to_string(),
        version: version.to_string(),
        entry_path: entry_path.to_string(),
        content_hash: hashing::content_hash(content),
        normalized_hash: hashing::normalized_hash(content),
        signature: hashing::structural_signature(content),
        content_length: content.len(),
        is_minified: Some(hashing::looks_minified(content)),
        fetched_at: utils::now_ms(),
    }
}

/// Resolves the entry paths to probe for a version, split into plain and
/// minified candidate lists.
///
/// Manifest hints (`module`, `main`, the `"."` export) come first, then a
/// fixed fallback list derived from the package base-name.
fn entry_path_candidates(
    details: Option<&VersionDetails>,
    package: &str,
) -> (Vec<String>, Vec<String>) {
    let base = package.rsplit('/').next().unwrap_or(package);
    let mut plain: Vec<String> = Vec::new();
    let mut minified: Vec<String> = Vec::new();

    let mut push = |list: &mut Vec<String>, path: &str| {
        let path = path.trim_start_matches("./").trim_start_matches('/');
        if path.is_empty() {
            return;
        }
        let path = path.to_string();
        if !list.contains(&path) {
            list.push(path);
        }
    };

    if let Some(details) = details {
        if let Some(module) = &details.module {
            push(&mut plain, module);
        }
        if let Some(main) = &details.main {
            push(&mut plain, main);
        }
        for path in dot_export_targets(details.exports.as_ref()) {
            push(&mut plain, &path);
        }
    }

    for path in [
        format!("dist/{base}.min.js"),
        format!("dist/{base}.js"),
        format!("umd/{base}.min.js"),
        format!("umd/{base}.production.min.js"),
        format!("cjs/{base}.production.min.js"),
        format!("dist/{base}.umd.min.js"),
        "dist/index.min.js".to_string(),
        "dist/index.js".to_string(),
        "lib/index.js".to_string(),
        "index.js".to_string(),
    ] {
        if path.contains(".min.") || path.contains(".production.") {
            push(&mut minified, &path);
        } else {
            push(&mut plain, &path);
        }
    }

    // manifest hints that point at minified builds belong to the other list
    let (still_plain, moved): (Vec<String>, Vec<String>) = plain
        .into_iter()
        .partition(|p| !p.contains(".min.") && !p.contains(".production."));
    let mut minified_all = moved;
    minified_all.extend(minified);
    let mut dedup = Vec::new();
    for path in minified_all {
        if !dedup.contains(&path) {
            dedup.push(path);
        }
    }

    (still_plain, dedup)
}

/// Collects the string targets of `exports["."]`, looking through the
/// `import`/`module`/`require`/`default` conditions.
fn dot_export_targets(exports: Option<&serde_json::Value>) -> Vec<String> {
    let mut out = Vec::new();
    let Some(exports) = exports else { return out };

    let dot = match exports {
        serde_json::Value::String(s) => {
            out.push(s.clone());
            return out;
        }
        serde_json::Value::Object(map) => {
            if let Some(dot) = map.get(".") {
                dot
            } else if map.keys().any(|k| k.starts_with('.')) {
                return out;
            } else {
                // conditions object without subpaths acts as the "." entry
                exports
            }
        }
        _ => return out,
    };

    match dot {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Object(map) => {
            for condition in ["import", "module", "require", "default"] {
                match map.get(condition) {
                    Some(serde_json::Value::String(s)) => out.push(s.clone()),
                    Some(serde_json::Value::Object(nested)) => {
                        if let Some(serde_json::Value::String(s)) = nested.get("default") {
                            out.push(s.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    let mut seen = BTreeSet::new();
    out.retain(|p| seen.insert(p.clone()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_candidates_prefer_manifest_hints() {
        let details = VersionDetails {
            module: Some("dist/demo.mjs".to_string()),
            main: Some("./lib/main.js".to_string()),
            exports: Some(json!({".": {"import": "./dist/demo.mjs", "require": "./dist/demo.cjs"}})),
            ..Default::default()
        };
        let (plain, minified) = entry_path_candidates(Some(&details), "demo");
        assert_eq!(plain[0], "dist/demo.mjs");
        assert_eq!(plain[1], "lib/main.js");
        assert!(plain.contains(&"dist/demo.cjs".to_string()));
        assert!(minified.contains(&"dist/demo.min.js".to_string()));
        assert!(minified.contains(&"cjs/demo.production.min.js".to_string()));
    }

    #[test]
    fn scoped_packages_use_base_name_for_fallbacks() {
        let (_, minified) = entry_path_candidates(None, "@vendor/widget");
        assert!(minified.contains(&"dist/widget.min.js".to_string()));
    }

    #[test]
    fn minified_manifest_hints_move_to_the_minified_list() {
        let details = VersionDetails {
            main: Some("dist/lib.min.js".to_string()),
            ..Default::default()
        };
        let (plain, minified) = entry_path_candidates(Some(&details), "lib");
        assert!(!plain.iter().any(|p| p.contains(".min.")));
        assert_eq!(minified[0], "dist/lib.min.js");
    }

    #[test]
    fn dot_exports_handle_conditions_and_nesting() {
        let exports = json!({
            ".": {
                "import": {"default": "./dist/index.mjs"},
                "require": "./dist/index.cjs"
            },
            "./package.json": "./package.json"
        });
        let targets = dot_export_targets(Some(&exports));
        assert_eq!(targets, vec!["./dist/index.mjs", "./dist/index.cjs"]);
    }

    #[tokio::test]
    async fn cached_match_short_circuits_network() {
        let store: Arc<dyn FingerprintStore> = Arc::new(MemoryStore::new());
        // an offline registry client fails loudly if it is consulted
        let registry = RegistryClient::new(reqwest::Client::new()).with_offline(true);
        let fingerprinter = Fingerprinter::new(store.clone(), registry);

        let mut package = ExtractedPackage::new("demo");
        package.files.push(("index.js".to_string(), "export const x = 1;".to_string()));
        let extracted = build_fingerprint("demo", "extracted", "index.js", "export const x = 1;");

        store
            .set_match_result(&MatchResult {
                package: "demo".to_string(),
                extracted_normalized_hash: extracted.normalized_hash.clone(),
                matched_version: Some("2.0.0".to_string()),
                similarity: 1.0,
                confidence: Some(Confidence::Exact),
                fetched_at: 1,
            })
            .await
            .unwrap();

        let result = fingerprinter.fingerprint_package(&package).await.unwrap();
        assert!(result.from_cache);
        assert_eq!(result.matched_version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn offline_mode_returns_clean_no_match_without_caching() {
        let store: Arc<dyn FingerprintStore> = Arc::new(MemoryStore::new());
        let registry = RegistryClient::new(reqwest::Client::new()).with_offline(true);
        let fingerprinter = Fingerprinter::new(store.clone(), registry);

        let mut package = ExtractedPackage::new("internal-thing");
        package.files.push(("index.js".to_string(), "export {}".to_string()));

        let result = fingerprinter.fingerprint_package(&package).await.unwrap();
        assert!(result.matched_version.is_none());

        // an offline miss is not evidence of nonexistence
        let extracted = build_fingerprint("internal-thing", "extracted", "index.js", "export {}");
        let cached =
            store.match_result("internal-thing", &extracted.normalized_hash).await.unwrap();
        assert!(cached.is_none());
    }
}
