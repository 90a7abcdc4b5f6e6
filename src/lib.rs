#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;

pub mod analyze;
pub mod assets;
pub mod fingerprint;
pub mod reconstruct;
pub mod report;
pub mod sourcemap;
pub mod utils;

pub use error::{LiftError, LiftIoError, Result};

pub use analyze::{analyze_sources, FileAnalysis, SourceTreeAnalysis};
pub use assets::{AssetFilter, AssetMap, CapturedAsset};
pub use fingerprint::{
    ExtractedPackage, FingerprintConfig, FingerprintStore, Fingerprinter, JsonFileStore,
    MemoryStore, PackageMatch, RegistryClient,
};
pub use reconstruct::{
    reconstruct_project, write_artifacts, ReconstructionInput, ReconstructionOutcome,
};
pub use sourcemap::{
    DiscoveryOutcome, ExtractOptions, ExtractedSource, ExtractionOutcome, LocationType,
    MappingValidation, SourceMapDiscovery, SourceMapV3,
};

use base64::Engine;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

/// The directory layout of a reconstruction.
#[derive(Clone, Debug)]
pub struct ProjectPaths {
    /// Output root the rebuilt project is written under.
    pub root: PathBuf,
    /// Where the capture collaborator stores raw assets.
    pub static_dir: PathBuf,
    /// Location of the fingerprint cache.
    pub cache_dir: Option<PathBuf>,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let static_dir = root.join("_server").join("static");
        Self { root, static_dir, cache_dir: None }
    }
}

/// A reconstruction session: recovered sources on one side, the registry
/// and cache on the other.
#[derive(Clone)]
pub struct Project {
    pub paths: ProjectPaths,
    /// Package names treated as first-party even under `node_modules`.
    pub internal_packages: BTreeSet<String>,
    /// Offline mode: network misses become clean no-results.
    pub offline: bool,
    pub fingerprint_config: FingerprintConfig,
    http: reqwest::Client,
    store: Arc<dyn FingerprintStore>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("paths", &self.paths)
            .field("internal_packages", &self.internal_packages)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Convenience function to call `ProjectBuilder::default()`.
    pub fn builder() -> ProjectBuilder {
        ProjectBuilder::default()
    }

    /// Returns the output root of the project.
    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    /// The discovery client used for bundles of this project.
    pub fn discovery(&self) -> SourceMapDiscovery {
        SourceMapDiscovery::new(self.http.clone())
    }

    /// The registry client, honoring the project's offline switch.
    pub fn registry(&self) -> RegistryClient {
        RegistryClient::new(self.http.clone()).with_offline(self.offline)
    }

    /// The fingerprint orchestrator backed by this project's cache.
    pub fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::new(self.store.clone(), self.registry())
            .with_config(self.fingerprint_config.clone())
    }

    /// Discovers, validates and extracts the source map of one bundle.
    ///
    /// Not finding a map is a normal outcome; an invalid `mappings` string
    /// skips extraction for this map and reports the diagnostics instead.
    pub async fn recover_bundle(&self, bundle_url: &str) -> Result<RecoveredBundle> {
        let mut recovered =
            RecoveredBundle { bundle_url: bundle_url.to_string(), ..Default::default() };
        if self.offline {
            trace!("offline mode; skipping discovery for {bundle_url}");
            return Ok(recovered);
        }

        let (source_map_url, location_type, bundle_content) =
            match self.discovery().discover(bundle_url).await {
                DiscoveryOutcome::Found { source_map_url, location_type, bundle_content } => {
                    (source_map_url, location_type, bundle_content)
                }
                DiscoveryOutcome::NotFound { bundle_content } => {
                    recovered.bundle_content = bundle_content;
                    return Ok(recovered);
                }
                DiscoveryOutcome::Failed { error } => {
                    debug!("discovery failed for {bundle_url}: {error}");
                    recovered.discovery_error = Some(error);
                    return Ok(recovered);
                }
            };

        recovered.source_map_url = Some(source_map_url.clone());
        recovered.location_type = Some(location_type);
        recovered.bundle_content = Some(bundle_content);

        let map_text = if source_map_url.starts_with("data:") {
            decode_data_uri(&source_map_url)?
        } else {
            self.http.get(&source_map_url).send().await?.error_for_status()?.text().await?
        };

        let map = SourceMapV3::parse(&map_text)?;
        let validation = map.validate();
        if !validation.valid {
            debug!(
                "source map for {bundle_url} failed validation with {} diagnostics",
                validation.diagnostics.len()
            );
            recovered.validation = Some(validation);
            return Ok(recovered);
        }
        recovered.validation = Some(validation);

        let options = ExtractOptions {
            // vendor sources stay in; partitioning separates them later
            exclude: Vec::new(),
            internal_packages: self.internal_packages.clone(),
        };
        recovered.extraction =
            Some(sourcemap::extract::extract_sources(&map, bundle_url, &options));
        Ok(recovered)
    }

    /// Splits extracted sources into the first-party tree and per-package
    /// vendor source sets for fingerprinting.
    pub fn partition_sources(
        &self,
        sources: &[ExtractedSource],
    ) -> (Vec<(String, String)>, Vec<ExtractedPackage>) {
        let mut tree = Vec::new();
        let mut packages: std::collections::BTreeMap<String, ExtractedPackage> =
            std::collections::BTreeMap::new();

        for source in sources {
            match split_vendor_path(&source.path) {
                Some((package, rest)) if !self.internal_packages.contains(&package) => {
                    let entry = packages
                        .entry(package.clone())
                        .or_insert_with(|| ExtractedPackage::new(package));
                    entry.files.push((rest, source.content.clone()));
                }
                _ => tree.push((source.path.clone(), source.content.clone())),
            }
        }

        (tree, packages.into_values().collect())
    }

    /// Runs reconstruction over recovered sources.
    pub fn reconstruct(&self, input: &ReconstructionInput) -> Result<ReconstructionOutcome> {
        reconstruct_project(self.root(), input)
    }

    /// Persists reconstruction artifacts under the output root.
    pub fn write_artifacts(&self, outcome: &ReconstructionOutcome) -> Result<Vec<String>> {
        reconstruct::write_artifacts(self.root(), outcome)
    }
}

/// What one bundle probe produced.
#[derive(Clone, Debug, Default)]
pub struct RecoveredBundle {
    pub bundle_url: String,
    pub source_map_url: Option<String>,
    pub location_type: Option<LocationType>,
    pub bundle_content: Option<String>,
    pub validation: Option<MappingValidation>,
    pub extraction: Option<ExtractionOutcome>,
    /// Set when the bundle itself could not be fetched.
    pub discovery_error: Option<String>,
}

impl RecoveredBundle {
    /// The extracted sources, empty when nothing was recovered.
    pub fn sources(&self) -> &[ExtractedSource] {
        self.extraction.as_ref().map(|e| e.sources.as_slice()).unwrap_or(&[])
    }

    /// Whether any original source was materialized.
    pub fn recovered(&self) -> bool {
        !self.sources().is_empty()
    }
}

/// Package name and in-package path of a `node_modules` source.
fn split_vendor_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("node_modules/")?;
    let (package, inner) = if rest.starts_with('@') {
        let mut parts = rest.splitn(3, '/');
        let scope = parts.next()?;
        let name = parts.next()?;
        (format!("{scope}/{name}"), parts.next().unwrap_or("").to_string())
    } else {
        let mut parts = rest.splitn(2, '/');
        let name = parts.next()?;
        (name.to_string(), parts.next().unwrap_or("").to_string())
    };
    if inner.is_empty() {
        return None;
    }
    Some((package, inner))
}

/// Decodes a `data:` URI into its textual payload.
fn decode_data_uri(uri: &str) -> Result<String> {
    let rest = uri.strip_prefix("data:").ok_or_else(|| LiftError::msg("not a data URI"))?;
    let (header, payload) =
        rest.split_once(',').ok_or_else(|| LiftError::msg("data URI has no payload"))?;
    if header.ends_with(";base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| LiftError::msg(format!("invalid base64 payload: {err}")))?;
        String::from_utf8(bytes)
            .map_err(|err| LiftError::msg(format!("data URI is not utf8: {err}")))
    } else {
        Ok(percent_decode(payload))
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = input
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Builds a [`Project`].
pub struct ProjectBuilder {
    root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    internal_packages: BTreeSet<String>,
    offline: bool,
    fingerprint_config: FingerprintConfig,
    store: Option<Arc<dyn FingerprintStore>>,
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self {
            root: None,
            cache_dir: None,
            internal_packages: BTreeSet::new(),
            offline: false,
            fingerprint_config: FingerprintConfig::default(),
            store: None,
        }
    }
}

impl ProjectBuilder {
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Declares a package as first-party even though it appears under
    /// `node_modules` in the recovered tree.
    #[must_use]
    pub fn internal_package(mut self, name: impl Into<String>) -> Self {
        self.internal_packages.insert(name.into());
        self
    }

    #[must_use]
    pub fn internal_packages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.internal_packages.extend(names.into_iter().map(Into::into));
        self
    }

    /// Activates offline mode.
    ///
    /// Prevents all network access; lookups behave like clean misses.
    #[must_use]
    pub fn offline(self) -> Self {
        self.set_offline(true)
    }

    #[must_use]
    pub fn set_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    #[must_use]
    pub fn fingerprint_config(mut self, config: FingerprintConfig) -> Self {
        self.fingerprint_config = config;
        self
    }

    /// Injects a custom cache store; tests pass a [`MemoryStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Project> {
        let Self { root, cache_dir, internal_packages, offline, fingerprint_config, store } = self;

        let root = root.unwrap_or_else(|| PathBuf::from("."));
        let mut paths = ProjectPaths::new(root);
        paths.cache_dir = cache_dir;

        let store = match (store, &paths.cache_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(JsonFileStore::new(dir)) as Arc<dyn FingerprintStore>,
            (None, None) => {
                Arc::new(JsonFileStore::default_location()) as Arc<dyn FingerprintStore>
            }
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("weblift/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Project { paths, internal_packages, offline, fingerprint_config, http, store })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_are_usable() {
        let project = Project::builder()
            .root("./out")
            .store(Arc::new(MemoryStore::new()))
            .offline()
            .build()
            .unwrap();
        assert!(project.offline);
        assert_eq!(project.paths.static_dir, Path::new("./out/_server/static"));
    }

    #[test]
    fn partitions_vendor_sources_per_package() {
        let project = Project::builder()
            .root("./out")
            .store(Arc::new(MemoryStore::new()))
            .internal_package("@acme/ui")
            .build()
            .unwrap();

        let sources = vec![
            ExtractedSource {
                path: "src/app.ts".to_string(),
                content: "app".to_string(),
                original_path: "webpack://site/src/app.ts".to_string(),
            },
            ExtractedSource {
                path: "node_modules/react/index.js".to_string(),
                content: "react".to_string(),
                original_path: String::new(),
            },
            ExtractedSource {
                path: "node_modules/@scope/pkg/dist/index.js".to_string(),
                content: "scoped".to_string(),
                original_path: String::new(),
            },
            ExtractedSource {
                path: "node_modules/@acme/ui/button.tsx".to_string(),
                content: "internal".to_string(),
                original_path: String::new(),
            },
        ];

        let (tree, packages) = project.partition_sources(&sources);
        assert_eq!(tree.len(), 2);
        assert!(tree.iter().any(|(p, _)| p == "src/app.ts"));
        assert!(tree.iter().any(|(p, _)| p == "node_modules/@acme/ui/button.tsx"));

        assert_eq!(packages.len(), 2);
        let scoped = packages.iter().find(|p| p.name == "@scope/pkg").unwrap();
        assert_eq!(scoped.files[0].0, "dist/index.js");
    }

    #[test]
    fn decodes_data_uris() {
        let decoded =
            decode_data_uri("data:application/json;base64,eyJ2ZXJzaW9uIjozfQ==").unwrap();
        assert_eq!(decoded, "{\"version\":3}");

        let decoded = decode_data_uri("data:application/json,%7B%22version%22%3A3%7D").unwrap();
        assert_eq!(decoded, "{\"version\":3}");
    }
}
