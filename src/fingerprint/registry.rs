//! npm registry and unpkg clients.
//!
//! One registry call per package yields the version list, per-version
//! entry-point hints, dist-tags and publish timestamps. A 404 is a durable
//! negative; transient failures bubble up and are never cached.

use crate::{
    error::{LiftError, Result},
    fingerprint::cache::{FingerprintStore, PackageMetadata, VersionDetails},
    report, utils,
};
use futures_util::{stream, StreamExt};
use semver::Version;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

/// Default public registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Default CDN used for per-version file content and file listings.
pub const DEFAULT_UNPKG_URL: &str = "https://unpkg.com";

/// Client for registry metadata and published file content.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    http: reqwest::Client,
    registry_url: String,
    unpkg_url: String,
    offline: bool,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            unpkg_url: DEFAULT_UNPKG_URL.to_string(),
            offline: false,
        }
    }

    /// Overrides the registry endpoint, e.g. for a mirror or a test server.
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    pub fn with_unpkg_url(mut self, url: impl Into<String>) -> Self {
        self.unpkg_url = url.into();
        self
    }

    /// In offline mode every lookup behaves like a clean miss.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Fetches the package document and maps it into [`PackageMetadata`].
    ///
    /// Returns `Ok(None)` for a 404 (the package does not exist) and `Err`
    /// for transient failures.
    pub async fn fetch_metadata(&self, package: &str) -> Result<Option<PackageMetadata>> {
        if self.offline {
            return Ok(None);
        }
        report::metadata_fetch(package);
        let url = format!("{}/{}", self.registry_url, encode_package_name(package));
        trace!("fetching registry metadata from {url}");
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LiftError::msg(format!(
                "registry returned {} for {package}",
                response.status()
            )));
        }
        let document: Value = response.json().await?;
        Ok(Some(parse_package_document(package, &document)))
    }

    /// Fetches a published file's content; `Ok(None)` when the path does not
    /// exist for that version.
    pub async fn fetch_file(
        &self,
        package: &str,
        version: &str,
        path: &str,
    ) -> Result<Option<String>> {
        if self.offline {
            return Ok(None);
        }
        let path = path.trim_start_matches("./").trim_start_matches('/');
        let url = format!("{}/{package}@{version}/{path}", self.unpkg_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LiftError::msg(format!("unpkg returned {} for {url}", response.status())));
        }
        Ok(Some(response.text().await?))
    }

    /// Fetches the recursive file listing of one published version.
    pub async fn fetch_file_list(
        &self,
        package: &str,
        version: &str,
    ) -> Result<Option<Vec<String>>> {
        if self.offline {
            return Ok(None);
        }
        let url = format!("{}/{package}@{version}/?meta", self.unpkg_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LiftError::msg(format!("unpkg returned {} for {url}", response.status())));
        }
        let meta: Value = response.json().await?;
        let mut files = Vec::new();
        flatten_file_meta(&meta, &mut files);
        files.sort();
        Ok(Some(files))
    }

    /// Warms the metadata cache for a package list with bounded parallelism,
    /// hiding registry latency before per-version probing begins.
    pub async fn prefetch_metadata(
        &self,
        packages: &[String],
        concurrency: usize,
        store: &Arc<dyn FingerprintStore>,
    ) {
        stream::iter(packages.iter().cloned())
            .map(|package| {
                let store = store.clone();
                async move {
                    if let Err(err) = self.ensure_metadata(&package, &store).await {
                        debug!("metadata prefetch failed for {package}: {err}");
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
    }

    /// Returns cached metadata, fetching and caching it on a miss.
    ///
    /// `Ok(None)` means the package durably does not exist.
    pub async fn ensure_metadata(
        &self,
        package: &str,
        store: &Arc<dyn FingerprintStore>,
    ) -> Result<Option<PackageMetadata>> {
        if let Some(meta) = store.metadata(package).await? {
            return Ok(Some(meta));
        }
        if let Some(existence) = store.package_existence(package).await? {
            if !existence.exists {
                return Ok(None);
            }
        }
        match self.fetch_metadata(package).await? {
            Some(meta) => {
                store.set_metadata(package, &meta).await?;
                store.set_package_existence(package, true).await?;
                Ok(Some(meta))
            }
            None => {
                if !self.offline {
                    store.set_package_existence(package, false).await?;
                }
                Ok(None)
            }
        }
    }
}

/// Scoped names keep their `@` but the inner slash is percent-encoded.
fn encode_package_name(package: &str) -> String {
    package.replace('/', "%2F")
}

/// Maps a raw registry document into the cached metadata shape.
pub fn parse_package_document(package: &str, document: &Value) -> PackageMetadata {
    let mut meta = PackageMetadata {
        name: document
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(package)
            .to_string(),
        fetched_at: utils::now_ms(),
        ..Default::default()
    };

    if let Some(versions) = document.get("versions").and_then(Value::as_object) {
        let mut parsed: Vec<(Option<Version>, String)> = versions
            .keys()
            .map(|v| (Version::parse(v).ok(), v.clone()))
            .collect();
        parsed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        meta.versions = parsed.into_iter().map(|(_, v)| v).collect();

        for (version, manifest) in versions {
            let details = VersionDetails {
                main: manifest.get("main").and_then(Value::as_str).map(str::to_owned),
                module: manifest.get("module").and_then(Value::as_str).map(str::to_owned),
                types: manifest.get("types").and_then(Value::as_str).map(str::to_owned),
                exports: manifest.get("exports").cloned(),
                dependencies: string_map(manifest.get("dependencies")),
                peer_dependencies: string_map(manifest.get("peerDependencies")),
            };
            meta.version_details.insert(version.clone(), details);
        }
    }

    if let Some(tags) = document.get("dist-tags").and_then(Value::as_object) {
        // document order is preserved and drives search priority
        for (tag, version) in tags {
            if let Some(version) = version.as_str() {
                meta.dist_tags.push((tag.clone(), version.to_string()));
            }
        }
    }

    if let Some(times) = document.get("time").and_then(Value::as_object) {
        for (version, time) in times {
            if version == "created" || version == "modified" {
                continue;
            }
            if let Some(ms) = time.as_str().and_then(parse_timestamp_ms) {
                meta.version_times.insert(version.clone(), ms);
            }
        }
    }

    meta
}

fn string_map(value: Option<&Value>) -> Option<BTreeMap<String, String>> {
    let map = value?.as_object()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect(),
    )
}

fn parse_timestamp_ms(raw: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

/// Recursively collects `type == "file"` paths from an unpkg `?meta` tree.
fn flatten_file_meta(node: &Value, out: &mut Vec<String>) {
    match node.get("type").and_then(Value::as_str) {
        Some("file") => {
            if let Some(path) = node.get("path").and_then(Value::as_str) {
                out.push(path.trim_start_matches('/').to_string());
            }
        }
        _ => {
            if let Some(children) = node.get("files").and_then(Value::as_array) {
                for child in children {
                    flatten_file_meta(child, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_package_document() {
        let document = json!({
            "name": "demo",
            "dist-tags": {"latest": "2.0.0", "next": "3.0.0-rc.1"},
            "versions": {
                "1.0.0": {"main": "index.js"},
                "2.0.0": {"module": "dist/demo.mjs", "exports": {".": {"import": "./dist/demo.mjs"}}},
                "3.0.0-rc.1": {"main": "index.js"}
            },
            "time": {
                "created": "2020-01-01T00:00:00.000Z",
                "1.0.0": "2020-01-02T00:00:00.000Z",
                "2.0.0": "2021-06-01T12:00:00.000Z"
            }
        });
        let meta = parse_package_document("demo", &document);
        assert_eq!(meta.versions, vec!["1.0.0", "2.0.0", "3.0.0-rc.1"]);
        assert_eq!(
            meta.dist_tags,
            vec![
                ("latest".to_string(), "2.0.0".to_string()),
                ("next".to_string(), "3.0.0-rc.1".to_string())
            ]
        );
        assert_eq!(meta.details("2.0.0").unwrap().module.as_deref(), Some("dist/demo.mjs"));
        assert!(meta.version_times["2.0.0"] > meta.version_times["1.0.0"]);
    }

    #[test]
    fn flattens_unpkg_meta_tree() {
        let meta = json!({
            "path": "/",
            "type": "directory",
            "files": [
                {"path": "/package.json", "type": "file"},
                {"path": "/dist", "type": "directory", "files": [
                    {"path": "/dist/index.js", "type": "file"}
                ]}
            ]
        });
        let mut files = Vec::new();
        flatten_file_meta(&meta, &mut files);
        files.sort();
        assert_eq!(files, vec!["dist/index.js", "package.json"]);
    }

    #[test]
    fn encodes_scoped_names() {
        assert_eq!(encode_package_name("@scope/pkg"), "@scope%2Fpkg");
        assert_eq!(encode_package_name("react"), "react");
    }
}
