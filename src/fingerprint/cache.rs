//! Durable key/value store for fingerprinting facts.
//!
//! Every entry family embeds `fetchedAt` and caches negatives (a package
//! that does not exist, a search that found no version) so repeated runs
//! skip the network entirely. The store is an explicit handle passed
//! through every fingerprinting call; tests inject [`MemoryStore`].

use crate::{
    error::Result,
    fingerprint::similarity::Confidence,
    utils,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Per-version manifest fields that hint at the package's entry points.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,
    /// The raw `exports` map; only the `"."` entry is consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_dependencies: Option<BTreeMap<String, String>>,
}

/// Registry metadata for one package, immutable once cached.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    /// All published versions, ascending where parseable.
    pub versions: Vec<String>,
    #[serde(default)]
    pub version_details: BTreeMap<String, VersionDetails>,
    /// Dist-tags in declaration order; order drives search priority.
    #[serde(default)]
    pub dist_tags: Vec<(String, String)>,
    /// Publish timestamps as epoch milliseconds.
    #[serde(default)]
    pub version_times: BTreeMap<String, u64>,
    pub fetched_at: u64,
}

impl PackageMetadata {
    pub fn details(&self, version: &str) -> Option<&VersionDetails> {
        self.version_details.get(version)
    }
}

/// Hashes and shape facts for one published file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFingerprint {
    pub package: String,
    pub version: String,
    pub entry_path: String,
    /// md5 of the raw bytes.
    pub content_hash: String,
    /// md5 of the whitespace/comment-folded content.
    pub normalized_hash: String,
    /// Pipe-joined structural tokens.
    pub signature: String,
    pub content_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_minified: Option<bool>,
    pub fetched_at: u64,
}

/// Outcome of a version search for one package + extracted content hash.
/// A `null` matched version is a cached negative.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub package: String,
    pub extracted_normalized_hash: String,
    pub matched_version: Option<String>,
    pub similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub fetched_at: u64,
}

/// The published file listing of one package version.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListEntry {
    pub package: String,
    pub version: String,
    pub files: Vec<String>,
    pub fetched_at: u64,
}

/// Whether a package exists on the registry at all; `false` is durable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceEntry {
    pub exists: bool,
    pub fetched_at: u64,
}

/// Store interface the fingerprinting core runs against.
///
/// Reads must be safe across concurrent writers; implementations own
/// per-key write atomicity.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn metadata(&self, package: &str) -> Result<Option<PackageMetadata>>;
    async fn set_metadata(&self, package: &str, meta: &PackageMetadata) -> Result<()>;

    async fn package_existence(&self, package: &str) -> Result<Option<ExistenceEntry>>;
    async fn set_package_existence(&self, package: &str, exists: bool) -> Result<()>;

    async fn fingerprint(&self, package: &str, version: &str) -> Result<Option<ContentFingerprint>>;
    async fn set_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()>;

    async fn minified_fingerprint(
        &self,
        package: &str,
        version: &str,
    ) -> Result<Option<ContentFingerprint>>;
    async fn set_minified_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()>;

    async fn file_list(&self, package: &str, version: &str) -> Result<Option<FileListEntry>>;
    async fn set_file_list(&self, entry: &FileListEntry) -> Result<()>;

    async fn match_result(
        &self,
        package: &str,
        extracted_normalized_hash: &str,
    ) -> Result<Option<MatchResult>>;
    async fn set_match_result(&self, result: &MatchResult) -> Result<()>;
}

/// Replaces `/` so scoped package names become single path segments.
fn safe_key(name: &str) -> String {
    name.replace('/', "__")
}

/// A store that keeps one pretty-printed JSON file per key.
///
/// Writes go through a sibling temp file and rename, so a reader never
/// observes a torn entry.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses the platform cache directory (`<cache_dir>/weblift`).
    pub fn default_location() -> Self {
        let root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("weblift");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, family: &str, key: &str) -> PathBuf {
        self.root.join(family).join(format!("{}.json", safe_key(key)))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, family: &str, key: &str) -> Result<Option<T>> {
        let path = self.entry_path(family, key);
        if !path.exists() {
            return Ok(None);
        }
        match utils::read_json_file(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                // a corrupt entry behaves like a miss and gets rewritten
                warn!("discarding unreadable cache entry {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &str, value: &T) -> Result<()> {
        utils::write_json_file(self.entry_path(family, key), value)
    }
}

#[async_trait]
impl FingerprintStore for JsonFileStore {
    async fn metadata(&self, package: &str) -> Result<Option<PackageMetadata>> {
        self.read("metadata", package)
    }

    async fn set_metadata(&self, package: &str, meta: &PackageMetadata) -> Result<()> {
        self.write("metadata", package, meta)
    }

    async fn package_existence(&self, package: &str) -> Result<Option<ExistenceEntry>> {
        self.read("existence", package)
    }

    async fn set_package_existence(&self, package: &str, exists: bool) -> Result<()> {
        self.write("existence", package, &ExistenceEntry { exists, fetched_at: utils::now_ms() })
    }

    async fn fingerprint(&self, package: &str, version: &str) -> Result<Option<ContentFingerprint>> {
        self.read("fingerprints", &format!("{package}@{version}"))
    }

    async fn set_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()> {
        let key = format!("{}@{}", fingerprint.package, fingerprint.version);
        self.write("fingerprints", &key, fingerprint)
    }

    async fn minified_fingerprint(
        &self,
        package: &str,
        version: &str,
    ) -> Result<Option<ContentFingerprint>> {
        self.read("min-fingerprints", &format!("{package}@{version}"))
    }

    async fn set_minified_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()> {
        let key = format!("{}@{}", fingerprint.package, fingerprint.version);
        self.write("min-fingerprints", &key, fingerprint)
    }

    async fn file_list(&self, package: &str, version: &str) -> Result<Option<FileListEntry>> {
        self.read("filelists", &format!("{package}@{version}"))
    }

    async fn set_file_list(&self, entry: &FileListEntry) -> Result<()> {
        let key = format!("{}@{}", entry.package, entry.version);
        self.write("filelists", &key, entry)
    }

    async fn match_result(
        &self,
        package: &str,
        extracted_normalized_hash: &str,
    ) -> Result<Option<MatchResult>> {
        self.read("matches", &format!("{package}@{extracted_normalized_hash}"))
    }

    async fn set_match_result(&self, result: &MatchResult) -> Result<()> {
        let key = format!("{}@{}", result.package, result.extracted_normalized_hash);
        self.write("matches", &key, result)
    }
}

/// An in-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T: serde::de::DeserializeOwned>(&self, family: &str, key: &str) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(family.to_string(), key.to_string()))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn write<T: Serialize>(&self, family: &str, key: &str, value: &T) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(value) = serde_json::to_value(value) {
            entries.insert((family.to_string(), key.to_string()), value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FingerprintStore for MemoryStore {
    async fn metadata(&self, package: &str) -> Result<Option<PackageMetadata>> {
        Ok(self.read("metadata", package))
    }

    async fn set_metadata(&self, package: &str, meta: &PackageMetadata) -> Result<()> {
        self.write("metadata", package, meta);
        Ok(())
    }

    async fn package_existence(&self, package: &str) -> Result<Option<ExistenceEntry>> {
        Ok(self.read("existence", package))
    }

    async fn set_package_existence(&self, package: &str, exists: bool) -> Result<()> {
        self.write("existence", package, &ExistenceEntry { exists, fetched_at: utils::now_ms() });
        Ok(())
    }

    async fn fingerprint(&self, package: &str, version: &str) -> Result<Option<ContentFingerprint>> {
        Ok(self.read("fingerprints", &format!("{package}@{version}")))
    }

    async fn set_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()> {
        let key = format!("{}@{}", fingerprint.package, fingerprint.version);
        self.write("fingerprints", &key, fingerprint);
        Ok(())
    }

    async fn minified_fingerprint(
        &self,
        package: &str,
        version: &str,
    ) -> Result<Option<ContentFingerprint>> {
        Ok(self.read("min-fingerprints", &format!("{package}@{version}")))
    }

    async fn set_minified_fingerprint(&self, fingerprint: &ContentFingerprint) -> Result<()> {
        let key = format!("{}@{}", fingerprint.package, fingerprint.version);
        self.write("min-fingerprints", &key, fingerprint);
        Ok(())
    }

    async fn file_list(&self, package: &str, version: &str) -> Result<Option<FileListEntry>> {
        Ok(self.read("filelists", &format!("{package}@{version}")))
    }

    async fn set_file_list(&self, entry: &FileListEntry) -> Result<()> {
        let key = format!("{}@{}", entry.package, entry.version);
        self.write("filelists", &key, entry);
        Ok(())
    }

    async fn match_result(
        &self,
        package: &str,
        extracted_normalized_hash: &str,
    ) -> Result<Option<MatchResult>> {
        Ok(self.read("matches", &format!("{package}@{extracted_normalized_hash}")))
    }

    async fn set_match_result(&self, result: &MatchResult) -> Result<()> {
        let key = format!("{}@{}", result.package, result.extracted_normalized_hash);
        self.write("matches", &key, result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_store_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let fingerprint = ContentFingerprint {
            package: "@scope/pkg".to_string(),
            version: "1.2.3".to_string(),
            entry_path: "dist/index.js".to_string(),
            content_hash: "abc".to_string(),
            normalized_hash: "def".to_string(),
            signature: "k:if|c:2".to_string(),
            content_length: 1234,
            is_minified: Some(true),
            fetched_at: 1,
        };
        store.set_fingerprint(&fingerprint).await.unwrap();

        let loaded = store.fingerprint("@scope/pkg", "1.2.3").await.unwrap().unwrap();
        assert_eq!(loaded.normalized_hash, "def");
        assert_eq!(loaded.entry_path, "dist/index.js");

        assert!(store.fingerprint("@scope/pkg", "9.9.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn negative_existence_is_cached() {
        let store = MemoryStore::new();
        assert!(store.package_existence("ghost").await.unwrap().is_none());
        store.set_package_existence("ghost", false).await.unwrap();
        let entry = store.package_existence("ghost").await.unwrap().unwrap();
        assert!(!entry.exists);
    }

    #[tokio::test]
    async fn null_match_round_trips() {
        let store = MemoryStore::new();
        let result = MatchResult {
            package: "left-pad".to_string(),
            extracted_normalized_hash: "h".to_string(),
            matched_version: None,
            similarity: 0.0,
            confidence: None,
            fetched_at: utils::now_ms(),
        };
        store.set_match_result(&result).await.unwrap();
        let loaded = store.match_result("left-pad", "h").await.unwrap().unwrap();
        assert!(loaded.matched_version.is_none());
    }
}
