//! Filtering captured assets and mapping remote URLs onto local paths.
//!
//! Filtering is two-phase: URL-only rules (extensions, include/exclude
//! globs) resolve before a body is ever fetched; MIME rules resolve after
//! headers arrive but before the body is read into memory.

use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub mod scan;

pub use scan::{parse_image_set, parse_srcset, SrcsetCandidate};

/// Subdomain prefixes that mark a host as a CDN of the captured site.
const CDN_SUBDOMAINS: &[&str] = &["cdn", "static", "assets", "images", "media"];

/// A captured network response, owned by the capture layer and read-only
/// here. `local_path` is always a forward-slash relative path under the
/// output root.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedAsset {
    pub url: String,
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub byte_len: u64,
    #[serde(default)]
    pub is_entrypoint: bool,
}

/// Why an asset was rejected, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(String),
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Two-phase asset filter.
#[derive(Debug, Default)]
pub struct AssetFilter {
    /// Allowed URL path extensions; empty allows everything.
    extensions: Vec<String>,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
    /// MIME prefixes that are always rejected.
    blocked_mime: Vec<String>,
    /// When non-empty, only these MIME prefixes pass phase two.
    allowed_mime: Vec<String>,
}

impl AssetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extensions<I: IntoIterator<Item = S>, S: Into<String>>(mut self, ext: I) -> Self {
        self.extensions = ext.into_iter().map(|e| e.into().to_ascii_lowercase()).collect();
        self
    }

    #[must_use]
    pub fn with_includes<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, globs: I) -> Self {
        self.include =
            globs.into_iter().filter_map(|g| glob::Pattern::new(g.as_ref()).ok()).collect();
        self
    }

    #[must_use]
    pub fn with_excludes<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, globs: I) -> Self {
        self.exclude =
            globs.into_iter().filter_map(|g| glob::Pattern::new(g.as_ref()).ok()).collect();
        self
    }

    #[must_use]
    pub fn with_blocked_mime<I: IntoIterator<Item = S>, S: Into<String>>(mut self, mime: I) -> Self {
        self.blocked_mime = mime.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_allowed_mime<I: IntoIterator<Item = S>, S: Into<String>>(mut self, mime: I) -> Self {
        self.allowed_mime = mime.into_iter().map(Into::into).collect();
        self
    }

    /// Phase one: URL-only rules, applied before any fetch.
    pub fn url_decision(&self, url: &str) -> FilterDecision {
        let stripped = url.split(['?', '#']).next().unwrap_or(url);
        let path = match Url::parse(stripped) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => stripped.to_string(),
        };

        if !self.extensions.is_empty() {
            let ext = path.rsplit('/').next().and_then(|name| name.rsplit_once('.'));
            if let Some((_, ext)) = ext {
                if !self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    return FilterDecision::Reject(format!("extension `{ext}` not included"));
                }
            }
        }

        if self.exclude.iter().any(|p| p.matches(stripped)) {
            return FilterDecision::Reject("matched an exclude pattern".to_string());
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(stripped)) {
            return FilterDecision::Reject("matched no include pattern".to_string());
        }
        FilterDecision::Accept
    }

    /// Phase two: MIME rules, applied once headers arrive and before the
    /// body is read.
    pub fn mime_decision(&self, content_type: Option<&str>) -> FilterDecision {
        let Some(content_type) = content_type else { return FilterDecision::Accept };
        let media = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

        if self.blocked_mime.iter().any(|m| media.starts_with(m.as_str())) {
            return FilterDecision::Reject(format!("blocked media type `{media}`"));
        }
        if !self.allowed_mime.is_empty()
            && !self.allowed_mime.iter().any(|m| media.starts_with(m.as_str()))
        {
            return FilterDecision::Reject(format!("media type `{media}` not allowed"));
        }
        FilterDecision::Accept
    }
}

/// Maps a captured URL to its local path under the output root.
///
/// Same-origin URLs keep their pathname (the root path becomes
/// `index.html`, extensionless paths gain `/index.html`); recognized CDN
/// subdomains map under `_<subdomain>/`; all other cross-origin URLs land
/// in `_external/` under a content-addressed name.
pub fn local_path_for(page_url: &Url, asset_url: &Url) -> String {
    if same_origin(page_url, asset_url) {
        return same_origin_path(asset_url);
    }

    if let Some(sub) = cdn_subdomain(asset_url) {
        let path = asset_url.path().trim_start_matches('/');
        if path.is_empty() {
            return format!("_{sub}/index.html");
        }
        return format!("_{sub}/{path}");
    }

    let digest = utils::md5_hex_prefix(asset_url.as_str(), 12);
    let name = sanitize_file_name(
        asset_url.path_segments().and_then(|mut s| s.next_back()).unwrap_or(""),
    );
    format!("_external/{digest}_{name}")
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

fn same_origin_path(url: &Url) -> String {
    let path = url.path();
    if path == "/" || path.is_empty() {
        return "index.html".to_string();
    }
    let trimmed = path.trim_start_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if last.contains('.') {
        trimmed.to_string()
    } else {
        format!("{}/index.html", trimmed.trim_end_matches('/'))
    }
}

fn cdn_subdomain(url: &Url) -> Option<&'static str> {
    let host = url.host_str()?;
    let first = host.split('.').next()?;
    CDN_SUBDOMAINS.iter().copied().find(|sub| first.eq_ignore_ascii_case(sub))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}

/// A deduplicating URL-to-asset map.
#[derive(Debug, Default)]
pub struct AssetMap {
    assets: BTreeMap<String, CapturedAsset>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an asset unless its URL was already captured; returns
    /// whether it was new.
    pub fn insert(&mut self, asset: CapturedAsset) -> bool {
        if self.assets.contains_key(&asset.url) {
            return false;
        }
        self.assets.insert(asset.url.clone(), asset);
        true
    }

    pub fn local_path(&self, url: &str) -> Option<&str> {
        self.assets.get(url).map(|a| a.local_path.as_str())
    }

    pub fn get(&self, url: &str) -> Option<&CapturedAsset> {
        self.assets.get(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedAsset> {
        self.assets.values()
    }

    /// Local paths of the captured entry-point assets; these become the
    /// build inputs of the emitted bundler config.
    pub fn entrypoints(&self) -> Vec<String> {
        self.assets
            .values()
            .filter(|a| a.is_entrypoint)
            .map(|a| a.local_path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// A response whose body ended short of its advertised length.
///
/// The capture layer retries such responses once with a direct fetch;
/// partial recoveries are still written to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedResponse {
    pub expected: u64,
    pub received: u64,
}

/// Compares the advertised `Content-Length` with what actually arrived.
pub fn check_truncation(content_length: Option<u64>, received: u64) -> Option<TruncatedResponse> {
    match content_length {
        Some(expected) if expected > received => Some(TruncatedResponse { expected, received }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn same_origin_urls_keep_their_pathname() {
        let page = url("https://example.com/");
        assert_eq!(local_path_for(&page, &url("https://example.com/")), "index.html");
        assert_eq!(
            local_path_for(&page, &url("https://example.com/assets/app.js")),
            "assets/app.js"
        );
        assert_eq!(
            local_path_for(&page, &url("https://example.com/docs/guide")),
            "docs/guide/index.html"
        );
        assert_eq!(
            local_path_for(&page, &url("https://example.com/app.js?v=3")),
            "app.js"
        );
    }

    #[test]
    fn cdn_subdomains_map_to_prefixed_dirs() {
        let page = url("https://example.com/");
        assert_eq!(
            local_path_for(&page, &url("https://cdn.example.com/lib/chart.js")),
            "_cdn/lib/chart.js"
        );
        assert_eq!(
            local_path_for(&page, &url("https://static.other.net/font.woff2")),
            "_static/font.woff2"
        );
    }

    #[test]
    fn external_urls_are_content_addressed() {
        let page = url("https://example.com/");
        let path = local_path_for(&page, &url("https://fonts.example.net/inter.woff2?v=2"));
        assert!(path.starts_with("_external/"));
        let name = path.strip_prefix("_external/").unwrap();
        let (digest, rest) = name.split_at(12);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(rest, "_inter.woff2");

        // stable across calls
        assert_eq!(path, local_path_for(&page, &url("https://fonts.example.net/inter.woff2?v=2")));
    }

    #[test]
    fn url_phase_filters_before_fetching() {
        let filter = AssetFilter::new()
            .with_extensions(["js", "css", "html"])
            .with_excludes(["*analytics*"]);

        assert!(filter.url_decision("https://example.com/app.js").is_accept());
        assert!(filter.url_decision("https://example.com/app.js?q=1").is_accept());
        // extensionless URLs pass phase one; MIME decides later
        assert!(filter.url_decision("https://example.com/api/data").is_accept());
        assert!(!filter.url_decision("https://example.com/video.mp4").is_accept());
        assert!(!filter.url_decision("https://example.com/analytics.js").is_accept());
    }

    #[test]
    fn mime_phase_filters_after_headers() {
        let filter = AssetFilter::new()
            .with_blocked_mime(["video/", "audio/"])
            .with_allowed_mime(["text/", "application/", "image/", "font/"]);

        assert!(filter.mime_decision(Some("text/css; charset=utf-8")).is_accept());
        assert!(filter.mime_decision(None).is_accept());
        assert!(!filter.mime_decision(Some("video/mp4")).is_accept());
        assert!(!filter.mime_decision(Some("model/gltf+json")).is_accept());
    }

    #[test]
    fn asset_map_deduplicates_by_url() {
        let mut map = AssetMap::new();
        let asset = CapturedAsset {
            url: "https://example.com/app.js".to_string(),
            local_path: "app.js".to_string(),
            content_type: Some("text/javascript".to_string()),
            byte_len: 10,
            is_entrypoint: true,
        };
        assert!(map.insert(asset.clone()));
        assert!(!map.insert(asset));
        assert_eq!(map.len(), 1);
        assert_eq!(map.local_path("https://example.com/app.js"), Some("app.js"));
        assert_eq!(map.entrypoints(), vec!["app.js"]);
    }

    #[test]
    fn detects_truncated_responses() {
        assert_eq!(
            check_truncation(Some(100), 40),
            Some(TruncatedResponse { expected: 100, received: 40 })
        );
        assert_eq!(check_truncation(Some(100), 100), None);
        assert_eq!(check_truncation(None, 40), None);
    }
}
