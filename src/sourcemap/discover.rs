//! Locating the source map that belongs to a served bundle.
//!
//! Resolution order: `SourceMap`/`X-SourceMap` response headers, then a
//! trailing `sourceMappingURL` comment, then a `HEAD` probe of
//! `{bundle}.map`. A comment candidate only counts while it stays in
//! trailing position: any code after it resets the candidate, later valid
//! comments replace earlier ones.

use crate::report;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Whether a bundle is scanned with JS or CSS comment syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleKind {
    Js,
    Css,
}

impl BundleKind {
    /// Guesses the kind from the bundle URL's path extension.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".css") {
            Self::Css
        } else {
            Self::Js
        }
    }
}

/// Where a source map URL was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationType {
    HttpHeader,
    JsComment,
    CssComment,
    InlineDataUri,
    UrlProbe,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpHeader => "http-header",
            Self::JsComment => "js-comment",
            Self::CssComment => "css-comment",
            Self::InlineDataUri => "inline-data-uri",
            Self::UrlProbe => "url-probe",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of probing one bundle.
#[derive(Clone, Debug)]
pub enum DiscoveryOutcome {
    Found { source_map_url: String, location_type: LocationType, bundle_content: String },
    /// The bundle was fetched but no source map was advertised anywhere.
    NotFound { bundle_content: Option<String> },
    /// The bundle itself could not be fetched; callers fall back to
    /// fingerprinting the minified content they captured earlier.
    Failed { error: String },
}

impl DiscoveryOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    pub fn location_type(&self) -> Option<LocationType> {
        match self {
            Self::Found { location_type, .. } => Some(*location_type),
            _ => None,
        }
    }
}

/// Discovers source maps for served bundles.
#[derive(Clone, Debug)]
pub struct SourceMapDiscovery {
    client: reqwest::Client,
}

impl SourceMapDiscovery {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Runs the full resolution order for the given bundle URL.
    pub async fn discover(&self, bundle_url: &str) -> DiscoveryOutcome {
        report::discovery_start(bundle_url);
        let outcome = self.discover_inner(bundle_url).await;
        report::discovery_done(
            bundle_url,
            outcome.is_found(),
            outcome.location_type().map(|l| l.as_str()),
        );
        outcome
    }

    async fn discover_inner(&self, bundle_url: &str) -> DiscoveryOutcome {
        let response = match self.client.get(bundle_url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("bundle fetch failed for {bundle_url}: {err}");
                return DiscoveryOutcome::Failed { error: err.to_string() };
            }
        };
        if !response.status().is_success() {
            return DiscoveryOutcome::Failed {
                error: format!("bundle fetch returned {}", response.status()),
            };
        }

        // `SourceMap` wins over the deprecated `X-SourceMap`
        let header_url = response
            .headers()
            .get("SourceMap")
            .or_else(|| response.headers().get("X-SourceMap"))
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return DiscoveryOutcome::Failed { error: err.to_string() },
        };

        if let Some(header_url) = header_url {
            let resolved = resolve_relative(bundle_url, &header_url);
            return DiscoveryOutcome::Found {
                source_map_url: resolved,
                location_type: LocationType::HttpHeader,
                bundle_content: body,
            };
        }

        let kind = match content_type.as_deref().map(|ct| ct.starts_with("text/css")) {
            Some(true) => BundleKind::Css,
            _ => BundleKind::from_url(bundle_url),
        };

        if let Some(comment_url) = find_source_map_comment(&body, kind) {
            if comment_url.starts_with("data:") {
                return DiscoveryOutcome::Found {
                    source_map_url: comment_url,
                    location_type: LocationType::InlineDataUri,
                    bundle_content: body,
                };
            }
            let location_type = match kind {
                BundleKind::Js => LocationType::JsComment,
                BundleKind::Css => LocationType::CssComment,
            };
            return DiscoveryOutcome::Found {
                source_map_url: resolve_relative(bundle_url, &comment_url),
                location_type,
                bundle_content: body,
            };
        }

        // last resort: probe the sidecar convention
        let probe_url = format!("{bundle_url}.map");
        match self.client.head(&probe_url).send().await {
            Ok(response) if response.status().is_success() => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok());
                if plausible_map_content_type(content_type) {
                    return DiscoveryOutcome::Found {
                        source_map_url: probe_url,
                        location_type: LocationType::UrlProbe,
                        bundle_content: body,
                    };
                }
                trace!("rejecting {probe_url}: implausible content-type {content_type:?}");
            }
            Ok(_) => {}
            Err(err) => trace!("HEAD probe failed for {probe_url}: {err}"),
        }

        DiscoveryOutcome::NotFound { bundle_content: Some(body) }
    }
}

/// Accepts the content types a real source map is served with; an HTML
/// answer is an SPA fallback page, not a map.
fn plausible_map_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else { return true };
    let media = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    matches!(media.as_str(), "" | "application/json" | "application/octet-stream" | "text/plain")
}

fn resolve_relative(base: &str, candidate: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(candidate)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => candidate.to_string(),
    }
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Extracts the directive URL out of a comment body like
/// `# sourceMappingURL=app.js.map`, if the body is such a directive.
fn directive_url(comment_body: &str) -> Option<String> {
    let rest = comment_body.strip_prefix(['#', '@'])?;
    let rest = rest.trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix("sourceMappingURL=")?;
    let url: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && !is_line_terminator(*c))
        .collect();
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

/// Scans a bundle body for the last `sourceMappingURL` comment that remains
/// in trailing position.
///
/// Only whitespace and further comments may follow a candidate; any code
/// resets tracking to `None`. All Unicode line terminators are honored, and
/// an unclosed block comment at EOF still counts as a comment.
pub fn find_source_map_comment(content: &str, kind: BundleKind) -> Option<String> {
    let mut candidate: Option<String> = None;
    let mut chars = content.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c.is_whitespace() || is_line_terminator(c) {
            continue;
        }

        if c == '/' {
            match chars.peek().map(|(_, c)| *c) {
                Some('/') if kind == BundleKind::Js => {
                    chars.next();
                    let start = chars.peek().map(|(i, _)| *i).unwrap_or(content.len());
                    let mut end = content.len();
                    for (j, c2) in chars.by_ref() {
                        if is_line_terminator(c2) {
                            end = j;
                            break;
                        }
                    }
                    if let Some(url) = directive_url(&content[start..end]) {
                        candidate = Some(url);
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let start = chars.peek().map(|(i, _)| *i).unwrap_or(content.len());
                    let mut end = content.len();
                    let mut prev = '\0';
                    for (j, c2) in chars.by_ref() {
                        if prev == '*' && c2 == '/' {
                            end = j - 1;
                            break;
                        }
                        prev = c2;
                    }
                    let body = content[start..end.min(content.len())].trim();
                    if let Some(url) = directive_url(body) {
                        // block-comment directives belong to CSS syntax
                        if kind == BundleKind::Css {
                            candidate = Some(url);
                        }
                    }
                    continue;
                }
                _ => {}
            }
        }

        // anything else is code: the current candidate is no longer trailing
        candidate = None;

        // skip string literals wholesale so quoted comment look-alikes
        // such as `var s = "//# sourceMappingURL=x"` are not picked up
        if matches!(c, '"' | '\'' | '`') {
            let quote = c;
            while let Some((_, c2)) = chars.next() {
                if c2 == '\\' {
                    chars.next();
                } else if c2 == quote {
                    break;
                } else if quote != '`' && is_line_terminator(c2) {
                    break;
                }
            }
        }
    }

    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_js_comment() {
        let body = "console.log(1);\n//# sourceMappingURL=app.js.map\n";
        assert_eq!(find_source_map_comment(body, BundleKind::Js).as_deref(), Some("app.js.map"));
    }

    #[test]
    fn supports_legacy_at_syntax() {
        let body = "f();\n//@ sourceMappingURL=legacy.js.map";
        assert_eq!(find_source_map_comment(body, BundleKind::Js).as_deref(), Some("legacy.js.map"));
    }

    #[test]
    fn last_trailing_url_wins() {
        let body = "//# sourceMappingURL=first.js.map\ncode();\n//# sourceMappingURL=last.js.map";
        assert_eq!(find_source_map_comment(body, BundleKind::Js).as_deref(), Some("last.js.map"));
    }

    #[test]
    fn code_after_candidate_invalidates() {
        let body = "//# sourceMappingURL=app.js.map\nvar x=1;";
        assert_eq!(find_source_map_comment(body, BundleKind::Js), None);
    }

    #[test]
    fn trailing_comments_do_not_invalidate() {
        let body = "f();\n//# sourceMappingURL=app.js.map\n// trailing note\n/* and more */";
        assert_eq!(find_source_map_comment(body, BundleKind::Js).as_deref(), Some("app.js.map"));
    }

    #[test]
    fn respects_unicode_line_terminators() {
        let body = "//# sourceMappingURL=first.js.map\u{2028}g();\u{2029}//# sourceMappingURL=ls.js.map";
        assert_eq!(find_source_map_comment(body, BundleKind::Js).as_deref(), Some("ls.js.map"));
    }

    #[test]
    fn ignores_directives_inside_strings() {
        let body = "var s = \"//# sourceMappingURL=fake.js.map\";";
        assert_eq!(find_source_map_comment(body, BundleKind::Js), None);
    }

    #[test]
    fn finds_css_block_comment() {
        let body = ".a{color:red}\n/*# sourceMappingURL=styles.css.map */";
        assert_eq!(
            find_source_map_comment(body, BundleKind::Css).as_deref(),
            Some("styles.css.map")
        );
    }

    #[test]
    fn unclosed_block_comment_counts() {
        let body = ".a{color:red}\n/*# sourceMappingURL=styles.css.map";
        assert_eq!(
            find_source_map_comment(body, BundleKind::Css).as_deref(),
            Some("styles.css.map")
        );
    }

    #[test]
    fn detects_data_uri_directives() {
        let body = "//# sourceMappingURL=data:application/json;base64,eyJ2ZXJzaW9uIjozfQ==";
        let url = find_source_map_comment(body, BundleKind::Js).unwrap();
        assert!(url.starts_with("data:"));
    }

    #[test]
    fn plausible_content_types() {
        assert!(plausible_map_content_type(None));
        assert!(plausible_map_content_type(Some("application/json; charset=utf-8")));
        assert!(plausible_map_content_type(Some("application/octet-stream")));
        assert!(plausible_map_content_type(Some("text/plain")));
        assert!(!plausible_map_content_type(Some("text/html; charset=utf-8")));
        assert!(!plausible_map_content_type(Some("image/png")));
    }
}
