//! Source Map v3 model, validation and source recovery.
//!
//! The flat v3 form is the only supported dialect. Sectioned "index maps"
//! are rejected at parse time so downstream extraction counts stay truthful.

use crate::error::{LiftError, Result};
use serde::{Deserialize, Serialize};

pub mod discover;
pub mod extract;
pub mod vlq;

pub use discover::{BundleKind, DiscoveryOutcome, LocationType, SourceMapDiscovery};
pub use extract::{ExtractOptions, ExtractedSource, ExtractionOutcome};
pub use vlq::{validate_mappings, MappingDiagnostic, MappingErrorCode, MappingValidation};

/// A parsed Source Map v3 document.
///
/// `sources` and `sourcesContent` entries can be `null` per ECMA-426; the
/// extractor accounts for both.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapV3 {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub source_root: Option<String>,
    #[serde(default)]
    pub sources: Vec<Option<String>>,
    #[serde(default)]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub mappings: String,
    /// Present only in sectioned index maps, which are not supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<serde_json::Value>,
}

impl SourceMapV3 {
    /// Parses a source map from its JSON text.
    ///
    /// Rejects sectioned index maps and any version other than 3.
    pub fn parse(json: &str) -> Result<Self> {
        // some servers prepend the XSSI guard `)]}'` to source maps
        let json = json.strip_prefix(")]}'").map(|rest| rest.trim_start_matches('\n')).unwrap_or(json);
        let map: Self = serde_json::from_str(json)?;
        if map.sections.is_some() {
            return Err(LiftError::IndexMapUnsupported);
        }
        if map.version != 3 {
            return Err(LiftError::UnsupportedSourceMapVersion(map.version));
        }
        Ok(map)
    }

    /// Number of names, `0` when the field is absent.
    pub fn names_len(&self) -> usize {
        self.names.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Validates the `mappings` string against this map's tables.
    pub fn validate(&self) -> MappingValidation {
        vlq::validate_mappings(&self.mappings, self.sources.len(), self.names_len())
    }

    /// Returns `true` if the map inlines at least one original source.
    pub fn has_sources_content(&self) -> bool {
        self.sources_content
            .as_ref()
            .map(|contents| contents.iter().any(Option::is_some))
            .unwrap_or(false)
    }
}
