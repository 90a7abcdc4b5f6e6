//! Layered similarity between extracted content and published package
//! content.
//!
//! Strategies share one scoring contract and are evaluated in priority
//! order; the first rule that applies wins, except that the
//! minification-robust feature comparison may override a weak base score.

use crate::fingerprint::cache::ContentFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which rule produced a similarity score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Raw byte hashes are equal.
    ExactHash,
    /// Whitespace/comment-folded hashes are equal.
    NormalizedHash,
    SignatureJaccard,
    MinifiedFeatures,
    Structural,
    MultiFileAggregate,
    LengthFallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactHash => "exact-hash",
            Self::NormalizedHash => "normalized-hash",
            Self::SignatureJaccard => "signature-jaccard",
            Self::MinifiedFeatures => "minified-features",
            Self::Structural => "structural",
            Self::MultiFileAggregate => "multi-file-aggregate",
            Self::LengthFallback => "length-fallback",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported confidence band for a similarity value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Exact,
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `>= 0.95` exact, `>= 0.9` high, `>= 0.8` medium, `>= 0.7` low,
    /// anything below reports no confidence at all.
    pub fn from_similarity(similarity: f64) -> Option<Self> {
        if similarity >= 0.95 {
            Some(Self::Exact)
        } else if similarity >= 0.9 {
            Some(Self::High)
        } else if similarity >= 0.8 {
            Some(Self::Medium)
        } else if similarity >= 0.7 {
            Some(Self::Low)
        } else {
            None
        }
    }
}

/// A similarity score together with the strategy that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Score {
    pub strategy: Strategy,
    pub similarity: f64,
}

impl Score {
    fn new(strategy: Strategy, similarity: f64) -> Self {
        Self { strategy, similarity: similarity.clamp(0.0, 1.0) }
    }

    pub fn confidence(&self) -> Option<Confidence> {
        Confidence::from_similarity(self.similarity)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

fn length_ratio(a: usize, b: usize) -> f64 {
    match (a, b) {
        (0, 0) => 1.0,
        (0, _) | (_, 0) => 0.0,
        (a, b) => a.min(b) as f64 / a.max(b) as f64,
    }
}

/// Compares two fingerprints using the hash, signature and length rules.
pub fn compare_fingerprints(extracted: &ContentFingerprint, candidate: &ContentFingerprint) -> Score {
    if !extracted.normalized_hash.is_empty()
        && extracted.normalized_hash == candidate.normalized_hash
    {
        return Score::new(Strategy::NormalizedHash, 1.0);
    }
    if !extracted.content_hash.is_empty() && extracted.content_hash == candidate.content_hash {
        return Score::new(Strategy::ExactHash, 0.99);
    }

    let extracted_tokens: BTreeSet<String> =
        extracted.signature.split('|').filter(|t| !t.is_empty()).map(str::to_owned).collect();
    let candidate_tokens: BTreeSet<String> =
        candidate.signature.split('|').filter(|t| !t.is_empty()).map(str::to_owned).collect();
    if !extracted_tokens.is_empty() && !candidate_tokens.is_empty() {
        let j = jaccard(&extracted_tokens, &candidate_tokens);
        if j >= 0.8 {
            // linear scale from [0.8, 1.0] into [0.85, 0.95]
            return Score::new(Strategy::SignatureJaccard, 0.85 + (j - 0.8) / 0.2 * 0.10);
        }
        if j >= 0.5 {
            return Score::new(Strategy::SignatureJaccard, 0.70 + (j - 0.5) / 0.3 * 0.15);
        }
    }

    let ratio = length_ratio(extracted.content_length, candidate.content_length);
    let factor = if ratio < 0.1 { 0.3 } else { 0.5 };
    Score::new(Strategy::LengthFallback, ratio * factor)
}

/// Features that survive minification: long string literals, call shapes
/// and distinctive numeric constants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub strings: BTreeSet<String>,
    pub calls: BTreeSet<String>,
    pub numbers: BTreeSet<String>,
    pub length: usize,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.calls.is_empty() && self.numbers.is_empty()
    }

    /// Folds another file's features into this set; used for the
    /// multi-file aggregate comparison.
    pub fn merge(&mut self, other: FeatureSet) {
        self.strings.extend(other.strings);
        self.calls.extend(other.calls);
        self.numbers.extend(other.numbers);
        self.length += other.length;
    }
}

/// Extracts minification-robust features from a code body.
pub fn extract_features(content: &str) -> FeatureSet {
    let mut features = FeatureSet { length: content.len(), ..Default::default() };
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '"' | '\'' | '`' => {
                let quote = bytes[i];
                let start = i + 1;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                    } else if bytes[i] == quote {
                        break;
                    } else {
                        i += 1;
                    }
                }
                let end = i.min(bytes.len());
                if end > start && end - start >= 6 {
                    if let Some(literal) = content.get(start..end) {
                        features.strings.insert(literal.to_string());
                    }
                }
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut has_dot = false;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_digit() {
                        i += 1;
                    } else if c == '.' && !has_dot {
                        has_dot = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let token = &content[start..i];
                let digits = token.chars().filter(char::is_ascii_digit).count();
                if digits >= 3 || has_dot {
                    features.numbers.insert(token.to_string());
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let name = &content[start..i];
                let mut j = i;
                while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                    j += 1;
                }
                if bytes.get(j) == Some(&b'(') && name.len() > 1 {
                    let arity = paren_arity(bytes, j);
                    features.calls.insert(format!("{name}:{arity}"));
                }
            }
            _ => i += c.len_utf8(),
        }
    }

    features
}

fn paren_arity(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut commas = 0usize;
    let mut any = false;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            b',' if depth == 1 => commas += 1,
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                    } else if bytes[i] == quote {
                        break;
                    } else {
                        i += 1;
                    }
                }
            }
            c if depth >= 1 && !(c as char).is_whitespace() => any = true,
            _ => {}
        }
        i += 1;
    }
    if !any && commas == 0 {
        0
    } else {
        commas + 1
    }
}

/// Weighted feature similarity used for minified bodies.
///
/// Component weights: string literals 0.35, call patterns 0.35, numeric
/// constants 0.15, length ratio 0.15. Components that are empty on both
/// sides drop out and their weight is redistributed.
pub fn minified_similarity(a: &FeatureSet, b: &FeatureSet) -> f64 {
    let mut weight_sum = 0.15;
    let mut score_sum = 0.15 * length_ratio(a.length, b.length);

    let mut j_strings = f64::NAN;
    if !(a.strings.is_empty() && b.strings.is_empty()) {
        j_strings = jaccard(&a.strings, &b.strings);
        weight_sum += 0.35;
        score_sum += 0.35 * j_strings;
    }
    let mut j_calls = f64::NAN;
    if !(a.calls.is_empty() && b.calls.is_empty()) {
        j_calls = jaccard(&a.calls, &b.calls);
        weight_sum += 0.35;
        score_sum += 0.35 * j_calls;
    }
    if !(a.numbers.is_empty() && b.numbers.is_empty()) {
        weight_sum += 0.15;
        score_sum += 0.15 * jaccard(&a.numbers, &b.numbers);
    }

    let mut score = score_sum / weight_sum;
    if j_strings > 0.5 && j_calls > 0.5 {
        score += 0.10;
    }
    score.min(1.0)
}

/// Aggregate variant: the same feature comparison over the union of
/// features across all recovered files of a package.
pub fn aggregate_similarity<'a>(
    extracted_files: impl IntoIterator<Item = &'a str>,
    candidate: &FeatureSet,
) -> f64 {
    let mut merged = FeatureSet::default();
    for content in extracted_files {
        merged.merge(extract_features(content));
    }
    if merged.is_empty() && candidate.is_empty() {
        return 0.0;
    }
    minified_similarity(&merged, candidate)
}

/// Compares the shape of a recovered file tree against a published file
/// list, by normalized basename.
///
/// Public files weigh 0.6, underscore-prefixed internals 0.4; when at
/// least 70% of the extracted files appear in the candidate listing the
/// score gets a fixed boost. Structural evidence alone can never claim an
/// exact match, so the result is capped below the short-circuit threshold.
pub fn structural_similarity(extracted_files: &[String], candidate_files: &[String]) -> f64 {
    fn split(files: &[String]) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut public = BTreeSet::new();
        let mut internal = BTreeSet::new();
        for file in files {
            let base = normalized_basename(file);
            if base.is_empty() {
                continue;
            }
            if base.starts_with('_') {
                internal.insert(base);
            } else {
                public.insert(base);
            }
        }
        (public, internal)
    }

    let (e_public, e_internal) = split(extracted_files);
    let (c_public, c_internal) = split(candidate_files);
    if e_public.is_empty() && e_internal.is_empty() {
        return 0.0;
    }

    let mut weight_sum = 0.0;
    let mut score_sum = 0.0;
    if !(e_public.is_empty() && c_public.is_empty()) {
        weight_sum += 0.6;
        score_sum += 0.6 * jaccard(&e_public, &c_public);
    }
    if !(e_internal.is_empty() && c_internal.is_empty()) {
        weight_sum += 0.4;
        score_sum += 0.4 * jaccard(&e_internal, &c_internal);
    }
    if weight_sum == 0.0 {
        return 0.0;
    }
    let mut score = score_sum / weight_sum;

    let all_extracted: BTreeSet<_> = e_public.union(&e_internal).cloned().collect();
    let all_candidate: BTreeSet<_> = c_public.union(&c_internal).cloned().collect();
    let present = all_extracted.intersection(&all_candidate).count();
    if present as f64 / all_extracted.len() as f64 >= 0.7 {
        score += 0.1;
    }

    score.min(0.98)
}

fn normalized_basename(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.split('.').next().unwrap_or(name);
    stem.to_ascii_lowercase()
}

/// Full comparison of one extracted file against one candidate file.
///
/// When either side looks minified, or the hash/signature rules stayed at
/// or below 0.9, the feature comparison runs as well and the better score
/// wins.
pub fn compare_contents(
    extracted: &ContentFingerprint,
    extracted_content: Option<&str>,
    candidate: &ContentFingerprint,
    candidate_content: Option<&str>,
) -> Score {
    let base = compare_fingerprints(extracted, candidate);
    if base.similarity > 0.9
        && extracted.is_minified != Some(true)
        && candidate.is_minified != Some(true)
    {
        return base;
    }

    let (Some(extracted_content), Some(candidate_content)) = (extracted_content, candidate_content)
    else {
        return base;
    };

    let features_a = extract_features(extracted_content);
    let features_b = extract_features(candidate_content);
    if features_a.is_empty() && features_b.is_empty() {
        return base;
    }
    let minified = minified_similarity(&features_a, &features_b);
    if minified > base.similarity {
        Score::new(Strategy::MinifiedFeatures, minified)
    } else {
        base
    }
}
