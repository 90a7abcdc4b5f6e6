//! Orders the versions of a package for similarity search.
//!
//! Buckets, in priority order: dist-tag targets, an outward walk from the
//! caller's version hint, then everything else newest-first. The plan
//! position doubles as the tie-breaker when two versions score equally.

use crate::fingerprint::cache::PackageMetadata;
use semver::Version;

/// Weighted distance between two versions; a major step outweighs any
/// number of minor steps, a minor step any number of patches.
fn version_distance(a: &Version, b: &Version) -> u64 {
    let major = a.major.abs_diff(b.major);
    let minor = a.minor.abs_diff(b.minor);
    let patch = a.patch.abs_diff(b.patch);
    major * 1_000_000 + minor.min(999) * 1_000 + patch.min(999)
}

fn is_prerelease(version: &str) -> bool {
    version.contains('-')
}

/// Produces the ordered list of versions to check.
///
/// Pre-release versions are excluded unless `include_prerelease` is set, in
/// which case stable versions precede pre-releases within each bucket.
pub fn plan_versions(
    meta: &PackageMetadata,
    hint: Option<&str>,
    include_prerelease: bool,
) -> Vec<String> {
    let mut plan: Vec<String> = Vec::with_capacity(meta.versions.len());
    let mut push = |plan: &mut Vec<String>, version: &str| {
        if !meta.versions.iter().any(|v| v == version) {
            return;
        }
        if !include_prerelease && is_prerelease(version) {
            return;
        }
        if !plan.iter().any(|v| v == version) {
            plan.push(version.to_string());
        }
    };

    // 1. dist-tag targets, deduplicated in declaration order
    let mut tag_bucket: Vec<&str> = Vec::new();
    for (_, version) in &meta.dist_tags {
        if !tag_bucket.contains(&version.as_str()) {
            tag_bucket.push(version);
        }
    }
    for version in stable_first(tag_bucket, include_prerelease) {
        push(&mut plan, version);
    }

    // 2. outward walk from the hint
    if let Some(hint) = hint.and_then(|h| Version::parse(h.trim_start_matches(['^', '~', '='])).ok())
    {
        let mut near: Vec<(&str, u64)> = meta
            .versions
            .iter()
            .filter_map(|v| Version::parse(v).ok().map(|parsed| (v.as_str(), parsed)))
            .map(|(raw, parsed)| {
                let distance = version_distance(&hint, &parsed);
                (raw, distance)
            })
            .collect();
        near.sort_by(|(a_raw, a_dist), (b_raw, b_dist)| {
            a_dist.cmp(b_dist).then_with(|| b_raw.cmp(a_raw))
        });
        for version in stable_first(near.into_iter().map(|(v, _)| v).collect(), include_prerelease)
        {
            push(&mut plan, version);
        }
    }

    // 3. remaining versions, newest published first
    let mut rest: Vec<&str> = meta.versions.iter().map(String::as_str).collect();
    rest.sort_by(|a, b| {
        let ta = meta.version_times.get(*a);
        let tb = meta.version_times.get(*b);
        match (ta, tb) {
            (Some(ta), Some(tb)) => tb.cmp(ta),
            // untimed versions sort after timed ones, newest semver first
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => compare_semver_desc(a, b),
        }
    });
    for version in stable_first(rest, include_prerelease) {
        push(&mut plan, version);
    }

    plan
}

fn compare_semver_desc(a: &str, b: &str) -> std::cmp::Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => b.cmp(a),
    }
}

/// Stable-sorts pre-releases to the back of a bucket when they are allowed
/// at all.
fn stable_first(bucket: Vec<&str>, include_prerelease: bool) -> Vec<&str> {
    if !include_prerelease {
        return bucket;
    }
    let (stable, pre): (Vec<&str>, Vec<&str>) =
        bucket.into_iter().partition(|v| !is_prerelease(v));
    stable.into_iter().chain(pre).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::cache::PackageMetadata;

    fn meta(versions: &[&str], tags: &[(&str, &str)], times: &[(&str, u64)]) -> PackageMetadata {
        PackageMetadata {
            name: "demo".to_string(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            dist_tags: tags.iter().map(|(t, v)| (t.to_string(), v.to_string())).collect(),
            version_times: times.iter().map(|(v, t)| (v.to_string(), *t)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn dist_tags_come_first_in_declaration_order() {
        let meta = meta(
            &["1.0.0", "2.0.0", "3.0.0"],
            &[("latest", "3.0.0"), ("lts", "1.0.0"), ("stable", "3.0.0")],
            &[("1.0.0", 1), ("2.0.0", 2), ("3.0.0", 3)],
        );
        let plan = plan_versions(&meta, None, false);
        assert_eq!(plan, vec!["3.0.0", "1.0.0", "2.0.0"]);
    }

    #[test]
    fn hint_walks_outward_by_weighted_distance() {
        let meta = meta(
            &["1.0.0", "2.0.0", "2.1.0", "2.1.5", "3.0.0"],
            &[],
            &[],
        );
        let plan = plan_versions(&meta, Some("2.1.0"), false);
        assert_eq!(plan[0], "2.1.0");
        assert_eq!(plan[1], "2.1.5");
        assert_eq!(plan[2], "2.0.0");
        // 1.0.0 and 3.0.0 are both one major away; the rest follow
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn hint_tolerates_range_operators() {
        let meta = meta(&["1.0.0", "1.2.0"], &[], &[]);
        let plan = plan_versions(&meta, Some("^1.2.0"), false);
        assert_eq!(plan[0], "1.2.0");
    }

    #[test]
    fn remaining_versions_by_publish_time() {
        let meta = meta(
            &["1.0.0", "1.1.0", "1.2.0"],
            &[],
            &[("1.0.0", 10), ("1.1.0", 30), ("1.2.0", 20)],
        );
        let plan = plan_versions(&meta, None, false);
        assert_eq!(plan, vec!["1.1.0", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn prereleases_are_excluded_by_default() {
        let meta = meta(
            &["1.0.0", "2.0.0-rc.1"],
            &[("next", "2.0.0-rc.1")],
            &[("1.0.0", 1), ("2.0.0-rc.1", 2)],
        );
        assert_eq!(plan_versions(&meta, None, false), vec!["1.0.0"]);
    }

    #[test]
    fn opted_in_prereleases_sort_after_stable() {
        let meta = meta(
            &["1.0.0", "2.0.0-rc.1"],
            &[],
            &[("1.0.0", 1), ("2.0.0-rc.1", 2)],
        );
        assert_eq!(plan_versions(&meta, None, true), vec!["1.0.0", "2.0.0-rc.1"]);
    }

    #[test]
    fn tag_to_unknown_version_is_ignored() {
        let meta = meta(&["1.0.0"], &[("latest", "9.9.9")], &[]);
        assert_eq!(plan_versions(&meta, None, false), vec!["1.0.0"]);
    }
}
