//! Subscribe to events in the reconstruction pipeline
//!
//! The `Reporter` trait plays the role of a registry for progress callbacks:
//! a reporter is installed globally or for the duration of a scope, and the
//! pipeline notifies it from worker completion sites. Callbacks fire
//! synchronously and must not block.

use once_cell::sync::OnceCell;
use std::{
    cell::RefCell,
    fmt,
    sync::Arc,
    time::Duration,
};

thread_local! {
    static CURRENT_STATE: RefCell<Option<Report>> = RefCell::new(None);
}

static GLOBAL_REPORTER: OnceCell<Report> = OnceCell::new();

/// Install this `Reporter` as the global default for the duration of the
/// entire program.
///
/// Can only be set once; subsequent attempts are ignored.
pub fn set_global_reporter(report: Report) {
    let _ = GLOBAL_REPORTER.set(report);
}

/// Executes the closure with the given reporter installed for the current
/// thread, restoring the previous reporter afterwards.
pub fn with_scoped<T>(report: &Report, f: impl FnOnce() -> T) -> T {
    let previous = CURRENT_STATE.with(|state| state.borrow_mut().replace(report.clone()));
    let result = f();
    CURRENT_STATE.with(|state| *state.borrow_mut() = previous);
    result
}

fn with_reporter<T>(f: impl FnOnce(&Report) -> T) -> Option<T> {
    let mut f = Some(f);
    CURRENT_STATE
        .with(|state| state.borrow().as_ref().map(|r| (f.take().unwrap())(r)))
        .or_else(|| GLOBAL_REPORTER.get().map(|r| (f.take().unwrap())(r)))
}

/// A handle to a reporter.
#[derive(Clone)]
pub struct Report(Arc<dyn Reporter>);

impl Report {
    pub fn new(reporter: impl Reporter + 'static) -> Self {
        Self(Arc::new(reporter))
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Report(..)")
    }
}

/// Trait representing the functions required to emit information about the
/// various steps in the pipeline.
///
/// All functions are no-op by default.
#[allow(unused_variables)]
pub trait Reporter: Send + Sync {
    /// Callback invoked right before a bundle is probed for a source map.
    fn on_discovery_start(&self, bundle_url: &str) {}

    /// Callback invoked when source map discovery for a bundle concluded.
    fn on_discovery_done(&self, bundle_url: &str, found: bool, location: Option<&str>) {}

    /// Callback invoked after sources were materialized from a source map.
    fn on_sources_extracted(&self, bundle_url: &str, extracted: usize, skipped: usize) {}

    /// Callback invoked right before registry metadata is fetched.
    fn on_metadata_fetch(&self, package: &str) {}

    /// Callback invoked for every completed per-version similarity check.
    fn on_version_checked(&self, package: &str, version: &str, similarity: f64) {}

    /// Callback invoked once the best match for a package is decided.
    fn on_package_matched(
        &self,
        package: &str,
        version: Option<&str>,
        similarity: f64,
        elapsed: Duration,
    ) {
    }

    /// Callback invoked when a reconstruction artifact is written.
    fn on_artifact_written(&self, path: &str) {}
}

pub(crate) fn discovery_start(bundle_url: &str) {
    let _ = with_reporter(|r| r.0.on_discovery_start(bundle_url));
}

pub(crate) fn discovery_done(bundle_url: &str, found: bool, location: Option<&str>) {
    let _ = with_reporter(|r| r.0.on_discovery_done(bundle_url, found, location));
}

pub(crate) fn sources_extracted(bundle_url: &str, extracted: usize, skipped: usize) {
    let _ = with_reporter(|r| r.0.on_sources_extracted(bundle_url, extracted, skipped));
}

pub(crate) fn metadata_fetch(package: &str) {
    let _ = with_reporter(|r| r.0.on_metadata_fetch(package));
}

pub(crate) fn version_checked(package: &str, version: &str, similarity: f64) {
    let _ = with_reporter(|r| r.0.on_version_checked(package, version, similarity));
}

pub(crate) fn package_matched(
    package: &str,
    version: Option<&str>,
    similarity: f64,
    elapsed: Duration,
) {
    let _ = with_reporter(|r| r.0.on_package_matched(package, version, similarity, elapsed));
}

pub(crate) fn artifact_written(path: &str) {
    let _ = with_reporter(|r| r.0.on_artifact_written(path));
}

/// A reporter that logs matches and discoveries to stdout.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BasicStdoutReporter;

impl Reporter for BasicStdoutReporter {
    fn on_discovery_done(&self, bundle_url: &str, found: bool, location: Option<&str>) {
        if found {
            println!("source map for {bundle_url} ({})", location.unwrap_or("unknown"));
        }
    }

    fn on_package_matched(
        &self,
        package: &str,
        version: Option<&str>,
        similarity: f64,
        elapsed: Duration,
    ) {
        match version {
            Some(version) => println!(
                "matched {package}@{version} (similarity {similarity:.2}) in {}ms",
                elapsed.as_millis()
            ),
            None => println!("no version match for {package}"),
        }
    }
}
