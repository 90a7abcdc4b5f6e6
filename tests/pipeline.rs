//! End-to-end tests over the offline parts of the pipeline: source-map
//! parsing and extraction, partitioning, reconstruction and artifact
//! writing.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use weblift::{
    reconstruct::CLASS_NAME_MAP_FILE, ExtractOptions, FingerprintStore, MemoryStore, Project,
    ReconstructionInput, SourceMapV3,
};

fn sample_map() -> SourceMapV3 {
    let json = serde_json::json!({
        "version": 3,
        "file": "index-ab12cd.js",
        "sources": [
            "webpack://site/./src/main.tsx",
            "webpack://site/./src/app/view.tsx",
            "webpack://site/./node_modules/tiny-lib/index.js",
        ],
        "sourcesContent": [
            "import { App } from './app';\nexport const boot = () => App;\nconsole.log(process.env.API_URL);\n",
            "export const App = () => null;\n",
            "module.exports = function tiny(a, b) { return a + b; };\n",
        ],
        "names": ["App"],
        "mappings": "AAAA,SAASA",
    });
    SourceMapV3::parse(&json.to_string()).unwrap()
}

fn offline_project(root: &std::path::Path) -> Project {
    Project::builder()
        .root(root)
        .store(Arc::new(MemoryStore::new()))
        .offline()
        .build()
        .unwrap()
}

#[test]
fn extraction_counts_cover_every_source() {
    let map = sample_map();
    assert!(map.validate().valid);

    let outcome = weblift::sourcemap::extract::extract_sources(
        &map,
        "https://example.com/assets/index-ab12cd.js",
        &ExtractOptions { exclude: Vec::new(), internal_packages: Default::default() },
    );
    let meta = &outcome.metadata;
    assert_eq!(meta.total_sources, 3);
    assert_eq!(meta.extracted_count + meta.skipped_count + meta.null_content_count, 3);
    assert_eq!(outcome.sources.len(), 3);
}

#[tokio::test]
async fn recovered_sources_reconstruct_into_a_buildable_tree() {
    let dir = tempfile::tempdir().unwrap();
    let project = offline_project(dir.path());

    let map = sample_map();
    let extraction = weblift::sourcemap::extract::extract_sources(
        &map,
        "https://example.com/assets/index-ab12cd.js",
        &ExtractOptions { exclude: Vec::new(), internal_packages: Default::default() },
    );

    let (tree, packages) = project.partition_sources(&extraction.sources);
    assert_eq!(tree.len(), 2);
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].name, "tiny-lib");

    let input = ReconstructionInput {
        sources: tree,
        css_files: vec![(
            "_server/static/assets/site.css".to_string(),
            "._card_ab12c_7{color:red}._card_ab12c_7:hover{color:blue}".to_string(),
        )],
        package_json: Some(r#"{"name":"site","dependencies":{"react":"^18.2.0"}}"#.to_string()),
        index_html: Some(
            "<html><body><script src=\"/assets/index-ab12cd.js\"></script></body></html>"
                .to_string(),
        ),
        entries: vec!["src/main.tsx".to_string()],
        generated_at: "2024-01-01T00:00:00Z".to_string(),
        ..Default::default()
    };

    let outcome = project.reconstruct(&input).unwrap();
    let written = project.write_artifacts(&outcome).unwrap();

    assert!(dir.path().join("src/app/index.ts").is_file());
    let index = std::fs::read_to_string(dir.path().join("src/app/index.ts")).unwrap();
    assert!(index.contains("export { App } from './view';"));

    let config = std::fs::read_to_string(dir.path().join("vite.config.ts")).unwrap();
    assert!(config.contains("@vitejs/plugin-react"));
    assert!(config.contains("'process.env.API_URL'"));

    let class_map = std::fs::read_to_string(dir.path().join(CLASS_NAME_MAP_FILE)).unwrap();
    assert!(class_map.contains("\"card\""));

    assert!(written.contains(&"index.html".to_string()));
    let html = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
    assert!(!html.contains("index-ab12cd.js"));
    assert!(html.contains("/src/main.tsx"));
}

#[tokio::test]
async fn reconstruction_outputs_are_byte_stable_across_runs() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let input = ReconstructionInput {
        sources: vec![
            ("src/main.ts".to_string(), "import { x } from './lib';\n".to_string()),
            ("src/lib/value.ts".to_string(), "export const x = 1;\n".to_string()),
        ],
        entries: vec!["src/main.ts".to_string()],
        generated_at: "2024-01-01T00:00:00Z".to_string(),
        ..Default::default()
    };

    for dir in [&dir_a, &dir_b] {
        let project = offline_project(dir.path());
        let outcome = project.reconstruct(&input).unwrap();
        project.write_artifacts(&outcome).unwrap();
    }

    for file in ["src/lib/index.ts", "vite.config.ts"] {
        let a = std::fs::read_to_string(dir_a.path().join(file)).unwrap();
        let b = std::fs::read_to_string(dir_b.path().join(file)).unwrap();
        assert_eq!(a, b, "{file} differs between runs");
    }
}

#[tokio::test]
async fn cached_negative_match_suppresses_all_network_calls() {
    let store = Arc::new(MemoryStore::new());
    let project = Project::builder()
        .root("./out")
        .store(store.clone())
        .offline()
        .build()
        .unwrap();

    let mut package = weblift::ExtractedPackage::new("ghost-pkg");
    package.files.push(("index.js".to_string(), "export const g = 1;".to_string()));

    // seed the negative result the way a previous online run would have
    let fingerprint = weblift::fingerprint::build_fingerprint(
        "ghost-pkg",
        "extracted",
        "index.js",
        "export const g = 1;",
    );
    store
        .set_match_result(&weblift::fingerprint::MatchResult {
            package: "ghost-pkg".to_string(),
            extracted_normalized_hash: fingerprint.normalized_hash.clone(),
            matched_version: None,
            similarity: 0.0,
            confidence: None,
            fetched_at: 1,
        })
        .await
        .unwrap();

    // offline + cached: the orchestrator must answer from the cache alone
    let result = project.fingerprinter().fingerprint_package(&package).await.unwrap();
    assert!(result.from_cache);
    assert!(result.matched_version.is_none());
}
