//! Output directory setup and bootstrap resources
//!
//! The output directory holds everything the asset server hands to the
//! browser: the host page, the in-context bridge, the selected runner
//! adapter, a generated registry of test files and the bundle entry.

use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use pagerun_common::{Result, RunnerKind};

const INDEX_HTML: &str = include_str!("../resources/index.html");
const PAGE_RUN_JS: &str = include_str!("../resources/page-run.js");
const BRIDGE_JS: &str = include_str!("../resources/bridge.js");
const BUNDLE_RUN_TEMPLATE: &str = include_str!("../resources/bundle-run.js");
const MOCHA_ADAPTER_JS: &str = include_str!("../resources/adapters/mocha.js");
const TAPE_ADAPTER_JS: &str = include_str!("../resources/adapters/tape.js");
const BARE_SYNC_ADAPTER_JS: &str = include_str!("../resources/adapters/bare-sync.js");

/// Node-side browser driver, written next to the bundle at launch
pub(crate) const DRIVER_JS: &str = include_str!("../resources/driver.js");

/// Bundle entry module, relative to the output directory
pub const ENTRY_FILE: &str = "bundle-run.js";
/// File name the builder emits and the host page loads
pub const BUNDLE_FILE: &str = "bundle.js";
pub const REGISTRY_FILE: &str = "test-registry.js";

const OPTIONS_PLACEHOLDER: &str = "__PAGERUN_OPTIONS__";

/// A materialized output directory
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub output_dir: PathBuf,
    /// Absolute path of the bundle entry module
    pub entry: PathBuf,
}

/// Create `output_dir` and write every bootstrap resource into it
pub async fn prepare_output_dir(
    output_dir: &Path,
    runner: RunnerKind,
    reporter: Option<&str>,
    test_files: &[PathBuf],
) -> Result<Bootstrap> {
    info!("Setting up output directory: {} ...", output_dir.display());

    tokio::fs::create_dir_all(output_dir).await?;

    let files: [(&str, String); 6] = [
        ("index.html", INDEX_HTML.to_string()),
        ("page-run.js", PAGE_RUN_JS.to_string()),
        ("bridge.js", BRIDGE_JS.to_string()),
        ("adapter.js", adapter_source(runner).to_string()),
        (REGISTRY_FILE, render_registry(test_files)?),
        (ENTRY_FILE, render_entry(runner, reporter)?),
    ];

    for (name, content) in files.iter() {
        tokio::fs::write(output_dir.join(name), content).await?;
        debug!("Wrote {}", name);
    }

    Ok(Bootstrap {
        output_dir: output_dir.to_path_buf(),
        entry: output_dir.join(ENTRY_FILE),
    })
}

/// Adapter translating the runner's native signals into result events
pub fn adapter_source(runner: RunnerKind) -> &'static str {
    match runner {
        RunnerKind::Mocha => MOCHA_ADAPTER_JS,
        RunnerKind::Tape => TAPE_ADAPTER_JS,
        RunnerKind::BareSync => BARE_SYNC_ADAPTER_JS,
    }
}

/// Module exporting one loader per test file, in run order
pub fn render_registry(test_files: &[PathBuf]) -> Result<String> {
    let mut out = String::from("// Generated by pagerun. One loader per test file.\n");
    out.push_str("module.exports = [\n");
    for file in test_files {
        let literal = serde_json::to_string(&file.to_string_lossy())?;
        out.push_str(&format!("  function () {{ return require({}) }},\n", literal));
    }
    out.push_str("]\n");
    Ok(out)
}

/// Bundle entry with the adapter options baked in
pub fn render_entry(runner: RunnerKind, reporter: Option<&str>) -> Result<String> {
    let options = json!({
        "runner": runner.as_str(),
        "reporter": reporter,
    });
    Ok(BUNDLE_RUN_TEMPLATE.replace(OPTIONS_PLACEHOLDER, &serde_json::to_string(&options)?))
}

/// Delete the output directory; a directory that is already gone is fine
pub async fn remove_output_dir(output_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(output_dir).await {
        Ok(()) => {
            info!("Removed output directory: {}", output_dir.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_output_dir_writes_resources() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build").join("nested");
        let tests = vec![PathBuf::from("/src/test/a.js")];

        let bootstrap = prepare_output_dir(&out, RunnerKind::Tape, None, &tests)
            .await
            .unwrap();

        assert_eq!(bootstrap.entry, out.join(ENTRY_FILE));
        for name in ["index.html", "page-run.js", "bridge.js", "adapter.js", REGISTRY_FILE, ENTRY_FILE] {
            assert!(out.join(name).is_file(), "{name} missing");
        }
        let adapter = std::fs::read_to_string(out.join("adapter.js")).unwrap();
        assert!(adapter.contains("require('tape')"));
    }

    #[test]
    fn test_registry_lists_every_file_in_order() {
        let registry = render_registry(&[
            PathBuf::from("/src/test/b.js"),
            PathBuf::from("/src/test/a \"quoted\".js"),
        ])
        .unwrap();

        let b = registry.find(r#"require("/src/test/b.js")"#).unwrap();
        let a = registry.find(r#"require("/src/test/a \"quoted\".js")"#).unwrap();
        assert!(b < a);
    }

    #[test]
    fn test_entry_bakes_in_options() {
        let entry = render_entry(RunnerKind::Mocha, Some("dot")).unwrap();
        assert!(!entry.contains(OPTIONS_PLACEHOLDER));
        assert!(entry.contains(r#"{"reporter":"dot","runner":"mocha"}"#));

        let entry = render_entry(RunnerKind::BareSync, None).unwrap();
        assert!(entry.contains(r#""reporter":null"#));
    }

    #[test]
    fn test_each_runner_has_an_adapter() {
        assert!(adapter_source(RunnerKind::Mocha).contains("mocha.run()"));
        assert!(adapter_source(RunnerKind::BareSync).contains("bridge.complete"));
    }

    #[tokio::test]
    async fn test_remove_output_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(out.join("deep")).unwrap();

        remove_output_dir(&out).await.unwrap();
        assert!(!out.exists());
        remove_output_dir(&out).await.unwrap();
    }
}
