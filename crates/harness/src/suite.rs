//! Test file resolution
//!
//! Each argument is a file, a directory (walked for scripts) or a glob.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use pagerun_common::{Error, Result};

/// Extensions picked up when walking a directory
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

/// Expand test file arguments into absolute script paths
///
/// Order follows the arguments; within one argument paths are sorted.
/// Duplicates are dropped. An argument that matches nothing is an error.
pub fn resolve_test_files(patterns: &[String], working_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let matches = expand(pattern, working_dir)?;
        if matches.is_empty() {
            return Err(Error::Config(format!(
                "No test files matched `{}`",
                pattern
            )));
        }
        debug!("{} -> {} file(s)", pattern, matches.len());

        for path in matches {
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn expand(pattern: &str, working_dir: &Path) -> Result<Vec<PathBuf>> {
    let candidate = working_dir.join(pattern);

    if candidate.is_file() {
        return Ok(vec![candidate]);
    }

    if candidate.is_dir() {
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(&candidate)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || e.file_name() != "node_modules")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_script(e.path()))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        return Ok(found);
    }

    let pattern_str = candidate.to_string_lossy();
    let entries = glob::glob(&pattern_str)
        .map_err(|e| Error::Config(format!("Invalid test file pattern `{}`: {}", pattern, e)))?;

    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    Ok(found)
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SCRIPT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
