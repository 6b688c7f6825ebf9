//! Bundle building
//!
//! The builder is an opaque, fallible step: it takes the bootstrap entry and
//! produces `bundle.js` next to it. The default implementation drives
//! webpack through `npx` and reads its JSON stats.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use pagerun_common::{Error, Result};

use crate::bootstrap::BUNDLE_FILE;

/// Manifest file written when stats are requested
pub const STATS_FILE: &str = "webpack-stats.json";

/// What a build needs to know
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Bundle entry module
    pub entry: PathBuf,
    /// Where the bundle lands
    pub output_dir: PathBuf,
    /// Project root; its `node_modules` resolves the runner packages
    pub project_dir: PathBuf,
}

/// A successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Path of the main bundle asset
    pub main_asset: PathBuf,
    /// Non-fatal builder diagnostics
    pub warnings: Vec<String>,
    /// Builder manifest, persisted with `stats`
    pub manifest: serde_json::Value,
}

/// Produces a browser-loadable bundle from the bootstrap entry
#[async_trait]
pub trait BundleBuilder: Send + Sync {
    async fn build(&self, plan: &BuildPlan) -> Result<BuildOutput>;
}

/// webpack driven as a subprocess
#[derive(Debug, Clone)]
pub struct WebpackBuilder {
    /// Launcher for the webpack CLI
    pub npx: PathBuf,
}

impl Default for WebpackBuilder {
    fn default() -> Self {
        Self {
            npx: PathBuf::from("npx"),
        }
    }
}

impl WebpackBuilder {
    /// webpack configuration for a plan
    pub fn render_config(plan: &BuildPlan) -> Result<String> {
        let config = json!({
            "mode": "development",
            "target": "web",
            "devtool": "inline-source-map",
            "entry": plan.entry.to_string_lossy(),
            "output": {
                "path": plan.output_dir.to_string_lossy(),
                "filename": BUNDLE_FILE,
                "globalObject": "self",
            },
            "resolve": {
                "modules": [
                    plan.project_dir.join("node_modules").to_string_lossy(),
                    "node_modules",
                ],
            },
            "performance": { "hints": false },
        });

        Ok(format!(
            "// Generated by pagerun\nmodule.exports = {};\n",
            serde_json::to_string_pretty(&config)?
        ))
    }
}

#[async_trait]
impl BundleBuilder for WebpackBuilder {
    async fn build(&self, plan: &BuildPlan) -> Result<BuildOutput> {
        let config_path = plan.output_dir.join("webpack.config.js");
        tokio::fs::write(&config_path, Self::render_config(plan)?).await?;

        debug!("Running webpack with {}", config_path.display());

        let output = Command::new(&self.npx)
            .args(["--no-install", "webpack", "--config"])
            .arg(&config_path)
            .arg("--json")
            .current_dir(&plan.project_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Build {
                errors: vec![format!("failed to run {}: {}", self.npx.display(), e)],
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stats = match BuildStats::parse(&stdout) {
            Ok(stats) => stats,
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::Build {
                    errors: vec![
                        format!("could not read webpack stats ({}): {}", output.status, e),
                        stderr.trim().to_string(),
                    ],
                });
            }
        };

        stats.into_output(&plan.output_dir)
    }
}

/// Subset of webpack's JSON stats
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    #[serde(default)]
    pub errors: Vec<StatsMessage>,
    #[serde(default)]
    pub warnings: Vec<StatsMessage>,
    #[serde(default)]
    pub assets_by_chunk_name: HashMap<String, ChunkAssets>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// webpack 4 reports plain strings, webpack 5 objects
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatsMessage {
    Text(String),
    Detailed {
        message: String,
        #[serde(default, rename = "moduleName")]
        module_name: Option<String>,
    },
}

impl StatsMessage {
    pub fn render(&self) -> String {
        match self {
            StatsMessage::Text(text) => text.clone(),
            StatsMessage::Detailed {
                message,
                module_name: Some(module),
            } => format!("{}: {}", module, message),
            StatsMessage::Detailed { message, .. } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChunkAssets {
    One(String),
    Many(Vec<String>),
}

impl ChunkAssets {
    pub fn first(&self) -> Option<&str> {
        match self {
            ChunkAssets::One(name) => Some(name),
            ChunkAssets::Many(names) => names.first().map(String::as_str),
        }
    }
}

impl BuildStats {
    /// Parse stats printed by `webpack --json`
    ///
    /// Some webpack versions print progress text before the JSON document,
    /// so parsing starts at the first `{`.
    pub fn parse(stdout: &str) -> std::result::Result<Self, serde_json::Error> {
        let start = stdout.find('{').unwrap_or(0);
        let raw: serde_json::Value = serde_json::from_str(&stdout[start..])?;
        let mut stats: BuildStats = serde_json::from_value(raw.clone())?;
        stats.raw = raw;
        Ok(stats)
    }

    /// Errors fail the build; warnings ride along in the output
    pub fn into_output(self, output_dir: &Path) -> Result<BuildOutput> {
        if !self.errors.is_empty() {
            return Err(Error::Build {
                errors: self.errors.iter().map(StatsMessage::render).collect(),
            });
        }

        let main = self
            .assets_by_chunk_name
            .get("main")
            .and_then(ChunkAssets::first)
            .unwrap_or(BUNDLE_FILE);

        Ok(BuildOutput {
            main_asset: output_dir.join(main),
            warnings: self.warnings.iter().map(StatsMessage::render).collect(),
            manifest: self.raw,
        })
    }
}

/// Persist the builder manifest next to the bundle
pub async fn write_manifest(output_dir: &Path, build: &BuildOutput) -> Result<PathBuf> {
    let path = output_dir.join(STATS_FILE);
    tokio::fs::write(&path, serde_json::to_string(&build.manifest)?).await?;
    info!("Wrote: {} ...", path.display());
    Ok(path)
}
