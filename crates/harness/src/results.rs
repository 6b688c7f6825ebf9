//! JSON results file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use pagerun_common::{AggregateResult, Result, VERSION};

/// Document written to the results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsFile {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub result: AggregateResult,
}

impl ResultsFile {
    pub fn new(result: AggregateResult) -> Self {
        Self {
            tool: "pagerun".to_string(),
            version: VERSION.to_string(),
            generated_at: Utc::now(),
            result,
        }
    }
}

/// Write `result` as pretty JSON, creating parent directories
pub async fn write_results(path: &Path, result: &AggregateResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&ResultsFile::new(result.clone()))?;
    tokio::fs::write(path, json).await?;

    info!("Results written to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagerun_common::{exit, Mode, SuiteOutcome};
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("pagerun.json");
        let result = AggregateResult::from_outcomes(
            vec![SuiteOutcome::completed(
                Mode::Page,
                2,
                1,
                "1 failing\n".into(),
                Duration::from_millis(40),
            )],
            vec![Mode::Worker],
            Duration::from_millis(50),
        );

        write_results(&path, &result).await.unwrap();

        let written: ResultsFile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.tool, "pagerun");
        assert_eq!(written.result, result);
        assert_eq!(written.result.exit_code, exit::TEST_FAILURE);
        assert_eq!(written.result.skipped, vec![Mode::Worker]);
    }
}
