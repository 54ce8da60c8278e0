use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bidfront_core::LeadCandidate;
use tokio::fs;

use crate::pipeline::CycleReport;

/// Writes `<root>/<run_id>/cycle.json` and the merged candidate batch as
/// `<root>/<run_id>/candidates.json`.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write(&self, report: &CycleReport, candidates: &[LeadCandidate]) -> Result<PathBuf> {
        let dir = self.root.join(report.run_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let cycle_json = serde_json::to_vec_pretty(report).context("serializing cycle report")?;
        fs::write(dir.join("cycle.json"), cycle_json)
            .await
            .context("writing cycle.json")?;

        let candidates_json = serde_json::to_vec_pretty(candidates).context("serializing candidates")?;
        fs::write(dir.join("candidates.json"), candidates_json)
            .await
            .context("writing candidates.json")?;

        Ok(dir)
    }
}
