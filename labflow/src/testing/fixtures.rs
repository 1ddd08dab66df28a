//! Fixtures for artifact and run tests.

use crate::errors::LabflowError;
use crate::remote::{RunStatus, WorkflowRun};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Builds zip archives in memory.
#[derive(Debug, Default, Clone)]
pub struct ZipFixture {
    entries: Vec<(String, Vec<u8>)>,
}

impl ZipFixture {
    /// Creates an empty archive builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file entry. Directories are implied by the path.
    #[must_use]
    pub fn file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.entries.push((path.into(), content.into()));
        self
    }

    /// Serializes the archive.
    pub fn build(&self) -> Result<Vec<u8>, LabflowError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (path, content) in &self.entries {
            writer.start_file(path.as_str(), options)?;
            writer.write_all(content)?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// Creates a workflow run on `branch` created `minutes` after a fixed epoch.
#[must_use]
pub fn run_at(id: u64, branch: &str, minutes: i64, status: RunStatus, conclusion: Option<&str>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("experiment".to_string()),
        head_branch: Some(branch.to_string()),
        status,
        conclusion: conclusion.map(str::to_string),
        created_at: epoch() + chrono::Duration::minutes(minutes),
        html_url: None,
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_560_000, 0).single().unwrap_or_default()
}
