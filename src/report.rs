//! Report directories for finished runs.
//!
//! A report holds the verdict and the rendered trace of one run:
//! - `verdict.json`, the same document printed on stdout
//! - `trace.log`, one line per trace entry
//! - `.report.json`, metadata about the run
//!
//! Directories created under the report base are removed on drop unless
//! kept; directories named explicitly with `--output` are kept by default.

use std::fs;
use std::path::PathBuf;

use crate::runner::Verdict;
use crate::trace::Trace;

const VERDICT_FILE: &str = "verdict.json";
const TRACE_FILE: &str = "trace.log";
const METADATA_FILE: &str = ".report.json";

#[derive(Debug, Clone)]
pub struct ReportDir {
    pub id: String,
    pub dir: PathBuf,
    /// Whether to keep files after the report is dropped
    pub keep: bool,
    operation: Option<String>,
}

impl ReportDir {
    /// Report under the configured base directory, named after the operation
    pub fn with_name(operation: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(operation), timestamp_suffix());
        let dir = PathBuf::from(crate::config::report_base_dir()).join(&id);

        Self {
            id,
            dir,
            keep: false,
            operation: Some(operation.to_string()),
        }
    }

    /// Report in a caller-chosen directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(timestamp_suffix);

        Self {
            id,
            dir,
            keep: true,
            operation: None,
        }
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    /// Create the directory and write its metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "operation": self.operation,
        });
        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        Ok(())
    }

    pub fn verdict_path(&self) -> PathBuf {
        self.dir.join(VERDICT_FILE)
    }

    pub fn trace_path(&self) -> PathBuf {
        self.dir.join(TRACE_FILE)
    }

    pub fn write_verdict(&self, verdict: &Verdict) -> std::io::Result<PathBuf> {
        let path = self.verdict_path();
        fs::write(&path, serde_json::to_string_pretty(verdict)?)?;
        Ok(path)
    }

    pub fn write_trace(&self, trace: &Trace) -> std::io::Result<PathBuf> {
        let path = self.trace_path();
        let mut text = trace.to_string();
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&path, text)?;
        Ok(path)
    }
}

impl Drop for ReportDir {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Make an operation identifier safe for use as a directory name
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
