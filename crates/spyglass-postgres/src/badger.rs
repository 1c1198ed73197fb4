//! External log analysis via pgbadger
//!
//! Runs the pgbadger binary over the server log file for a session's
//! capture window and scrapes the query sections out of its HTML output.
//! Every failure here — binary not installed, log file unreadable, non-zero
//! exit, empty output — is an expected operational condition and surfaces
//! as a best-effort [`SpyglassError::Analyzer`] for the caller to record.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, instrument};

use spyglass::backend::{AnalyzeRequest, AnalyzerReport, LogAnalyzer};
use spyglass_common::{Result, SpyglassError};

use crate::html;

pub const ANALYZER_BINARY: &str = "pgbadger";

/// Timestamp format pgbadger accepts for `-b`/`-e` window bounds.
const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Locate an executable on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// pgbadger-backed [`LogAnalyzer`].
#[derive(Debug, Default)]
pub struct PgBadgerAnalyzer {
    binary: Option<PathBuf>,
}

impl PgBadgerAnalyzer {
    /// Analyzer that looks the binary up on `PATH` per invocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer with an explicit binary path.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(binary) = &self.binary {
            return Ok(binary.clone());
        }
        find_in_path(ANALYZER_BINARY).ok_or_else(|| {
            SpyglassError::Analyzer(format!(
                "{} is not installed; install it with 'apt-get install {}'",
                ANALYZER_BINARY, ANALYZER_BINARY
            ))
        })
    }

    /// The fixed pgbadger argument set for one analysis request.
    fn command_args(request: &AnalyzeRequest) -> Vec<String> {
        vec![
            "-f".to_string(),
            "stderr".to_string(),
            "--sample".to_string(),
            "15".to_string(),
            "-o".to_string(),
            "-".to_string(),
            "-x".to_string(),
            "html".to_string(),
            "--quiet".to_string(),
            "-T".to_string(),
            request.label.clone(),
            "-d".to_string(),
            request.database.clone(),
            "-b".to_string(),
            request.started.format(WINDOW_FORMAT).to_string(),
            "-e".to_string(),
            request.finished.format(WINDOW_FORMAT).to_string(),
            request.log_path.display().to_string(),
        ]
    }
}

#[async_trait]
impl LogAnalyzer for PgBadgerAnalyzer {
    #[instrument(skip(self, request), fields(log = %request.log_path.display()))]
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzerReport> {
        let binary = self.resolve_binary()?;

        // Probe readability up front for a pointed diagnostic.
        if let Err(err) = tokio::fs::File::open(&request.log_path).await {
            return Err(SpyglassError::Analyzer(format!(
                "cannot read log file '{}': {}; maybe running: chmod 604 '{}'",
                request.log_path.display(),
                err,
                request.log_path.display()
            )));
        }

        let args = Self::command_args(&request);
        info!("running the command: {} {}", binary.display(), args.join(" "));
        let output = Command::new(&binary)
            .args(&args)
            .output()
            .await
            .map_err(|err| {
                SpyglassError::Analyzer(format!("{} did not start: {}", binary.display(), err))
            })?;

        if !output.status.success() {
            return Err(SpyglassError::Analyzer(format!(
                "{} exited with {}: {}",
                ANALYZER_BINARY,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(SpyglassError::Analyzer(format!(
                "{} output is empty",
                ANALYZER_BINARY
            )));
        }

        let sections = html::report_sections(&output.stdout);
        Ok(AnalyzerReport {
            html: output.stdout,
            slowest_html: sections.slowest,
            time_consuming_html: sections.time_consuming,
            most_frequent_html: sections.most_frequent,
        })
    }
}
