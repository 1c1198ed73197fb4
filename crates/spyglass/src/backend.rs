//! Backend collaborators
//!
//! Seams between the coordinator and the machinery it drives: the server
//! clock that stamps session windows, the query-log control that flips
//! backend logging parameters, and the external log analyzer that turns a
//! server log file into an HTML report. Production implementations live in
//! `spyglass-postgres`; the in-process defaults here keep the coordinator
//! usable (and testable) without a database.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use spyglass_common::{Result, SpyglassError};

/// Source of the timestamps recorded on session start/finish.
#[async_trait]
pub trait ServerClock: Send + Sync {
    async fn now_utc(&self) -> Result<DateTime<Utc>>;
}

/// Application-host clock. Production deployments use the database server's
/// clock instead so session windows line up with server log timestamps.
#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl ServerClock for SystemClock {
    async fn now_utc(&self) -> Result<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

/// Switches backend query logging on or off for the duration of a session.
#[async_trait]
pub trait QueryLogControl: Send + Sync {
    /// True when the target logging parameters are permanently configured
    /// outside this tool; [`QueryLogControl::apply`] must then be skipped so
    /// operator-managed configuration is never clobbered.
    fn externally_configured(&self) -> bool {
        false
    }

    /// Apply the target logging parameters (`enable`) or restore the
    /// previously observed originals (`!enable`).
    async fn apply(&self, enable: bool) -> Result<()>;
}

/// No-op control for deployments without query-log capture.
#[derive(Debug, Default)]
pub struct NoopQueryLog;

#[async_trait]
impl QueryLogControl for NoopQueryLog {
    async fn apply(&self, _enable: bool) -> Result<()> {
        Ok(())
    }
}

/// One analysis request: a server log file and the capture window to cover.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub log_path: PathBuf,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    /// Report title, usually the session name.
    pub label: String,
    /// Database to filter log entries by.
    pub database: String,
}

/// Analyzer output: the raw HTML report plus the scraped, sanitized
/// sections the session keeps for display.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerReport {
    pub html: Vec<u8>,
    pub slowest_html: Option<String>,
    pub time_consuming_html: Option<String>,
    pub most_frequent_html: Option<String>,
}

/// External log-analysis process.
///
/// Failures here (missing binary, unreadable log file) are expected
/// operational conditions: callers on the dump path record them as
/// diagnostics and continue.
#[async_trait]
pub trait LogAnalyzer: Send + Sync {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzerReport>;
}

/// Placeholder analyzer for deployments without one installed.
#[derive(Debug, Default)]
pub struct NoAnalyzer;

#[async_trait]
impl LogAnalyzer for NoAnalyzer {
    async fn analyze(&self, _request: AnalyzeRequest) -> Result<AnalyzerReport> {
        Err(SpyglassError::Analyzer(
            "no log analyzer configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_clock_returns_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now_utc().await.unwrap();
        let after = Utc::now();
        assert!(now >= before && now <= after);
    }

    #[tokio::test]
    async fn test_no_analyzer_fails_best_effort() {
        let err = NoAnalyzer
            .analyze(AnalyzeRequest {
                log_path: PathBuf::from("/var/log/postgresql/postgresql.log"),
                started: Utc::now(),
                finished: Utc::now(),
                label: "s".to_string(),
                database: "db".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_best_effort());
    }
}
