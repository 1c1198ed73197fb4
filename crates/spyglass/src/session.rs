//! Session coordination
//!
//! [`SessionCoordinator`] drives the enable/disable lifecycle of profiling
//! sessions: precondition checks, session-window timestamps from the server
//! clock, flipping the process flag or stashing per-request markers,
//! toggling backend query logging, and the full-mode dump pipeline that
//! turns the shared sampler's buffer into stored artifacts.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use spyglass_common::{Result, SpyglassError};

use crate::backend::{
    AnalyzeRequest, LogAnalyzer, NoAnalyzer, NoopQueryLog, QueryLogControl, ServerClock,
    SystemClock,
};
use crate::blob::{BlobId, BlobRef, BlobStore, OwnerRef};
use crate::context::RequestContext;
use crate::process::ProcessProfiler;
use crate::records::{ProfileMode, ProfileStore, Session, SessionId, SessionState};
use crate::report;
use crate::sampler::EMPTY_BUFFER;

/// Host-server facts the coordinator needs for its precondition checks and
/// for the log analyzer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoordinatorConfig {
    /// Worker processes the host server runs with. Full-process sampling is
    /// only defined for a single worker (0 = threaded single process).
    pub workers: u32,
    /// Database name the host serves; the analyzer filters log entries by it.
    pub database: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            database: "postgres".to_string(),
        }
    }
}

/// Orchestrates session state transitions and artifact dumping.
pub struct SessionCoordinator {
    process: Arc<ProcessProfiler>,
    store: Arc<ProfileStore>,
    blobs: Arc<dyn BlobStore>,
    query_log: Arc<dyn QueryLogControl>,
    clock: Arc<dyn ServerClock>,
    analyzer: Arc<dyn LogAnalyzer>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(
        process: Arc<ProcessProfiler>,
        store: Arc<ProfileStore>,
        blobs: Arc<dyn BlobStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            process,
            store,
            blobs,
            query_log: Arc::new(NoopQueryLog),
            clock: Arc::new(SystemClock),
            analyzer: Arc::new(NoAnalyzer),
            config,
        }
    }

    /// Use a backend query-log control (e.g. the PostgreSQL pool
    /// reconfigurator) instead of the no-op default.
    pub fn with_query_log(mut self, query_log: Arc<dyn QueryLogControl>) -> Self {
        self.query_log = query_log;
        self
    }

    /// Use a server-side clock instead of the host clock.
    pub fn with_clock(mut self, clock: Arc<dyn ServerClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use an external log analyzer for the dump pipeline.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn LogAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn process(&self) -> &Arc<ProcessProfiler> {
        &self.process
    }

    /// Register a session and return its id.
    pub fn create(&self, session: Session) -> SessionId {
        self.store.insert(session)
    }

    /// Transition a session to `enabled`.
    ///
    /// Full mode: rejects multi-worker deployments and a second concurrent
    /// full-mode session, then flips the process flag. Per-request mode:
    /// stashes the session marker on the active context. Either way the
    /// start timestamp comes from the server clock, and backend query
    /// logging is applied when the session asks for it.
    #[instrument(skip(self, ctx), fields(session = %id))]
    pub async fn enable(&self, id: SessionId, ctx: Option<&mut RequestContext>) -> Result<()> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;
        if !session.state.can_transition_to(SessionState::Enabled) {
            return Err(SpyglassError::InvalidState(format!(
                "session '{}' is already enabled",
                session.name
            )));
        }

        info!("enabling profiler");
        let now = self.clock.now_utc().await?;
        match session.mode {
            ProfileMode::Full => {
                if self.config.workers > 0 {
                    return Err(SpyglassError::Precondition(format!(
                        "full-process profiling needs a single worker; restart the \
                         server with workers=0 (currently {})",
                        self.config.workers
                    )));
                }
                self.process.activate()?;
                if let Err(err) = self.apply_query_logging(&session, true).await {
                    // Leave no trace of the failed activation.
                    self.process.deactivate();
                    return Err(err);
                }
                self.store.update(id, |s| {
                    s.state = SessionState::Enabled;
                    s.started_at = Some(now);
                })?;
            }
            ProfileMode::PerRequest => {
                let ctx = ctx.ok_or_else(|| {
                    SpyglassError::Precondition(
                        "per-request profiling requires an active request context".to_string(),
                    )
                })?;
                ctx.set_profile_marker(Some(id));
                let client_id = ctx.client_id().map(str::to_string);
                self.store.update(id, |s| {
                    s.state = SessionState::Enabled;
                    s.started_at = Some(now);
                    s.client_id = client_id;
                })?;
            }
        }
        Ok(())
    }

    /// Transition a session to `disabled`; in full mode this flushes the
    /// shared sampler into stored artifacts first. Returns the dump blob,
    /// if one was produced.
    #[instrument(skip(self, ctx), fields(session = %id))]
    pub async fn disable(
        &self,
        id: SessionId,
        ctx: Option<&mut RequestContext>,
    ) -> Result<Option<BlobRef>> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;
        if !session.state.can_transition_to(SessionState::Disabled) {
            return Err(SpyglassError::InvalidState(format!(
                "session '{}' is not enabled",
                session.name
            )));
        }

        info!("disabling profiler");
        match session.mode {
            ProfileMode::Full => self.process.deactivate(),
            ProfileMode::PerRequest => {
                if let Some(ctx) = ctx {
                    ctx.set_profile_marker(None);
                }
            }
        }

        let now = self.clock.now_utc().await?;
        self.store.update(id, |s| {
            s.state = SessionState::Disabled;
            s.finished_at = Some(now);
        })?;

        let blob = match session.mode {
            ProfileMode::Full => self.dump_stats(id).await?,
            ProfileMode::PerRequest => None,
        };
        self.process.clear();
        self.apply_query_logging(&session, false).await?;
        Ok(blob)
    }

    /// Wipe the shared sampler's accumulated buffer; with `reset_start` the
    /// session's start timestamp moves to now (restarting a full-mode
    /// capture without an enable/disable cycle).
    pub async fn clear(&self, id: SessionId, reset_start: bool) -> Result<()> {
        info!(session = %id, "clearing profiler buffer");
        if reset_start {
            let now = self.clock.now_utc().await?;
            self.store.update(id, |s| s.started_at = Some(now))?;
        } else if self.store.get(id).is_none() {
            return Err(SpyglassError::SessionNotFound(id.to_string()));
        }
        self.process.clear();
        Ok(())
    }

    /// Destroy a session, cascading to its request samples, stat lines and
    /// every blob owned by the session or its samples.
    pub async fn delete(&self, id: SessionId) -> Result<()> {
        let removed = self.store.remove(id)?;
        let mut blob_ids: Vec<BlobId> = Vec::new();
        for blob in self.blobs.list(OwnerRef::session(id)).await? {
            blob_ids.push(blob.id);
        }
        for sample_id in &removed.sample_ids {
            for blob in self.blobs.list(OwnerRef::sample(*sample_id)).await? {
                blob_ids.push(blob.id);
            }
        }
        self.blobs.delete(&blob_ids).await?;
        info!(
            session = %id,
            samples = removed.sample_ids.len(),
            blobs = blob_ids.len(),
            "session deleted"
        );
        Ok(())
    }

    /// Number of blobs currently owned by a session.
    pub async fn blob_count(&self, id: SessionId) -> Result<usize> {
        Ok(self.blobs.list(OwnerRef::session(id)).await?.len())
    }

    /// Flush the shared sampler's buffer into stored artifacts (full mode).
    ///
    /// Produces nothing when the buffer is empty. The query-log analysis
    /// tail is best-effort: its failures become session diagnostics, never
    /// errors.
    #[instrument(skip(self), fields(session = %id))]
    pub async fn dump_stats(&self, id: SessionId) -> Result<Option<BlobRef>> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;

        let dir = tempfile::tempdir()?;
        let fname = session.artifact_name("call_stats", ".json");
        let path = dir.path().join(&fname);
        info!("dumping call stats '{}'", path.display());
        tokio::fs::write(&path, self.process.dump()?).await?;
        let bytes = tokio::fs::read(&path).await?;

        if bytes.is_empty() || bytes == EMPTY_BUFFER {
            info!("call stats empty");
            return Ok(None);
        }

        let blob = self
            .blobs
            .create(
                OwnerRef::session(id),
                &fname,
                bytes,
                "sampler dump stats",
            )
            .await?;
        info!("call stats stored, here {}", blob.name);

        if session.index_report {
            let rendered = report::render_report(&self.process.buffer());
            let lines = report::parse_report(&rendered);
            self.store.replace_stat_lines(id, lines);
        }

        self.dump_query_logs(id).await;
        Ok(Some(blob))
    }

    /// Best-effort query-log analysis; failures are recorded on the session.
    async fn dump_query_logs(&self, id: SessionId) {
        if let Err(err) = self.try_dump_query_logs(id).await {
            warn!(session = %id, "query log analysis skipped: {}", err);
            let _ = self
                .store
                .update(id, |s| s.append_diagnostic(&err.to_string()));
        }
    }

    async fn try_dump_query_logs(&self, id: SessionId) -> Result<()> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| SpyglassError::SessionNotFound(id.to_string()))?;
        if !session.enable_pg_logging {
            return Ok(());
        }
        let log_path = session.log_path.clone().ok_or_else(|| {
            SpyglassError::Analyzer("no server log file configured".to_string())
        })?;
        let started = session
            .started_at
            .ok_or_else(|| SpyglassError::Analyzer("session has no start timestamp".to_string()))?;
        let finished = session
            .finished_at
            .ok_or_else(|| SpyglassError::Analyzer("session has no end timestamp".to_string()))?;

        let report = self
            .analyzer
            .analyze(AnalyzeRequest {
                log_path,
                started,
                finished,
                label: session.name.clone(),
                database: self.config.database.clone(),
            })
            .await?;
        if report.html.is_empty() {
            return Err(SpyglassError::Analyzer(
                "analyzer output is empty".to_string(),
            ));
        }

        let fname = session.artifact_name("pg_stats", ".html");
        self.blobs
            .create(
                OwnerRef::session(id),
                &fname,
                report.html.clone(),
                "query log analyzer output",
            )
            .await?;
        self.store.update(id, |s| {
            s.stats_slowest_html = report.slowest_html.clone();
            s.stats_time_consuming_html = report.time_consuming_html.clone();
            s.stats_most_frequent_html = report.most_frequent_html.clone();
        })?;
        Ok(())
    }

    /// Apply or restore backend logging parameters for a session that asked
    /// for query-log capture, unless they are managed outside this tool.
    async fn apply_query_logging(&self, session: &Session, enable: bool) -> Result<()> {
        if !session.enable_pg_logging {
            return Ok(());
        }
        if self.query_log.externally_configured() {
            info!("query logging already configured externally, leaving it alone");
            return Ok(());
        }
        self.query_log.apply(enable).await
    }
}
