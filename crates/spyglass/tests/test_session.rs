//! Integration tests for the session coordinator.
//!
//! Run the coordinator against in-memory collaborators: the process
//! profiler, the in-memory record and blob stores, a fixed server clock,
//! a recording query-log control and scripted analyzers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use spyglass::{
    observe, AnalyzeRequest, AnalyzerReport, BlobStore, CallSite, CoordinatorConfig, LogAnalyzer,
    MemoryBlobStore, OwnerRef, ProcessProfiler, ProfileMode, ProfileStore, QueryLogControl,
    RequestContext, RequestInfo, ServerClock, Session, SessionCoordinator, SessionState,
    SpyglassError,
};
use spyglass_common::Result;

/// Server clock pinned to a known instant.
struct FixedClock(DateTime<Utc>);

#[async_trait]
impl ServerClock for FixedClock {
    async fn now_utc(&self) -> Result<DateTime<Utc>> {
        Ok(self.0)
    }
}

/// Query-log control that records every `apply` call.
#[derive(Default)]
struct RecordingQueryLog {
    external: bool,
    calls: Mutex<Vec<bool>>,
}

impl RecordingQueryLog {
    fn external() -> Self {
        Self {
            external: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn applied(&self) -> Vec<bool> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl QueryLogControl for RecordingQueryLog {
    fn externally_configured(&self) -> bool {
        self.external
    }

    async fn apply(&self, enable: bool) -> Result<()> {
        self.calls.lock().push(enable);
        Ok(())
    }
}

/// Analyzer returning a canned report.
struct CannedAnalyzer;

#[async_trait]
impl LogAnalyzer for CannedAnalyzer {
    async fn analyze(&self, _request: AnalyzeRequest) -> Result<AnalyzerReport> {
        Ok(AnalyzerReport {
            html: b"<html><body>report</body></html>".to_vec(),
            slowest_html: Some("<div>slowest</div>".to_string()),
            time_consuming_html: Some("<div>time consuming</div>".to_string()),
            most_frequent_html: Some("<div>most frequent</div>".to_string()),
        })
    }
}

/// Analyzer that always fails, like a missing binary.
struct BrokenAnalyzer;

#[async_trait]
impl LogAnalyzer for BrokenAnalyzer {
    async fn analyze(&self, _request: AnalyzeRequest) -> Result<AnalyzerReport> {
        Err(SpyglassError::Analyzer(
            "pgbadger not found on PATH".to_string(),
        ))
    }
}

struct Harness {
    process: Arc<ProcessProfiler>,
    store: Arc<ProfileStore>,
    blobs: Arc<MemoryBlobStore>,
    query_log: Arc<RecordingQueryLog>,
    coordinator: SessionCoordinator,
}

fn harness_with(config: CoordinatorConfig, query_log: RecordingQueryLog) -> Harness {
    let process = Arc::new(ProcessProfiler::new());
    let store = Arc::new(ProfileStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let query_log = Arc::new(query_log);
    let coordinator = SessionCoordinator::new(
        Arc::clone(&process),
        Arc::clone(&store),
        Arc::clone(&blobs) as Arc<dyn BlobStore>,
        config,
    )
    .with_clock(Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
    )))
    .with_query_log(Arc::clone(&query_log) as Arc<dyn QueryLogControl>);
    Harness {
        process,
        store,
        blobs,
        query_log,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(CoordinatorConfig::default(), RecordingQueryLog::default())
}

fn request_ctx() -> RequestContext {
    RequestContext::for_request(
        RequestInfo {
            path: "/web/dataset/call".to_string(),
            root_url: "https://example.com/".to_string(),
            user: Some("admin".to_string()),
            context: serde_json::json!({"uid": 2}),
        },
        "sid-1",
    )
}

/// Run one unit of work through the sampling scope, recording `sites`.
async fn run_sampled_work(h: &Harness, ctx: &RequestContext, sites: &[CallSite]) {
    observe(
        &h.process,
        ctx,
        h.store.as_ref(),
        h.blobs.as_ref(),
        |sampler| async move {
            if let Some(sampler) = sampler {
                for site in sites {
                    drop(sampler.span(site.clone()));
                }
            }
        },
    )
    .await;
}

// =============================================================================
// Full-mode lifecycle
// =============================================================================

#[tokio::test]
async fn test_full_cycle_without_work_produces_no_blob() {
    let h = harness();
    let id = h.coordinator.create(Session::new("idle", ProfileMode::Full));

    h.coordinator.enable(id, None).await.unwrap();
    let blob = h.coordinator.disable(id, None).await.unwrap();

    assert!(blob.is_none());
    assert!(h.blobs.is_empty());
    let session = h.store.get(id).unwrap();
    assert_eq!(session.state, SessionState::Disabled);
    assert!(session.started_at.is_some());
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn test_full_cycle_with_work_produces_one_blob() {
    let h = harness();
    let id = h.coordinator.create(Session::new("busy", ProfileMode::Full));

    h.coordinator.enable(id, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    let blob = h.coordinator.disable(id, None).await.unwrap();

    let blob = blob.expect("recorded work produces a dump blob");
    assert!(blob.name.starts_with("call_stats_"));
    assert_eq!(h.coordinator.blob_count(id).await.unwrap(), 1);

    // The buffer was cleared after the dump: a fresh cycle starts empty.
    h.coordinator.enable(id, None).await.unwrap();
    let second = h.coordinator.disable(id, None).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn test_indexing_creates_one_row_per_well_formed_line() {
    let h = harness();
    let id = h.coordinator.create(
        Session::new("indexed", ProfileMode::Full).with_index_report(true),
    );

    h.coordinator.enable(id, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(
        &h,
        &ctx,
        &[
            CallSite::new("app.py", 10, "handler"),
            CallSite::new("app.py", 20, "render"),
            CallSite::new("orm.py", 5, "flush"),
        ],
    )
    .await;
    let blob = h.coordinator.disable(id, None).await.unwrap().unwrap();

    // Rebuild the report from the stored buffer; the indexed rows must
    // match its well-formed lines one for one.
    let bytes = h.blobs.read(blob.id).await.unwrap();
    let buffer = spyglass::Sampler::load(&bytes).unwrap();
    let expected = spyglass::parse_report(&spyglass::render_report(&buffer));

    let rows = h.store.stat_lines(id);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_reindexing_replaces_prior_rows() {
    let h = harness();
    let id = h.coordinator.create(
        Session::new("reindexed", ProfileMode::Full).with_index_report(true),
    );

    h.coordinator.enable(id, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(
        &h,
        &ctx,
        &[
            CallSite::new("app.py", 10, "handler"),
            CallSite::new("app.py", 20, "render"),
        ],
    )
    .await;
    h.coordinator.disable(id, None).await.unwrap();
    assert_eq!(h.store.stat_lines(id).len(), 2);

    h.coordinator.enable(id, None).await.unwrap();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    h.coordinator.disable(id, None).await.unwrap();

    // Replaced, not appended.
    assert_eq!(h.store.stat_lines(id).len(), 1);
}

#[tokio::test]
async fn test_second_full_enable_is_rejected() {
    let h = harness();
    let first = h.coordinator.create(Session::new("first", ProfileMode::Full));
    let second = h.coordinator.create(Session::new("second", ProfileMode::Full));

    h.coordinator.enable(first, None).await.unwrap();
    let err = h.coordinator.enable(second, None).await.unwrap_err();

    assert!(err.is_user_facing());
    assert_eq!(h.store.get(first).unwrap().state, SessionState::Enabled);
    assert_eq!(h.store.get(second).unwrap().state, SessionState::Disabled);
    assert!(h.store.get(second).unwrap().started_at.is_none());
}

#[tokio::test]
async fn test_full_mode_rejects_multi_worker_server() {
    let h = harness_with(
        CoordinatorConfig {
            workers: 4,
            ..CoordinatorConfig::default()
        },
        RecordingQueryLog::default(),
    );
    let id = h.coordinator.create(Session::new("full", ProfileMode::Full));

    let err = h.coordinator.enable(id, None).await.unwrap_err();
    assert!(matches!(err, SpyglassError::Precondition(_)));
    assert!(err.to_string().contains("workers=0"));
    assert!(!h.process.is_enabled());
    assert_eq!(h.store.get(id).unwrap().state, SessionState::Disabled);
}

#[tokio::test]
async fn test_double_disable_is_rejected() {
    let h = harness();
    let id = h.coordinator.create(Session::new("s", ProfileMode::Full));
    h.coordinator.enable(id, None).await.unwrap();
    h.coordinator.disable(id, None).await.unwrap();
    let err = h.coordinator.disable(id, None).await.unwrap_err();
    assert!(matches!(err, SpyglassError::InvalidState(_)));
}

#[tokio::test]
async fn test_clear_resets_buffer_and_optionally_start() {
    let h = harness();
    let id = h.coordinator.create(Session::new("s", ProfileMode::Full));
    h.coordinator.enable(id, None).await.unwrap();
    let started = h.store.get(id).unwrap().started_at;

    let ctx = RequestContext::background();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    h.coordinator.clear(id, false).await.unwrap();
    assert_eq!(h.store.get(id).unwrap().started_at, started);

    // Buffer was wiped, so the cycle dumps nothing.
    let blob = h.coordinator.disable(id, None).await.unwrap();
    assert!(blob.is_none());
}

// =============================================================================
// Per-request mode
// =============================================================================

#[tokio::test]
async fn test_per_request_enable_keeps_process_flag_off() {
    let h = harness();
    let id = h
        .coordinator
        .create(Session::new("slow search", ProfileMode::PerRequest));
    let mut ctx = request_ctx();

    h.coordinator.enable(id, Some(&mut ctx)).await.unwrap();

    assert!(!h.process.is_enabled());
    assert_eq!(ctx.profile_marker(), Some(id));
    let session = h.store.get(id).unwrap();
    assert_eq!(session.state, SessionState::Enabled);
    assert_eq!(session.client_id.as_deref(), Some("sid-1"));
}

#[tokio::test]
async fn test_per_request_session_does_not_disturb_full_session() {
    let h = harness();
    let full = h.coordinator.create(Session::new("full", ProfileMode::Full));
    let per_request = h
        .coordinator
        .create(Session::new("request", ProfileMode::PerRequest));

    h.coordinator.enable(full, None).await.unwrap();
    let mut ctx = request_ctx();
    h.coordinator
        .enable(per_request, Some(&mut ctx))
        .await
        .unwrap();

    assert!(h.process.is_enabled());
    assert_eq!(h.store.get(full).unwrap().state, SessionState::Enabled);
}

#[tokio::test]
async fn test_per_request_enable_requires_context() {
    let h = harness();
    let id = h
        .coordinator
        .create(Session::new("request", ProfileMode::PerRequest));
    let err = h.coordinator.enable(id, None).await.unwrap_err();
    assert!(matches!(err, SpyglassError::Precondition(_)));
}

#[tokio::test]
async fn test_per_request_cycle_collects_samples() {
    let h = harness();
    let id = h
        .coordinator
        .create(Session::new("request", ProfileMode::PerRequest));
    let mut ctx = request_ctx();
    h.coordinator.enable(id, Some(&mut ctx)).await.unwrap();

    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 20, "render")]).await;

    let blob = h.coordinator.disable(id, Some(&mut ctx)).await.unwrap();
    assert!(blob.is_none(), "per-request disable does not dump");
    assert!(ctx.profile_marker().is_none());

    let samples = h.store.samples_for(id);
    assert_eq!(samples.len(), 2);
    for sample in &samples {
        let owned = h.blobs.list(OwnerRef::sample(sample.id)).await.unwrap();
        assert_eq!(owned.len(), 1);
    }
}

// =============================================================================
// Query logging
// =============================================================================

#[tokio::test]
async fn test_query_logging_applied_and_restored() {
    let h = harness();
    let id = h.coordinator.create(
        Session::new("logged", ProfileMode::Full).with_pg_logging(true),
    );

    h.coordinator.enable(id, None).await.unwrap();
    h.coordinator.disable(id, None).await.unwrap();

    assert_eq!(h.query_log.applied(), vec![true, false]);
}

#[tokio::test]
async fn test_query_logging_skipped_when_externally_configured() {
    let h = harness_with(CoordinatorConfig::default(), RecordingQueryLog::external());
    let id = h.coordinator.create(
        Session::new("logged", ProfileMode::Full).with_pg_logging(true),
    );

    h.coordinator.enable(id, None).await.unwrap();
    h.coordinator.disable(id, None).await.unwrap();

    assert!(h.query_log.applied().is_empty());
}

#[tokio::test]
async fn test_query_logging_untouched_when_not_requested() {
    let h = harness();
    let id = h.coordinator.create(Session::new("plain", ProfileMode::Full));

    h.coordinator.enable(id, None).await.unwrap();
    h.coordinator.disable(id, None).await.unwrap();

    assert!(h.query_log.applied().is_empty());
}

// =============================================================================
// Analyzer tail
// =============================================================================

#[tokio::test]
async fn test_analyzer_failure_becomes_diagnostic() {
    let h = harness();
    let coordinator = SessionCoordinator::new(
        Arc::clone(&h.process),
        Arc::clone(&h.store),
        Arc::clone(&h.blobs) as Arc<dyn BlobStore>,
        CoordinatorConfig::default(),
    )
    .with_analyzer(Arc::new(BrokenAnalyzer));
    let id = coordinator.create(
        Session::new("analyzed", ProfileMode::Full)
            .with_pg_logging(true)
            .with_log_path("/var/log/postgresql/postgresql.log"),
    );

    coordinator.enable(id, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    let blob = coordinator.disable(id, None).await.unwrap();

    // The dump itself still succeeds.
    assert!(blob.is_some());
    let session = h.store.get(id).unwrap();
    assert!(session.description.contains("pgbadger not found"));
    assert!(session.stats_slowest_html.is_none());
}

#[tokio::test]
async fn test_analyzer_success_stores_report_and_sections() {
    let h = harness();
    let coordinator = SessionCoordinator::new(
        Arc::clone(&h.process),
        Arc::clone(&h.store),
        Arc::clone(&h.blobs) as Arc<dyn BlobStore>,
        CoordinatorConfig::default(),
    )
    .with_analyzer(Arc::new(CannedAnalyzer));
    let id = coordinator.create(
        Session::new("analyzed", ProfileMode::Full)
            .with_pg_logging(true)
            .with_log_path("/var/log/postgresql/postgresql.log"),
    );

    coordinator.enable(id, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    coordinator.disable(id, None).await.unwrap();

    // Sampler dump + analyzer HTML.
    assert_eq!(coordinator.blob_count(id).await.unwrap(), 2);
    let session = h.store.get(id).unwrap();
    assert_eq!(session.stats_slowest_html.as_deref(), Some("<div>slowest</div>"));
    assert_eq!(
        session.stats_time_consuming_html.as_deref(),
        Some("<div>time consuming</div>")
    );
    assert_eq!(
        session.stats_most_frequent_html.as_deref(),
        Some("<div>most frequent</div>")
    );
}

// =============================================================================
// Cascade deletion
// =============================================================================

#[tokio::test]
async fn test_delete_cascades_rows_and_blobs() {
    let h = harness();
    let full = h.coordinator.create(
        Session::new("full", ProfileMode::Full).with_index_report(true),
    );
    let per_request = h
        .coordinator
        .create(Session::new("request", ProfileMode::PerRequest));

    // Produce artifacts for both sessions.
    h.coordinator.enable(full, None).await.unwrap();
    let ctx = RequestContext::background();
    run_sampled_work(&h, &ctx, &[CallSite::new("app.py", 10, "handler")]).await;
    h.coordinator.disable(full, None).await.unwrap();

    let mut req_ctx = request_ctx();
    h.coordinator
        .enable(per_request, Some(&mut req_ctx))
        .await
        .unwrap();
    run_sampled_work(&h, &req_ctx, &[CallSite::new("app.py", 20, "render")]).await;
    h.coordinator
        .disable(per_request, Some(&mut req_ctx))
        .await
        .unwrap();

    let sample_ids: Vec<_> = h.store.samples_for(per_request).iter().map(|s| s.id).collect();
    assert!(!sample_ids.is_empty());

    h.coordinator.delete(per_request).await.unwrap();
    assert!(h.store.get(per_request).is_none());
    for sample_id in &sample_ids {
        assert!(h.store.sample(*sample_id).is_none());
        assert!(h
            .blobs
            .list(OwnerRef::sample(*sample_id))
            .await
            .unwrap()
            .is_empty());
    }
    // The other session's artifacts survive.
    assert_eq!(h.coordinator.blob_count(full).await.unwrap(), 1);

    h.coordinator.delete(full).await.unwrap();
    assert!(h.blobs.is_empty(), "no orphan blobs remain");
    assert!(h.store.stat_lines(full).is_empty());
}
