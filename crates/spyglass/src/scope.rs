//! Sampling scope
//!
//! The interception point the host serving layer wraps around every inbound
//! unit of work. On entry the scope decides, from the process flag and the
//! request context, whether to sample into the shared full-process sampler,
//! into a fresh private sampler for a marked per-request session, or not at
//! all. The sampler is released on every exit path — normal completion,
//! early return, or a cancelled/panicked future — via `Drop`.
//!
//! The persistence tail of a per-request capture runs only on explicit
//! [`SamplingScope::complete`], and any failure in it is downgraded to a
//! log line: instrumentation must never break the unit of work it measures.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use spyglass_common::{Result, SpyglassError};

use crate::blob::{BlobStore, OwnerRef};
use crate::context::RequestContext;
use crate::process::ProcessProfiler;
use crate::records::{ProfileStore, RequestSample, SampleId, SessionId, FILE_TIMESTAMP_FORMAT};
use crate::sampler::{SharedSampler, EMPTY_BUFFER};

enum ScopeState {
    /// Full-process capture into the shared sampler.
    Shared { process: Arc<ProcessProfiler> },
    /// Per-request capture into a private sampler.
    Request {
        sampler: SharedSampler,
        session: SessionId,
        started: Instant,
    },
    Passthrough,
}

/// Scoped interception region around one unit of work.
pub struct SamplingScope {
    state: Option<ScopeState>,
}

impl SamplingScope {
    /// Enter the scope for one unit of work.
    ///
    /// Per-request markers are only consulted while the process flag is
    /// off: one mode is active at a time per process.
    pub fn enter(process: &Arc<ProcessProfiler>, ctx: &RequestContext) -> Self {
        let state = if process.is_enabled() {
            debug!("catching full-process sample");
            let sampler = process.sampler();
            sampler.enable();
            ScopeState::Shared {
                process: Arc::clone(process),
            }
        } else if let Some(session) = ctx.profile_marker() {
            debug!(%session, "catching per-request sample");
            let sampler = SharedSampler::new();
            sampler.enable();
            ScopeState::Request {
                sampler,
                session,
                started: Instant::now(),
            }
        } else {
            ScopeState::Passthrough
        };
        Self { state: Some(state) }
    }

    /// Handle to the sampler active for this scope, for threading into
    /// instrumented code. `None` when passing through.
    pub fn sampler(&self) -> Option<SharedSampler> {
        match self.state.as_ref()? {
            ScopeState::Shared { process } => Some(process.sampler()),
            ScopeState::Request { sampler, .. } => Some(sampler.clone()),
            ScopeState::Passthrough => None,
        }
    }

    /// Close the scope after the unit of work completed normally.
    ///
    /// For a per-request capture this runs the best-effort persistence
    /// tail; its errors are logged and swallowed.
    pub async fn complete(
        mut self,
        store: &ProfileStore,
        blobs: &dyn BlobStore,
        ctx: &RequestContext,
    ) {
        match self.state.take() {
            Some(ScopeState::Shared { process }) => {
                if process.is_enabled() {
                    process.sampler().disable();
                }
            }
            Some(ScopeState::Request {
                sampler,
                session,
                started,
            }) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                sampler.disable();
                if let Err(err) =
                    persist_request_sample(&sampler, session, elapsed_ms, store, blobs, ctx).await
                {
                    warn!(%session, "per-request sample not persisted: {}", err);
                }
            }
            Some(ScopeState::Passthrough) | None => {}
        }
    }
}

impl Drop for SamplingScope {
    fn drop(&mut self) {
        match self.state.take() {
            Some(ScopeState::Shared { process }) => {
                if process.is_enabled() {
                    process.sampler().disable();
                }
            }
            Some(ScopeState::Request { sampler, .. }) => {
                // The unit of work did not complete; release the sampler
                // and drop the capture.
                sampler.disable();
            }
            Some(ScopeState::Passthrough) | None => {}
        }
    }
}

/// Wrap one unit of work in a sampling scope. The closure receives the
/// active sampler handle (if any) for explicit instrumentation.
pub async fn observe<F, Fut, T>(
    process: &Arc<ProcessProfiler>,
    ctx: &RequestContext,
    store: &ProfileStore,
    blobs: &dyn BlobStore,
    work: F,
) -> T
where
    F: FnOnce(Option<SharedSampler>) -> Fut,
    Fut: Future<Output = T>,
{
    let scope = SamplingScope::enter(process, ctx);
    let sampler = scope.sampler();
    let output = work(sampler).await;
    scope.complete(store, blobs, ctx).await;
    output
}

/// Persistence tail of a per-request capture: dump the private buffer
/// through a uniquely-named temporary file and, if non-empty, store it as
/// a new request-sample blob.
async fn persist_request_sample(
    sampler: &SharedSampler,
    session: SessionId,
    elapsed_ms: f64,
    store: &ProfileStore,
    blobs: &dyn BlobStore,
    ctx: &RequestContext,
) -> Result<()> {
    let info = ctx
        .request()
        .ok_or_else(|| SpyglassError::InvalidState("no active request on context".to_string()))?;
    if store.get(session).is_none() {
        return Err(SpyglassError::SessionNotFound(session.to_string()));
    }

    let file = tempfile::Builder::new()
        .prefix(&format!(
            "call_stats_{}_",
            Utc::now().format(FILE_TIMESTAMP_FORMAT)
        ))
        .suffix(".json")
        .tempfile()?;
    info!("dumping call stats '{}'", file.path().display());
    tokio::fs::write(file.path(), sampler.dump()?).await?;
    let bytes = tokio::fs::read(file.path()).await?;

    if bytes.is_empty() || bytes == EMPTY_BUFFER {
        info!("call stats empty");
        return Ok(());
    }

    let name = file
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "call_stats.json".to_string());

    let sample = RequestSample {
        id: SampleId::new(),
        session_id: session,
        path: info.path.clone(),
        root_url: info.root_url.clone(),
        user: info.user.clone(),
        context: info.context_string(),
        elapsed_ms,
        created_at: Utc::now(),
    };
    let sample_id = store.insert_sample(sample);
    blobs
        .create(
            OwnerRef::sample(sample_id),
            &name,
            bytes,
            "sampler dump stats",
        )
        .await?;
    Ok(())
}
