//! Session-scoped performance diagnostics for application servers.
//!
//! Spyglass instruments a running server process to capture call-stack
//! samples and backend query logs, tied to logical profiling sessions and
//! persisted as inspectable artifacts.
//!
//! # Architecture
//!
//! ```text
//! inbound unit of work
//!        |
//!   SamplingScope ----- consults ----> ProcessProfiler (flag + shared sampler)
//!        |                             RequestContext (per-request marker)
//!        v
//!   wrapped work, instrumented via SampleSpan guards
//!        |
//!        v
//!   SessionCoordinator -- on disable -> dump pipeline
//!        |                               |- blob store (sample buffers, HTML)
//!        |                               |- stat-line index (report grammar)
//!        |                               `- external log analyzer (best effort)
//!        `-- QueryLogControl (PostgreSQL pool reconfiguration, in
//!            spyglass-postgres)
//! ```
//!
//! # Modes
//!
//! - **Full**: one session samples all activity between enable and disable
//!   into the shared process sampler. Single-worker deployments only; the
//!   process flag enforces one full-mode session at a time.
//! - **Per-request**: units of work whose context carries the session's
//!   marker are each captured in a private sampler and stored as
//!   `RequestSample` rows with their buffer blobs.

pub mod backend;
pub mod blob;
pub mod context;
pub mod process;
pub mod records;
pub mod report;
pub mod sampler;
pub mod scope;
pub mod session;

pub use spyglass_common::{Result, SpyglassError};

pub use backend::{
    AnalyzeRequest, AnalyzerReport, LogAnalyzer, NoAnalyzer, NoopQueryLog, QueryLogControl,
    ServerClock, SystemClock,
};
pub use blob::{BlobId, BlobRef, BlobStore, MemoryBlobStore, OwnerModel, OwnerRef};
pub use context::{RequestContext, RequestInfo};
pub use process::ProcessProfiler;
pub use records::{
    ProfileMode, ProfileStore, RequestSample, SampleId, Session, SessionId, SessionState,
};
pub use report::{parse_line, parse_report, render_report, StatLine};
pub use sampler::{CallSite, CallStats, SampleBuffer, SampleSpan, Sampler, SharedSampler};
pub use scope::{observe, SamplingScope};
pub use session::{CoordinatorConfig, SessionCoordinator};
