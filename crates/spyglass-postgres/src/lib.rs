//! PostgreSQL backends for spyglass.
//!
//! Production implementations of the core collaborator traits, all driven
//! through one sqlx connection pool:
//!
//! - [`PoolReconfigurator`] — flips the server-side logging parameters on
//!   every idle pooled connection for the duration of a session, restoring
//!   the probed originals on disable ([`spyglass::backend::QueryLogControl`])
//! - [`PgServerClock`] — session-window timestamps from the database
//!   server's clock, in its `log_timezone`
//!   ([`spyglass::backend::ServerClock`])
//! - [`PgBadgerAnalyzer`] — pgbadger invocation over the server log file,
//!   with section scraping ([`spyglass::backend::LogAnalyzer`])
//! - [`discover_log_path`] — asks the server where its log file lives
//!
//! # Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spyglass::{CoordinatorConfig, ProcessProfiler, ProfileStore, MemoryBlobStore, SessionCoordinator};
//! use spyglass_postgres::{PgBadgerAnalyzer, PgServerClock, PoolReconfigurator};
//!
//! # async fn wire(pool: sqlx::PgPool) -> spyglass::Result<()> {
//! let reconfigurator = Arc::new(PoolReconfigurator::new(pool.clone()));
//! reconfigurator.probe().await?;
//!
//! let coordinator = SessionCoordinator::new(
//!     Arc::new(ProcessProfiler::new()),
//!     Arc::new(ProfileStore::new()),
//!     Arc::new(MemoryBlobStore::new()),
//!     CoordinatorConfig { workers: 0, database: "erp".into() },
//! )
//! .with_query_log(reconfigurator)
//! .with_clock(Arc::new(PgServerClock::new(pool)))
//! .with_analyzer(Arc::new(PgBadgerAnalyzer::new()));
//! # Ok(())
//! # }
//! ```

pub mod badger;
pub mod clock;
pub mod html;
pub mod logpath;
pub mod reconfig;

pub use spyglass_common::{Result, SpyglassError};

pub use badger::{find_in_path, PgBadgerAnalyzer, ANALYZER_BINARY};
pub use clock::PgServerClock;
pub use html::{report_sections, ReportSections};
pub use logpath::discover_log_path;
pub use reconfig::{
    logging_preconfigured, options_overlay, pg_options_env, AdminConnection, PoolReconfigurator,
    SetupInstructions, PG_LOG_PARAMETERS,
};
