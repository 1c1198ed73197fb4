//! Connection-pool reconfiguration
//!
//! Turns PostgreSQL backend query logging on and off for a profiling
//! session by issuing session-level `SET` commands on every currently-idle
//! pooled connection. Before first use, [`PoolReconfigurator::probe`] caches
//! the server's current values so disable restores them faithfully, and
//! detects whether the target parameters are already permanently configured
//! outside this tool (`postgresql.conf` or a `PGOPTIONS` environment) — in
//! which case reconfiguration is skipped entirely.
//!
//! A rejected parameter rolls back that connection's pending transaction
//! and aborts the pass with a user-facing error naming the parameter.
//! Connections already updated in the same pass keep their new settings:
//! the pass is fail-fast, not all-or-nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use tracing::{info, instrument};

use spyglass::backend::QueryLogControl;
use spyglass_common::{Result, SpyglassError};

/// Server-side logging parameters applied while a session captures query
/// logs, with their target values.
pub const PG_LOG_PARAMETERS: [(&str, &str); 9] = [
    ("log_min_duration_statement", "0"),
    ("client_min_messages", "notice"),
    ("log_min_messages", "warning"),
    ("log_min_error_statement", "error"),
    ("log_duration", "off"),
    ("log_error_verbosity", "verbose"),
    ("log_lock_waits", "on"),
    ("log_statement", "none"),
    ("log_temp_files", "0"),
];

/// The equivalent `PGOPTIONS` shell string, for operator instructions.
pub fn pg_options_env() -> String {
    PG_LOG_PARAMETERS
        .iter()
        .map(|(param, value)| format!("-c {}={}", param, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Startup-parameter pairs for wiring into `PgConnectOptions::options` when
/// building pools that should come up with logging already enabled.
pub fn options_overlay() -> Vec<(String, String)> {
    PG_LOG_PARAMETERS
        .iter()
        .map(|(param, value)| (param.to_string(), value.to_string()))
        .collect()
}

/// True when the target logging parameters are managed outside this tool:
/// either a non-empty `PGOPTIONS` environment, or
/// `log_min_duration_statement` already observed at its target value.
pub fn logging_preconfigured(pgoptions: Option<&str>, observed_min_duration: &str) -> bool {
    if pgoptions.map(|v| !v.trim().is_empty()).unwrap_or(false) {
        return true;
    }
    observed_min_duration.trim().eq_ignore_ascii_case("0")
}

/// Administrative access to one pooled connection.
///
/// The reconfiguration contract is written against this seam so the
/// fail-fast/restore behavior is testable without a server; the production
/// implementation below is a thin wrapper over a pooled sqlx connection.
#[async_trait]
pub trait AdminConnection: Send {
    async fn show(&mut self, param: &str) -> Result<String>;
    async fn set(&mut self, param: &str, value: &str) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait]
impl AdminConnection for PoolConnection<Postgres> {
    async fn show(&mut self, param: &str) -> Result<String> {
        // Parameter names come from the fixed target set, never user input.
        let value: String = sqlx::query_scalar(&format!("SHOW {}", param))
            .fetch_one(&mut **self)
            .await?;
        Ok(value)
    }

    async fn set(&mut self, param: &str, value: &str) -> Result<()> {
        // Values are quoted: restored originals may carry units ("100ms").
        let literal = value.replace('\'', "''");
        sqlx::query(&format!("SET {} TO '{}'", param, literal))
            .execute(&mut **self)
            .await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut **self).await?;
        Ok(())
    }
}

/// Apply `params` to every connection, parameter by parameter.
///
/// On a rejected parameter the failing connection's transaction is rolled
/// back and the pass stops with an error naming the parameter; connections
/// already updated keep their new settings.
pub async fn apply_parameters<C: AdminConnection>(
    connections: &mut [C],
    params: &[(String, String)],
) -> Result<()> {
    for connection in connections.iter_mut() {
        for (param, value) in params {
            if let Err(err) = connection.set(param, value).await {
                let _ = connection.rollback().await;
                return Err(SpyglassError::Parameter {
                    name: param.clone(),
                    cause: err.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Reconfigures the live connection pool for query-log capture.
pub struct PoolReconfigurator {
    pool: PgPool,
    originals: Mutex<HashMap<String, String>>,
    preconfigured: AtomicBool,
}

impl PoolReconfigurator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            originals: Mutex::new(HashMap::new()),
            preconfigured: AtomicBool::new(false),
        }
    }

    /// Probe the server once at startup: cache the current values of every
    /// target parameter for faithful restore, and detect externally managed
    /// logging configuration.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        let pgoptions = std::env::var("PGOPTIONS").ok();
        let observed = conn.show("log_min_duration_statement").await?;
        let preconfigured = logging_preconfigured(pgoptions.as_deref(), &observed);
        self.preconfigured.store(preconfigured, Ordering::SeqCst);
        info!(
            "query logging enabled from postgresql.conf or PGOPTIONS? {}",
            preconfigured
        );

        let mut originals = HashMap::new();
        for (param, _) in PG_LOG_PARAMETERS {
            originals.insert(param.to_string(), conn.show(param).await?);
        }
        *self.originals.lock() = originals;
        Ok(())
    }

    /// The probed original values, in target-parameter order.
    fn restore_parameters(&self) -> Vec<(String, String)> {
        let originals = self.originals.lock();
        PG_LOG_PARAMETERS
            .iter()
            .filter_map(|(param, _)| {
                originals
                    .get(*param)
                    .map(|value| (param.to_string(), value.clone()))
            })
            .collect()
    }

    fn target_parameters() -> Vec<(String, String)> {
        options_overlay()
    }

    /// Every currently-idle pooled connection. Connections checked out
    /// mid-flight are left alone; they keep their settings until returned.
    fn idle_connections(&self) -> Vec<PoolConnection<Postgres>> {
        let mut connections = Vec::new();
        while let Some(conn) = self.pool.try_acquire() {
            connections.push(conn);
        }
        connections
    }
}

/// Operator guidance for pre-enabling server-side logging.
#[derive(Debug, Clone)]
pub struct SetupInstructions {
    pub description: String,
    /// `postgresql.conf` location reported by the server, when readable.
    pub config_file: Option<String>,
    /// Set when the database server is not local to the application.
    pub remote_host: Option<String>,
}

impl PoolReconfigurator {
    /// Compose the instructions an operator needs to pseudo-enable server
    /// logs before a session can capture them: the `postgresql.conf`
    /// parameters to add and the `PGOPTIONS` alternative.
    pub async fn setup_instructions(&self, db_host: Option<&str>) -> Result<SetupInstructions> {
        let mut conn = self.pool.acquire().await?;
        let config_file = conn.show("config_file").await.ok();
        let remote_host = db_host
            .filter(|host| *host != "localhost" && *host != "127.0.0.1")
            .map(str::to_string);
        let located = match (&config_file, &remote_host) {
            (Some(file), Some(host)) => Some(format!("postgres@{}:{}", host, file)),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        };
        Ok(SetupInstructions {
            description: compose_setup_description(located.as_deref()),
            config_file,
            remote_host,
        })
    }
}

fn compose_setup_description(config_file: Option<&str>) -> String {
    let mut text = String::from(
        "You need to pseudo-enable logs in your postgresql-server configuration file.\n",
    );
    match config_file {
        Some(file) => text.push_str(&format!("\t- {}\n", file)),
        None => text.push_str("\t- (locate it with: ps aux | grep postgres)\n"),
    }
    text.push_str(
        "\nAdd the following parameters:\n\
         # Pre-enable logs\n\
         logging_collector=on\n\
         log_destination='stderr'\n\
         log_directory='/var/log/postgresql'\n\
         log_filename='postgresql.log'\n\
         log_rotation_age=0\n\
         log_checkpoints=on\n\
         log_hostname=on\n\
         log_line_prefix='%t [%p]: [%l-1] db=%d,user=%u '\n\
         log_connections=on\n\
         log_disconnections=on\n\
         lc_messages='C'\n\
         log_timezone='UTC'\n\
         \n\
         Reload configuration using the following query:\n \
         - select pg_reload_conf()\n\
         Or restart the postgresql server service.\n\n",
    );
    text.push_str(
        "If the database user is a superuser, the session-level parameters \
         are applied automatically while a capture runs. Otherwise export \
         them before starting the server:\n",
    );
    text.push_str(&format!("export PGOPTIONS=\"{}\"\n", pg_options_env()));
    text
}

#[async_trait]
impl QueryLogControl for PoolReconfigurator {
    fn externally_configured(&self) -> bool {
        self.preconfigured.load(Ordering::SeqCst)
    }

    #[instrument(skip(self))]
    async fn apply(&self, enable: bool) -> Result<()> {
        if self.externally_configured() {
            info!("using postgresql.conf or PGOPTIONS predefined");
            return Ok(());
        }
        let params = if enable {
            Self::target_parameters()
        } else {
            self.restore_parameters()
        };
        let mut connections = self.idle_connections();
        info!(
            connections = connections.len(),
            enable, "reconfiguring pooled connections"
        );
        apply_parameters(&mut connections, &params).await
    }
}
