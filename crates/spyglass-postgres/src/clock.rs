//! Server-side clock
//!
//! Session windows are stamped with the database server's clock, expressed
//! in the server's `log_timezone`, so that the `[start, end]` window handed
//! to the log analyzer lines up with the timestamps the server writes into
//! its log file.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgPool;

use spyglass::backend::ServerClock;
use spyglass_common::{Result, SpyglassError};

/// Clock backed by the PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PgServerClock {
    pool: PgPool,
}

impl PgServerClock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerClock for PgServerClock {
    async fn now_utc(&self) -> Result<DateTime<Utc>> {
        let zone: String = sqlx::query_scalar("SHOW log_timezone")
            .fetch_one(&self.pool)
            .await?;
        let now: String = sqlx::query_scalar(
            "SELECT to_char(current_timestamp AT TIME ZONE $1, 'YYYY-MM-DD HH24:MI:SS')",
        )
        .bind(&zone)
        .fetch_one(&self.pool)
        .await?;
        let naive = NaiveDateTime::parse_from_str(&now, "%Y-%m-%d %H:%M:%S")
            .map_err(|err| SpyglassError::Database(format!("unparseable server time: {}", err)))?;
        Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
    }
}
