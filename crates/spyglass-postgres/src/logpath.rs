//! Server log-file discovery
//!
//! Asks the server where it writes its log. `SHOW log_directory` needs no
//! special privilege on modern servers, but a denial means the operator
//! will have to configure the path by hand — so that case is `Ok(None)`,
//! not an error.

use std::path::PathBuf;

use sqlx::postgres::PgPool;
use tracing::debug;

use spyglass_common::Result;

/// Discover the server's log file path, when the server exposes it.
///
/// Relative `log_directory` values are resolved against `data_directory`.
pub async fn discover_log_path(pool: &PgPool) -> Result<Option<PathBuf>> {
    let log_directory: String = match sqlx::query_scalar("SHOW log_directory")
        .fetch_one(pool)
        .await
    {
        Ok(value) => value,
        Err(err) => {
            debug!("log_directory not readable: {}", err);
            return Ok(None);
        }
    };
    let log_filename: String = sqlx::query_scalar("SHOW log_filename")
        .fetch_one(pool)
        .await?;

    let mut path = PathBuf::from(log_directory);
    path.push(log_filename);
    if !path.is_absolute() {
        let data_directory: String = sqlx::query_scalar("SHOW data_directory")
            .fetch_one(pool)
            .await?;
        let mut absolute = PathBuf::from(data_directory);
        absolute.push(path);
        path = absolute;
    }
    Ok(Some(path))
}
