use sqlx::any::{install_default_drivers, AnyConnectOptions};
use sqlx::{Any, AnyConnection, Connection, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::schema::{Dialect, EvolveError};

/// Open the single connection a migration run works on.
pub async fn connect(settings: &Settings) -> Result<AnyConnection, EvolveError> {
    let conn = connect_url(
        &settings.database.connection_string(),
        settings.migrate.connect_timeout(),
    )
    .await?;

    info!(
        "✅ Connected to {} at {}",
        settings.database.dialect,
        settings.database.redacted_url()
    );
    Ok(conn)
}

/// Connect to `url` through the `Any` driver, giving up after `timeout`.
///
/// Every failure here, including a malformed URL, is reported as a
/// connection error.
pub async fn connect_url(url: &str, timeout: Duration) -> Result<AnyConnection, EvolveError> {
    install_default_drivers();

    let options = AnyConnectOptions::from_str(url).map_err(EvolveError::Connection)?;
    match tokio::time::timeout(timeout, AnyConnection::connect_with(&options)).await {
        Ok(result) => result.map_err(EvolveError::Connection),
        Err(_) => Err(EvolveError::ConnectTimeout(timeout)),
    }
}

/// Round-trip a trivial query to confirm the connection is usable.
pub async fn ping(conn: &mut AnyConnection) -> Result<Dialect, EvolveError> {
    let dialect = Dialect::of(conn)?;
    sqlx::query("SELECT 1")
        .execute(&mut *conn)
        .await
        .map_err(|e| EvolveError::from_sqlx(e, "SELECT 1", &[]))?;
    Ok(dialect)
}

/// Commit `tx` if `outcome` succeeded, roll it back otherwise.
pub async fn finish<R, E>(tx: Transaction<'_, Any>, outcome: Result<R, E>) -> Result<R, E>
where
    E: From<EvolveError>,
{
    match outcome {
        Ok(result) => {
            tx.commit()
                .await
                .map_err(|e| EvolveError::from_sqlx(e, "COMMIT", &[]))?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}
