use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Error as SqlxError,
};
use std::time::Duration;

/// The schema (sources, news, parsing_logs) is owned by the admin tooling;
/// the pipeline only needs a bounded pool against an existing database.
pub async fn setup_database(url: &str) -> Result<PgPool, SqlxError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    Ok(pool)
}
