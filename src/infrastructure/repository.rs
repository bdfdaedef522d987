use crate::domain::models::{News, ParseStatus, Source};
use chrono::Utc;
use sqlx::{Error as SqlxError, PgPool};

/// All active sources. Interval eligibility is decided in process via
/// [`Source::is_due`], so the rule lives in one testable place.
pub async fn get_active_sources(pool: &PgPool) -> Result<Vec<Source>, SqlxError> {
    let sources = sqlx::query_as::<_, Source>(
        r#"
        SELECT id, name, domain, feed_url, website_url, country_id, language,
               is_active, last_parsed_at, parse_interval_minutes, created_at, updated_at
        FROM sources
        WHERE is_active = TRUE
        ORDER BY last_parsed_at NULLS FIRST
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(sources)
}

/// Dedup lookup on the `(source_id, url)` key.
pub async fn news_exists(pool: &PgPool, source_id: i32, url: &str) -> Result<bool, SqlxError> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(SELECT 1 FROM news WHERE source_id = $1 AND url = $2)
        "#,
    )
    .bind(source_id)
    .bind(url)
    .fetch_one(pool)
    .await?;

    Ok(exists.0)
}

/// Persist a batch in one transaction. Rows colliding on the unique
/// `(source_id, url)` key are treated as already present and skipped; any
/// other failure rolls the whole batch back. Returns the number of genuine
/// inserts; each inserted record gets its generated id assigned back.
pub async fn create_news_batch(
    pool: &PgPool,
    batch: &mut [News],
) -> Result<usize, SqlxError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for news in batch.iter_mut() {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO news
                (title, description, content, url, image_url, author, source_id,
                 category_id, published_at, parsed_at, relevance_score,
                 view_count, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, TRUE, NOW(), NOW())
            ON CONFLICT (source_id, url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&news.title)
        .bind(&news.description)
        .bind(&news.content)
        .bind(&news.url)
        .bind(&news.image_url)
        .bind(&news.author)
        .bind(news.source_id)
        .bind(news.category_id)
        .bind(news.published_at)
        .bind(news.parsed_at)
        .bind(news.relevance_score)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = id {
            news.id = Some(id);
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn insert_parsing_log(
    pool: &PgPool,
    source_id: i32,
    status: ParseStatus,
    news_count: i32,
    error_message: Option<&str>,
    execution_time_ms: i64,
) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        INSERT INTO parsing_logs (source_id, status, news_count, error_message, execution_time_ms, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(source_id)
    .bind(status.as_str())
    .bind(news_count)
    .bind(error_message)
    .bind(execution_time_ms)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit-log wrapper: recording failures are warned about and swallowed,
/// they never fail the tick that produced them.
pub async fn record_parsing_log(
    pool: &PgPool,
    source_id: i32,
    status: ParseStatus,
    news_count: i32,
    error_message: Option<&str>,
    execution_time_ms: i64,
) {
    if let Err(e) = insert_parsing_log(
        pool,
        source_id,
        status,
        news_count,
        error_message,
        execution_time_ms,
    )
    .await
    {
        tracing::warn!(source_id, error = %e, "failed to write parsing log");
    }
}

/// Bump `last_parsed_at` after a successful run. The only write the
/// pipeline performs on `sources`.
pub async fn touch_source_parsed(pool: &PgPool, source_id: i32) -> Result<(), SqlxError> {
    sqlx::query(
        r#"
        UPDATE sources
        SET last_parsed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(())
}
