//! Category repository trait and implementation

use crate::error::Result;
use crate::models::{MediaCategory, NewMediaCategory};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

/// Category repository interface
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Insert or touch the `(year, month, day, prepose)` bucket and return its id.
    ///
    /// An existing picture is only replaced by a non-null one.
    async fn upsert(&self, category: &NewMediaCategory) -> Result<i64>;

    /// All categories, most recent date first.
    async fn list(&self) -> Result<Vec<MediaCategory>>;

    /// Remove categories whose cover no media record references.
    async fn delete_unused(&self) -> Result<u64>;
}

/// SQLite implementation of [`CategoryRepository`]
pub struct SqliteCategoryRepository {
    pool: SqlitePool,
}

impl SqliteCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn upsert(&self, category: &NewMediaCategory) -> Result<i64> {
        category.validate()?;
        let now = Utc::now().timestamp();

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO media_categories (year, month, day, prepose, picture, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(year, month, day, prepose) DO UPDATE SET
                picture = COALESCE(excluded.picture, media_categories.picture),
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&category.year)
        .bind(&category.month)
        .bind(&category.day)
        .bind(&category.prepose)
        .bind(&category.picture)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list(&self) -> Result<Vec<MediaCategory>> {
        let categories = sqlx::query_as::<_, MediaCategory>(
            "SELECT * FROM media_categories ORDER BY year DESC, month DESC, day DESC, prepose",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn delete_unused(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        delete_unused_categories(&mut conn).await
    }
}

/// Delete categories without a cover, or whose cover is not the picture of
/// any media record. Categories sharing a referenced cover are all kept.
pub async fn delete_unused_categories(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM media_categories
        WHERE picture IS NULL
           OR picture = ''
           OR NOT EXISTS (
               SELECT 1 FROM media_files mf WHERE mf.picture = media_categories.picture
           )
        "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
