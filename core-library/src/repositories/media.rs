//! Media file repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{BatchResult, FormatStat, MediaFile, MediaFileUpdate, NewMediaFile, UNKNOWN};
use crate::query::{limit_clause, order_clause, MediaFilter, SearchOptions};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, instrument, warn};

/// SQLite caps bound parameters per statement; stay well below it.
const DELETE_CHUNK: usize = 500;

const UPSERT_SQL: &str = r#"
INSERT INTO media_files (
    url, name, suffix, size, file_hash, duration, artist, album,
    quality, resolution, picture, lyrics, created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(url) DO UPDATE SET
    name = excluded.name,
    suffix = excluded.suffix,
    size = excluded.size,
    file_hash = excluded.file_hash,
    duration = excluded.duration,
    artist = excluded.artist,
    album = excluded.album,
    quality = excluded.quality,
    resolution = excluded.resolution,
    picture = excluded.picture,
    lyrics = excluded.lyrics,
    updated_at = excluded.updated_at
"#;

/// Media file repository interface
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Insert or update every record in one transaction.
    ///
    /// A conflicting `url` updates all mutable columns and keeps `id` and
    /// `created_at`. Rows that fail validation or the insert are counted in
    /// the result; the remaining rows still commit.
    async fn upsert_batch(&self, files: &[NewMediaFile]) -> Result<BatchResult>;

    async fn find_by_url(&self, url: &str) -> Result<Option<MediaFile>>;

    /// All records sharing a sampled content hash.
    async fn find_by_hash(&self, hash: &str) -> Result<Vec<MediaFile>>;

    /// Apply a partial update.
    ///
    /// # Errors
    /// `NotFound` if no record has this `url`, `InvalidInput` for an empty update.
    async fn update(&self, url: &str, update: &MediaFileUpdate) -> Result<MediaFile>;

    /// Returns `true` if a record was removed.
    async fn delete_by_url(&self, url: &str) -> Result<bool>;

    /// URLs whose backing file no longer exists.
    async fn find_missing_urls(&self) -> Result<Vec<String>>;

    /// Remove records whose backing file no longer exists.
    async fn delete_where_missing(&self) -> Result<u64>;

    async fn query(&self, options: &SearchOptions) -> Result<Vec<MediaFile>>;

    /// Page through a search. `limit` and `offset` in `options` are ignored.
    async fn query_page(&self, options: &SearchOptions, page: PageRequest)
        -> Result<Page<MediaFile>>;

    /// Number of records matching the filters.
    async fn count(&self, options: &SearchOptions) -> Result<u64>;

    /// Artists other than the unknown placeholder, sorted.
    async fn distinct_artists(&self) -> Result<Vec<String>>;

    /// Albums other than the unknown placeholder, sorted.
    async fn distinct_albums(&self) -> Result<Vec<String>>;

    /// Count and size per extension, most common first.
    async fn format_stats(&self) -> Result<Vec<FormatStat>>;
}

/// SQLite implementation of [`MediaRepository`]
pub struct SqliteMediaRepository {
    pool: SqlitePool,
}

impl SqliteMediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaRepository for SqliteMediaRepository {
    #[instrument(skip(self, files), fields(count = files.len()))]
    async fn upsert_batch(&self, files: &[NewMediaFile]) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if files.is_empty() {
            return Ok(result);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for file in files {
            if let Err(e) = file.validate() {
                result.failed += 1;
                result.errors.push(e.to_string());
                continue;
            }

            let outcome = sqlx::query(UPSERT_SQL)
                .bind(&file.url)
                .bind(&file.name)
                .bind(&file.suffix)
                .bind(file.size)
                .bind(&file.file_hash)
                .bind(file.duration)
                .bind(&file.artist)
                .bind(&file.album)
                .bind(&file.quality)
                .bind(&file.resolution)
                .bind(&file.picture)
                .bind(&file.lyrics)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await;

            match outcome {
                Ok(_) => result.success += 1,
                Err(e) => {
                    warn!(url = %file.url, error = %e, "Failed to upsert media file");
                    result.failed += 1;
                    result.errors.push(format!("{}: {}", file.url, e));
                }
            }
        }

        tx.commit().await?;

        debug!(
            success = result.success,
            failed = result.failed,
            "Media batch upserted"
        );
        Ok(result)
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<MediaFile>> {
        let file = sqlx::query_as::<_, MediaFile>("SELECT * FROM media_files WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Vec<MediaFile>> {
        let files = sqlx::query_as::<_, MediaFile>(
            "SELECT * FROM media_files WHERE file_hash = ? ORDER BY id",
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    async fn update(&self, url: &str, update: &MediaFileUpdate) -> Result<MediaFile> {
        if update.is_empty() {
            return Err(LibraryError::invalid("update", "no fields to update"));
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE media_files SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(name) = &update.name {
                set.push("name = ").push_bind_unseparated(name);
            }
            if let Some(artist) = &update.artist {
                set.push("artist = ").push_bind_unseparated(artist);
            }
            if let Some(album) = &update.album {
                set.push("album = ").push_bind_unseparated(album);
            }
            if let Some(quality) = &update.quality {
                set.push("quality = ").push_bind_unseparated(quality);
            }
            if let Some(resolution) = &update.resolution {
                set.push("resolution = ").push_bind_unseparated(resolution);
            }
            if let Some(picture) = &update.picture {
                set.push("picture = ").push_bind_unseparated(picture);
            }
            if let Some(lyrics) = &update.lyrics {
                set.push("lyrics = ").push_bind_unseparated(lyrics);
            }
            if let Some(duration) = update.duration {
                set.push("duration = ").push_bind_unseparated(duration);
            }
            set.push("updated_at = ")
                .push_bind_unseparated(Utc::now().timestamp());
        }
        builder.push(" WHERE url = ").push_bind(url);

        let affected = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(LibraryError::from_write)?
            .rows_affected();

        if affected == 0 {
            return Err(LibraryError::not_found("MediaFile", url));
        }

        self.find_by_url(url)
            .await?
            .ok_or_else(|| LibraryError::not_found("MediaFile", url))
    }

    async fn delete_by_url(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_files WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_missing_urls(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM media_files")
            .fetch_all(&self.pool)
            .await?;

        let mut missing = Vec::new();
        for url in urls {
            // Permission errors count as present; only a definite miss deletes.
            if let Ok(false) = tokio::fs::try_exists(&url).await {
                missing.push(url);
            }
        }
        Ok(missing)
    }

    #[instrument(skip(self))]
    async fn delete_where_missing(&self) -> Result<u64> {
        let missing = self.find_missing_urls().await?;
        if missing.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        let removed = delete_urls(&mut conn, &missing).await?;
        debug!(removed, "Removed records for missing files");
        Ok(removed)
    }

    async fn query(&self, options: &SearchOptions) -> Result<Vec<MediaFile>> {
        let filter = MediaFilter::from_options(options);
        let sql = format!(
            "SELECT * FROM media_files{}{}{}",
            filter.where_clause(),
            order_clause(options),
            limit_clause(options.limit, options.offset)
        );

        let files = filter
            .bind_as(sqlx::query_as::<_, MediaFile>(&sql))
            .fetch_all(&self.pool)
            .await?;
        Ok(files)
    }

    async fn query_page(
        &self,
        options: &SearchOptions,
        page: PageRequest,
    ) -> Result<Page<MediaFile>> {
        let total = self.count(options).await?;

        let filter = MediaFilter::from_options(options);
        let sql = format!(
            "SELECT * FROM media_files{}{}{}",
            filter.where_clause(),
            order_clause(options),
            limit_clause(Some(page.limit()), Some(page.offset()))
        );

        let items = filter
            .bind_as(sqlx::query_as::<_, MediaFile>(&sql))
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    async fn count(&self, options: &SearchOptions) -> Result<u64> {
        let filter = MediaFilter::from_options(options);
        let sql = format!("SELECT COUNT(*) FROM media_files{}", filter.where_clause());

        let count: i64 = filter
            .bind_scalar(sqlx::query_scalar(&sql))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn distinct_artists(&self) -> Result<Vec<String>> {
        let artists = sqlx::query_scalar(
            "SELECT DISTINCT artist FROM media_files WHERE artist != ? AND artist != '' ORDER BY artist",
        )
        .bind(UNKNOWN)
        .fetch_all(&self.pool)
        .await?;
        Ok(artists)
    }

    async fn distinct_albums(&self) -> Result<Vec<String>> {
        let albums = sqlx::query_scalar(
            "SELECT DISTINCT album FROM media_files WHERE album != ? AND album != '' ORDER BY album",
        )
        .bind(UNKNOWN)
        .fetch_all(&self.pool)
        .await?;
        Ok(albums)
    }

    async fn format_stats(&self) -> Result<Vec<FormatStat>> {
        let stats = sqlx::query_as::<_, FormatStat>(
            "SELECT LOWER(suffix) AS suffix, COUNT(*) AS count, COALESCE(SUM(size), 0) AS total_size \
             FROM media_files GROUP BY LOWER(suffix) ORDER BY count DESC, suffix",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }
}

/// Delete the given URLs on an open connection or transaction.
pub async fn delete_urls(conn: &mut SqliteConnection, urls: &[String]) -> Result<u64> {
    let mut removed = 0;
    for chunk in urls.chunks(DELETE_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM media_files WHERE url IN (");
        {
            let mut list = builder.separated(", ");
            for url in chunk {
                list.push_bind(url);
            }
        }
        builder.push(")");
        removed += builder.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}
