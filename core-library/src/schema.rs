//! Base schema, created on first connect.
//!
//! Every statement is `IF NOT EXISTS`, so running it against an existing
//! database is a no-op. Structural changes to an existing database go through
//! [`crate::migrations`].

use crate::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

/// Tables that must exist for the catalog to be usable.
pub const REQUIRED_TABLES: [&str; 5] = [
    "media_files",
    "media_categories",
    "settings",
    "schema_version",
    "database_stats",
];

/// Column list of `media_files`, shared by table rebuilds.
pub(crate) const MEDIA_FILE_COLUMNS: &str = "id, url, name, suffix, size, file_hash, duration, \
     artist, album, quality, resolution, picture, lyrics, created_at, updated_at";

pub(crate) const MEDIA_FILE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_media_files_hash ON media_files(file_hash);
CREATE INDEX IF NOT EXISTS idx_media_files_artist ON media_files(artist);
CREATE INDEX IF NOT EXISTS idx_media_files_album ON media_files(album);
CREATE INDEX IF NOT EXISTS idx_media_files_suffix ON media_files(suffix);
CREATE INDEX IF NOT EXISTS idx_media_files_created_at ON media_files(created_at);
CREATE INDEX IF NOT EXISTS idx_media_files_picture ON media_files(picture);
"#;

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    year TEXT NOT NULL,
    month TEXT NOT NULL,
    day TEXT NOT NULL,
    prepose TEXT NOT NULL,
    picture TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (year, month, day, prepose)
);

CREATE INDEX IF NOT EXISTS idx_media_categories_date ON media_categories(year, month, day);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'string'
        CHECK (type IN ('string', 'number', 'boolean', 'object')),
    description TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS database_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    total_files INTEGER NOT NULL DEFAULT 0,
    total_size INTEGER NOT NULL DEFAULT 0,
    music_files INTEGER NOT NULL DEFAULT 0,
    video_files INTEGER NOT NULL DEFAULT 0,
    categories INTEGER NOT NULL DEFAULT 0,
    settings INTEGER NOT NULL DEFAULT 0,
    last_scanned INTEGER,
    updated_at INTEGER NOT NULL
);
"#;

/// `CREATE TABLE` for the media table under `name`.
///
/// `unique_hash` restores the original constraint that allowed only one file
/// per content hash.
pub(crate) fn media_files_table(name: &str, unique_hash: bool) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    suffix TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0 CHECK (size >= 0),
    file_hash TEXT{hash_constraint},
    duration REAL NOT NULL DEFAULT 0,
    artist TEXT NOT NULL DEFAULT 'unknown',
    album TEXT NOT NULL DEFAULT 'unknown',
    quality TEXT NOT NULL DEFAULT 'unknown',
    resolution TEXT,
    picture TEXT,
    lyrics TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
        name = name,
        hash_constraint = if unique_hash { " UNIQUE" } else { "" },
    )
}

/// Create any missing tables and indexes.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;
    execute_script(&mut conn, &media_files_table("media_files", false)).await?;
    execute_script(&mut conn, BASE_SCHEMA).await?;
    execute_script(&mut conn, MEDIA_FILE_INDEXES).await?;
    debug!("Base schema ensured");
    Ok(())
}

/// Run each `;`-separated statement of `script` in order on one connection.
///
/// Scripts are plain DDL; a `;` inside a string literal is not supported.
pub(crate) async fn execute_script(conn: &mut SqliteConnection, script: &str) -> Result<()> {
    for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Names of the [`REQUIRED_TABLES`] absent from the database.
pub async fn missing_tables<'e, E>(executor: E) -> Result<Vec<String>>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let present: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(executor)
            .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|name| name == *table))
        .map(|table| table.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, DatabaseConfig};

    #[tokio::test]
    async fn test_ensure_schema_is_repeatable() {
        let pool = create_pool(&DatabaseConfig::in_memory()).await.unwrap();
        assert_eq!(missing_tables(&pool).await.unwrap().len(), REQUIRED_TABLES.len());

        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        assert!(missing_tables(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_hash_is_not_unique() {
        let pool = create_pool(&DatabaseConfig::in_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        for url in ["/a.mp3", "/b.mp3"] {
            sqlx::query(
                "INSERT INTO media_files (url, name, suffix, file_hash, created_at, updated_at) \
                 VALUES (?, 'x', '.mp3', 'same', 0, 0)",
            )
            .bind(url)
            .execute(&pool)
            .await
            .unwrap();
        }
    }
}
