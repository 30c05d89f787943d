//! Filtered search over the media catalog.
//!
//! [`SearchOptions`] compiles to a `WHERE` clause whose predicates are joined
//! with `AND`. User input only ever reaches SQLite as bound parameters; the
//! ordering column comes from the closed [`SortField`] set.

use crate::models::MediaType;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteArguments;
use sqlx::{query::QueryAs, query::QueryScalar, Sqlite};

/// Columns a search may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
    Size,
    Duration,
    Artist,
    Album,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Name => "name",
            SortField::Size => "size",
            SortField::Duration => "duration",
            SortField::Artist => "artist",
            SortField::Album => "album",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Optional filters; every populated field narrows the result.
///
/// Ranges are inclusive on both ends. The date range applies to `created_at`
/// in unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Substring of name, artist or album
    pub keyword: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub media_type: Option<MediaType>,
    pub duration_range: Option<(f64, f64)>,
    pub size_range: Option<(i64, i64)>,
    pub date_range: Option<(i64, i64)>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub order_by: Option<SortField>,
    pub direction: Option<SortDirection>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    pub fn duration_between(mut self, min: f64, max: f64) -> Self {
        self.duration_range = Some((min, max));
        self
    }

    pub fn size_between(mut self, min: i64, max: i64) -> Self {
        self.size_range = Some((min, max));
        self
    }

    pub fn created_between(mut self, from: i64, to: i64) -> Self {
        self.date_range = Some((from, to));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.order_by = Some(field);
        self.direction = Some(direction);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Text(String),
    I64(i64),
    F64(f64),
}

/// Compiled `WHERE` clause and its parameters, in placeholder order.
#[derive(Debug, Clone, Default)]
pub(crate) struct MediaFilter {
    conditions: Vec<String>,
    binds: Vec<BindValue>,
}

impl MediaFilter {
    pub(crate) fn from_options(options: &SearchOptions) -> Self {
        let mut filter = Self::default();

        if let Some(keyword) = options.keyword.as_deref().map(str::trim) {
            if !keyword.is_empty() {
                let pattern = format!("%{}%", escape_like(keyword));
                filter.conditions.push(
                    "(name LIKE ? ESCAPE '\\' OR artist LIKE ? ESCAPE '\\' OR album LIKE ? ESCAPE '\\')"
                        .to_string(),
                );
                for _ in 0..3 {
                    filter.binds.push(BindValue::Text(pattern.clone()));
                }
            }
        }

        if let Some(artist) = &options.artist {
            filter.conditions.push("artist = ?".to_string());
            filter.binds.push(BindValue::Text(artist.clone()));
        }

        if let Some(album) = &options.album {
            filter.conditions.push("album = ?".to_string());
            filter.binds.push(BindValue::Text(album.clone()));
        }

        if let Some(media_type) = options.media_type {
            let extensions = media_type.extensions();
            let placeholders = vec!["?"; extensions.len()].join(", ");
            filter
                .conditions
                .push(format!("LOWER(suffix) IN ({})", placeholders));
            filter
                .binds
                .extend(extensions.iter().map(|ext| BindValue::Text(ext.to_string())));
        }

        if let Some((min, max)) = options.duration_range {
            filter.conditions.push("duration BETWEEN ? AND ?".to_string());
            filter.binds.push(BindValue::F64(min));
            filter.binds.push(BindValue::F64(max));
        }

        if let Some((min, max)) = options.size_range {
            filter.conditions.push("size BETWEEN ? AND ?".to_string());
            filter.binds.push(BindValue::I64(min));
            filter.binds.push(BindValue::I64(max));
        }

        if let Some((from, to)) = options.date_range {
            filter.conditions.push("created_at BETWEEN ? AND ?".to_string());
            filter.binds.push(BindValue::I64(from));
            filter.binds.push(BindValue::I64(to));
        }

        filter
    }

    pub(crate) fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub(crate) fn bind_as<'q, T>(
        &self,
        mut query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    ) -> QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
        for value in &self.binds {
            query = match value.clone() {
                BindValue::Text(v) => query.bind(v),
                BindValue::I64(v) => query.bind(v),
                BindValue::F64(v) => query.bind(v),
            };
        }
        query
    }

    pub(crate) fn bind_scalar<'q, O>(
        &self,
        mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
        for value in &self.binds {
            query = match value.clone() {
                BindValue::Text(v) => query.bind(v),
                BindValue::I64(v) => query.bind(v),
                BindValue::F64(v) => query.bind(v),
            };
        }
        query
    }

    #[cfg(test)]
    pub(crate) fn binds(&self) -> &[BindValue] {
        &self.binds
    }
}

/// `ORDER BY` for a search, newest first unless asked otherwise. `id` breaks
/// ties so paging is stable.
pub(crate) fn order_clause(options: &SearchOptions) -> String {
    let field = options.order_by.unwrap_or_default();
    let direction = options.direction.unwrap_or_default();
    format!(
        " ORDER BY {} {}, id {}",
        field.column(),
        direction.keyword(),
        direction.keyword()
    )
}

/// `LIMIT`/`OFFSET` suffix. SQLite needs a `LIMIT` before `OFFSET`.
pub(crate) fn limit_clause(limit: Option<u32>, offset: Option<u64>) -> String {
    match (limit, offset) {
        (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => format!(" LIMIT {}", limit),
        (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
        (None, None) => String::new(),
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_options_have_no_where_clause() {
        let filter = MediaFilter::from_options(&SearchOptions::new());
        assert_eq!(filter.where_clause(), "");
        assert!(filter.binds().is_empty());
    }

    #[test]
    fn test_filters_are_joined_with_and() {
        let options = SearchOptions::new()
            .keyword("love")
            .artist("X")
            .size_between(10, 20);
        let filter = MediaFilter::from_options(&options);

        assert_eq!(
            filter.where_clause(),
            " WHERE (name LIKE ? ESCAPE '\\' OR artist LIKE ? ESCAPE '\\' OR album LIKE ? ESCAPE '\\') \
             AND artist = ? AND size BETWEEN ? AND ?"
        );
        assert_eq!(filter.binds().len(), 6);
        assert_eq!(filter.binds()[0], BindValue::Text("%love%".into()));
        assert_eq!(filter.binds()[3], BindValue::Text("X".into()));
    }

    #[test]
    fn test_keyword_wildcards_are_escaped() {
        let filter = MediaFilter::from_options(&SearchOptions::new().keyword("100%_mix"));
        assert_eq!(filter.binds()[0], BindValue::Text("%100\\%\\_mix%".into()));
    }

    #[test]
    fn test_blank_keyword_is_ignored() {
        let filter = MediaFilter::from_options(&SearchOptions::new().keyword("   "));
        assert_eq!(filter.where_clause(), "");
    }

    #[test]
    fn test_media_type_binds_every_extension() {
        let filter = MediaFilter::from_options(&SearchOptions::new().media_type(MediaType::Video));
        assert_eq!(
            filter.binds().len(),
            crate::models::VIDEO_EXTENSIONS.len()
        );
        assert!(filter.where_clause().starts_with(" WHERE LOWER(suffix) IN (?, ?"));
    }

    #[test]
    fn test_order_and_limit_clauses() {
        assert_eq!(
            order_clause(&SearchOptions::new()),
            " ORDER BY created_at DESC, id DESC"
        );
        assert_eq!(
            order_clause(&SearchOptions::new().order_by(SortField::Name, SortDirection::Asc)),
            " ORDER BY name ASC, id ASC"
        );
        assert_eq!(limit_clause(Some(10), Some(20)), " LIMIT 10 OFFSET 20");
        assert_eq!(limit_clause(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(limit_clause(None, None), "");
    }
}
