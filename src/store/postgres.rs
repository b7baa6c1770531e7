//! PostgreSQL-backed store
//!
//! Source tables belong to the main application schema, so their shape is not
//! guaranteed. Each fetch selects only the expected columns that actually
//! exist; an absent column surfaces later as `MissingColumn` when a consumer
//! asks for it, instead of failing the query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

use super::{
    Cell, CommitSummary, DataSource, EntityKind, FeedBatch, FeedSink, StagedItem, Table,
};
use crate::error::{Error, Result};
use ColumnType::{Bool, Float, Int, Interval, Json, Text, Timestamp};

/// Rows per bulk `UNNEST` statement
const BULK_CHUNK_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
    Interval,
    Timestamp,
    Json,
}

impl ColumnType {
    fn cast(&self) -> &'static str {
        match self {
            ColumnType::Int => "int8",
            ColumnType::Float => "float8",
            ColumnType::Bool => "bool",
            ColumnType::Text => "text",
            ColumnType::Interval => "interval",
            ColumnType::Timestamp => "timestamptz",
            ColumnType::Json => "jsonb",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnSpec {
    name: &'static str,
    ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnSpec {
    ColumnSpec { name, ty }
}

impl ColumnSpec {
    fn select_expr(&self) -> String {
        format!("\"{0}\"::{1} AS \"{0}\"", self.name, self.ty.cast())
    }
}

struct TableSpec {
    table: &'static str,
    columns: &'static [ColumnSpec],
    order_by: &'static str,
}

const ACTIVITY_COLUMNS: &[ColumnSpec] = &[
    col("id", Int),
    col("user_id", Int),
    col("target_id", Int),
    col("primary_text", Text),
    col("activity_type", Text),
    col("target_type", Text),
    col("timestamp", Timestamp),
];

const COMMENTS_COLUMNS: &[ColumnSpec] = &[
    col("id", Int),
    col("user_id", Int),
    col("game_id", Int),
    col("parent_comment_id", Int),
    col("created_at", Timestamp),
];

const FAVORITES_COLUMNS: &[ColumnSpec] = &[
    col("id", Int),
    col("user_id", Int),
    col("game_id", Int),
    col("timestamp", Timestamp),
];

const FOLLOWS_COLUMNS: &[ColumnSpec] = &[
    col("follow_id", Int),
    col("follower_id", Int),
    col("following_id", Int),
    col("timestamp", Timestamp),
];

const GAME_SESSION_COLUMNS: &[ColumnSpec] = &[
    col("game_session_id", Int),
    col("user_id", Int),
    col("game_id", Int),
    col("session_total_time", Interval),
    col("session_total_score", Int),
    col("created_at", Timestamp),
];

const PLAYLIST_SESSION_COLUMNS: &[ColumnSpec] = &[
    col("session_id", Int),
    col("user_id", Int),
    col("playlist_id", Int),
    col("completed", Bool),
    col("created_at", Timestamp),
    col("updated_at", Timestamp),
];

const PLAYLIST_USER_ACTIVITY_COLUMNS: &[ColumnSpec] = &[
    col("playlist_user_activity_id", Int),
    col("playlist_session_id", Int),
    col("action", Text),
    col("created_at", Timestamp),
];

const USERS_COLUMNS: &[ColumnSpec] = &[col("id", Int), col("username", Text)];

const DYNAMIC_ITEM_COLUMNS: &[ColumnSpec] = &[
    col("item_id", Int),
    col("item_type", Text),
    col("content", Json),
    col("created_at", Timestamp),
];

const DYNAMIC_ITEM_PRIORITY_COLUMNS: &[ColumnSpec] = &[
    col("item_id", Int),
    col("user_id", Int),
    col("priority_score", Float),
];

const DYNAMIC_USER_FEED_COLUMNS: &[ColumnSpec] = &[
    col("user_id", Int),
    col("item_id", Int),
    col("feed_position", Int),
    col("feed_timestamp", Timestamp),
];

fn table_spec(kind: EntityKind) -> TableSpec {
    match kind {
        EntityKind::Activity => TableSpec {
            table: "activity",
            columns: ACTIVITY_COLUMNS,
            order_by: "id",
        },
        EntityKind::Comment => TableSpec {
            table: "comments",
            columns: COMMENTS_COLUMNS,
            order_by: "id",
        },
        EntityKind::Favorite => TableSpec {
            table: "favorites",
            columns: FAVORITES_COLUMNS,
            order_by: "id",
        },
        EntityKind::Follow => TableSpec {
            table: "follows",
            columns: FOLLOWS_COLUMNS,
            order_by: "follow_id",
        },
        EntityKind::GameSession => TableSpec {
            table: "game_session",
            columns: GAME_SESSION_COLUMNS,
            order_by: "game_session_id",
        },
        EntityKind::PlaylistSession => TableSpec {
            table: "playlist_session",
            columns: PLAYLIST_SESSION_COLUMNS,
            order_by: "session_id",
        },
        EntityKind::PlaylistUserActivity => TableSpec {
            table: "playlist_user_activity",
            columns: PLAYLIST_USER_ACTIVITY_COLUMNS,
            order_by: "playlist_user_activity_id",
        },
        EntityKind::User => TableSpec {
            table: "users",
            columns: USERS_COLUMNS,
            order_by: "id",
        },
        EntityKind::DynamicItem => TableSpec {
            table: "dynamic_item",
            columns: DYNAMIC_ITEM_COLUMNS,
            order_by: "item_id",
        },
        EntityKind::DynamicItemPriority => TableSpec {
            table: "dynamic_item_priority",
            columns: DYNAMIC_ITEM_PRIORITY_COLUMNS,
            order_by: "user_id, item_id",
        },
        EntityKind::DynamicUserFeed => TableSpec {
            table: "dynamic_user_feed",
            columns: DYNAMIC_USER_FEED_COLUMNS,
            order_by: "user_id, feed_timestamp, feed_position",
        },
    }
}

/// Convert a Postgres interval to a duration, counting a month as 30 days
pub fn interval_to_duration(interval: &PgInterval) -> chrono::Duration {
    let days = i64::from(interval.months) * 30 + i64::from(interval.days);
    chrono::Duration::days(days) + chrono::Duration::microseconds(interval.microseconds)
}

fn decode_cell(row: &PgRow, index: usize, ty: ColumnType) -> Result<Cell> {
    let cell = match ty {
        ColumnType::Int => Cell::from(row.try_get::<Option<i64>, _>(index)?),
        ColumnType::Float => Cell::from(row.try_get::<Option<f64>, _>(index)?),
        ColumnType::Bool => Cell::from(row.try_get::<Option<bool>, _>(index)?),
        ColumnType::Text => Cell::from(row.try_get::<Option<String>, _>(index)?),
        ColumnType::Interval => Cell::from(
            row.try_get::<Option<PgInterval>, _>(index)?
                .map(|i| interval_to_duration(&i)),
        ),
        ColumnType::Timestamp => Cell::from(row.try_get::<Option<DateTime<Utc>>, _>(index)?),
        ColumnType::Json => Cell::from(row.try_get::<Option<Value>, _>(index)?),
    };
    Ok(cell)
}

fn db_error(message: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database {
        message: format!("{}: {}", message, e).into(),
        source: Some(e),
    }
}

/// Store over a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn existing_columns(&self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to inspect table columns"))
    }
}

#[async_trait]
impl DataSource for PgStore {
    #[instrument(skip(self))]
    async fn fetch_table(&self, kind: EntityKind) -> Result<Table> {
        let spec = table_spec(kind);
        let existing = self.existing_columns(spec.table).await?;
        if existing.is_empty() {
            warn!("Table {} does not exist; treating it as empty", spec.table);
            return Ok(Table::empty(kind));
        }

        let columns: Vec<ColumnSpec> = spec
            .columns
            .iter()
            .filter(|c| existing.iter().any(|e| e == c.name))
            .copied()
            .collect();
        if columns.len() < spec.columns.len() {
            debug!(
                "Table {} is missing {} expected columns",
                spec.table,
                spec.columns.len() - columns.len()
            );
        }
        if columns.is_empty() {
            return Ok(Table::empty(kind));
        }

        let select = columns
            .iter()
            .map(ColumnSpec::select_expr)
            .collect::<Vec<_>>()
            .join(", ");
        let order_by = if spec
            .order_by
            .split(", ")
            .all(|c| columns.iter().any(|s| s.name == c))
        {
            format!(" ORDER BY {}", spec.order_by)
        } else {
            String::new()
        };
        let sql = format!("SELECT {} FROM \"{}\"{}", select, spec.table, order_by);

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to fetch table"))?;

        let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
        let mut table = Table::new(kind, &names);
        for row in &rows {
            let cells = columns
                .iter()
                .enumerate()
                .map(|(i, c)| decode_cell(row, i, c.ty))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(cells);
        }

        debug!("Fetched {} rows from {}", table.len(), spec.table);
        Ok(table)
    }
}

/// Match ids returned by a bulk insert with the staged items, in insert order
///
/// Ids come from one sequence and rows are inserted by ordinality, so sorting
/// the ids restores the staged order.
fn pair_item_ids(
    mut item_ids: Vec<i64>,
    staged: &[StagedItem],
) -> Result<impl Iterator<Item = (i64, &StagedItem)>> {
    if item_ids.len() != staged.len() {
        return Err(Error::Database {
            message: format!(
                "Inserted {} dynamic items but {} were staged",
                item_ids.len(),
                staged.len()
            )
            .into(),
            source: None,
        });
    }
    item_ids.sort_unstable();
    Ok(item_ids.into_iter().zip(staged))
}

#[async_trait]
impl FeedSink for PgStore {
    #[instrument(skip(self, batch))]
    async fn commit(&self, batch: FeedBatch) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        if batch.is_empty() {
            return Ok(summary);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        if !batch.replace_kinds.is_empty() {
            let kinds: Vec<String> = batch
                .replace_kinds
                .iter()
                .map(|k| k.as_str().to_string())
                .collect();
            let result = sqlx::query("DELETE FROM dynamic_item WHERE item_type = ANY($1)")
                .bind(&kinds)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to delete replaced items"))?;
            summary.items_deleted = result.rows_affected() as usize;
        }

        let mut priorities = batch.deduped_priorities();
        for chunk in batch.items.chunks(BULK_CHUNK_SIZE) {
            let item_types: Vec<&str> = chunk.iter().map(|s| s.payload.item_type()).collect();
            let contents: Vec<String> = chunk
                .iter()
                .map(|s| s.payload.content().map(|c| c.to_string()))
                .collect::<Result<_>>()?;
            let item_ids: Vec<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO dynamic_item (item_type, content, created_at)
                SELECT item_type, content::jsonb, NOW()
                FROM UNNEST($1::text[], $2::text[]) WITH ORDINALITY AS t(item_type, content, ord)
                ORDER BY ord
                RETURNING item_id
                "#,
            )
            .bind(&item_types)
            .bind(&contents)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error("Failed to insert dynamic items"))?;

            for (item_id, staged) in pair_item_ids(item_ids, chunk)? {
                for &(user_id, score) in &staged.priorities {
                    priorities.insert((item_id, user_id), score);
                }
            }
            summary.items_inserted += chunk.len();
        }

        let priorities: Vec<((i64, i64), f64)> = priorities.into_iter().collect();
        for chunk in priorities.chunks(BULK_CHUNK_SIZE) {
            let item_ids: Vec<i64> = chunk.iter().map(|((item, _), _)| *item).collect();
            let user_ids: Vec<i64> = chunk.iter().map(|((_, user), _)| *user).collect();
            let scores: Vec<f64> = chunk.iter().map(|(_, score)| *score).collect();
            let result = sqlx::query(
                r#"
                INSERT INTO dynamic_item_priority (item_id, user_id, priority_score)
                SELECT * FROM UNNEST($1::int8[], $2::int8[], $3::float8[])
                ON CONFLICT (item_id, user_id) DO UPDATE SET
                    priority_score = EXCLUDED.priority_score
                "#,
            )
            .bind(&item_ids)
            .bind(&user_ids)
            .bind(&scores)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to upsert item priorities"))?;
            summary.priorities_written += result.rows_affected() as usize;
        }

        if !batch.replace_feeds_for.is_empty() {
            sqlx::query("DELETE FROM dynamic_user_feed WHERE user_id = ANY($1)")
                .bind(&batch.replace_feeds_for)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to clear user feeds"))?;
        }

        let feed_rows = batch.deduped_feed_rows();
        for chunk in feed_rows.chunks(BULK_CHUNK_SIZE) {
            let user_ids: Vec<i64> = chunk.iter().map(|r| r.user_id).collect();
            let item_ids: Vec<i64> = chunk.iter().map(|r| r.item_id).collect();
            let positions: Vec<i32> = chunk.iter().map(|r| r.position).collect();
            let timestamps: Vec<DateTime<Utc>> = chunk.iter().map(|r| r.feed_timestamp).collect();
            let result = sqlx::query(
                r#"
                INSERT INTO dynamic_user_feed (user_id, item_id, feed_position, feed_timestamp)
                SELECT * FROM UNNEST($1::int8[], $2::int8[], $3::int4[], $4::timestamptz[])
                ON CONFLICT (user_id, item_id) DO UPDATE SET
                    feed_position = EXCLUDED.feed_position,
                    feed_timestamp = EXCLUDED.feed_timestamp
                "#,
            )
            .bind(&user_ids)
            .bind(&item_ids)
            .bind(&positions)
            .bind(&timestamps)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to insert feed rows"))?;
            summary.feed_rows_written += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit feed batch"))?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::item::{AdContent, ItemKind, ItemPayload};
    use crate::store::FeedRow;
    use serde_json::json;

    #[test]
    fn test_interval_conversion() {
        let interval = PgInterval {
            months: 1,
            days: 2,
            microseconds: 90_500_000,
        };
        let duration = interval_to_duration(&interval);
        assert_eq!(duration.num_days(), 32);
        assert_eq!(Cell::from(duration).as_f64(), Some(32.0 * 86_400.0 + 90.5));
    }

    #[test]
    fn test_select_expr_casts_and_quotes() {
        assert_eq!(
            col("timestamp", ColumnType::Timestamp).select_expr(),
            "\"timestamp\"::timestamptz AS \"timestamp\""
        );
    }

    #[test]
    fn test_column_lists_are_static() {
        let columns: &'static [ColumnSpec] = table_spec(EntityKind::GameSession).columns;
        let total = columns
            .iter()
            .find(|c| c.name == "session_total_time")
            .map(|c| c.ty);
        assert_eq!(total, Some(ColumnType::Interval));
        assert!(std::ptr::eq(columns, GAME_SESSION_COLUMNS));
    }

    fn ad(text: &str) -> StagedItem {
        StagedItem::new(ItemPayload::Ad(AdContent {
            ad_content: text.to_string(),
        }))
    }

    #[test]
    fn test_returned_ids_pair_in_staged_order() {
        let staged = vec![ad("first").with_priority(1, 1.0), ad("second"), ad("third")];
        let paired: Vec<(i64, Value)> = pair_item_ids(vec![42, 40, 41], &staged)
            .unwrap()
            .map(|(id, item)| (id, item.payload.content().unwrap()["ad_content"].clone()))
            .collect();
        assert_eq!(
            paired,
            vec![(40, json!("first")), (41, json!("second")), (42, json!("third"))]
        );
        assert_eq!(staged[0].priorities, vec![(1, 1.0)]);
    }

    #[test]
    fn test_returned_id_count_must_match() {
        let staged = vec![ad("only")];
        assert!(matches!(
            pair_item_ids(vec![1, 2], &staged),
            Err(Error::Database { .. })
        ));
    }

    #[test]
    fn test_every_kind_has_columns() {
        for kind in [
            EntityKind::Activity,
            EntityKind::Comment,
            EntityKind::Favorite,
            EntityKind::Follow,
            EntityKind::GameSession,
            EntityKind::PlaylistSession,
            EntityKind::PlaylistUserActivity,
            EntityKind::User,
            EntityKind::DynamicItem,
            EntityKind::DynamicItemPriority,
            EntityKind::DynamicUserFeed,
        ] {
            let spec = table_spec(kind);
            assert!(!spec.columns.is_empty(), "{} has no columns", kind);
            assert!(spec
                .order_by
                .split(", ")
                .all(|c| spec.columns.iter().any(|s| s.name == c)));
        }
    }

    #[tokio::test]
    async fn test_commit_round_trip() {
        // Requires a running database; skipped without DATABASE_URL
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let pool = PgPool::connect(&url).await.unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        let store = PgStore::new(pool);

        let batch = FeedBatch {
            replace_kinds: vec![ItemKind::Ad],
            items: vec![
                ad("Buy now!").with_priority(-1, 1.0),
                ad("Second").with_priority(-1, 2.0),
            ],
            ..Default::default()
        };
        let summary = store.commit(batch).await.unwrap();
        assert_eq!(summary.items_inserted, 2);
        assert_eq!(summary.priorities_written, 2);

        let items = store.fetch_table(EntityKind::DynamicItem).await.unwrap();
        let item_col = items.column("item_id").unwrap();
        let type_col = items.column("item_type").unwrap();
        let content_col = items.column("content").unwrap();
        let ad_id_with = |text: &str| {
            items
                .rows()
                .find(|r| {
                    r[type_col].as_str() == Some("ad")
                        && r[content_col] == Cell::Json(json!({"ad_content": text}))
                })
                .and_then(|r| r[item_col].as_i64())
                .unwrap()
        };
        let ad_id = ad_id_with("Buy now!");
        let second_id = ad_id_with("Second");

        let priorities = store
            .fetch_table(EntityKind::DynamicItemPriority)
            .await
            .unwrap();
        let p_item = priorities.column("item_id").unwrap();
        let p_score = priorities.column("priority_score").unwrap();
        let score_of = |id: i64| {
            priorities
                .rows()
                .find(|r| r[p_item].as_i64() == Some(id))
                .and_then(|r| r[p_score].as_f64())
        };
        assert_eq!(score_of(ad_id), Some(1.0));
        assert_eq!(score_of(second_id), Some(2.0));

        let feed = FeedBatch {
            replace_feeds_for: vec![-1],
            feed_rows: vec![FeedRow {
                user_id: -1,
                item_id: ad_id,
                position: 0,
                feed_timestamp: Utc::now(),
            }],
            ..Default::default()
        };
        assert_eq!(store.commit(feed).await.unwrap().feed_rows_written, 1);

        let feed_table = store.fetch_table(EntityKind::DynamicUserFeed).await.unwrap();
        assert!(feed_table.column("feed_position").is_ok());

        let cleanup = FeedBatch {
            replace_kinds: vec![ItemKind::Ad],
            ..Default::default()
        };
        store.commit(cleanup).await.unwrap();
    }
}
