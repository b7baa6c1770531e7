//! Data source contracts
//!
//! The engine reads every source entity as a [`Table`] of named columns and
//! writes feed state through a staged [`FeedBatch`] that is committed
//! all-or-nothing. [`PgStore`] backs both against PostgreSQL and
//! [`MemoryStore`] keeps everything in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::feed::item::{ItemKind, ItemPayload};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Entity kinds the engine can fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Activity,
    Comment,
    Favorite,
    Follow,
    GameSession,
    PlaylistSession,
    PlaylistUserActivity,
    User,
    DynamicItem,
    DynamicItemPriority,
    DynamicUserFeed,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Activity => "activity",
            EntityKind::Comment => "comment",
            EntityKind::Favorite => "favorite",
            EntityKind::Follow => "follow",
            EntityKind::GameSession => "game_session",
            EntityKind::PlaylistSession => "playlist_session",
            EntityKind::PlaylistUserActivity => "playlist_user_activity",
            EntityKind::User => "user",
            EntityKind::DynamicItem => "dynamic_item",
            EntityKind::DynamicItemPriority => "dynamic_item_priority",
            EntityKind::DynamicUserFeed => "dynamic_user_feed",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value in a fetched table
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Interval(chrono::Duration),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

impl Cell {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric view of the cell; durations are expressed in seconds
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Interval(d) => Some(duration_seconds(d)),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            Cell::Int(v) => Some(*v != 0),
            Cell::Text(s) => match s.trim() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

}

fn duration_seconds(d: &chrono::Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<chrono::Duration> for Cell {
    fn from(v: chrono::Duration) -> Self {
        Cell::Interval(v)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(v: DateTime<Utc>) -> Self {
        Cell::Timestamp(v)
    }
}

impl From<Value> for Cell {
    fn from(v: Value) -> Self {
        Cell::Json(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Rows of one entity kind with named columns
///
/// A table fetched from a source with no rows may also carry no columns, so
/// callers check [`Table::is_empty`] before resolving columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    kind: EntityKind,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(kind: EntityKind, columns: &[&str]) -> Self {
        Self {
            kind,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// A table with neither rows nor columns
    pub fn empty(kind: EntityKind) -> Self {
        Self {
            kind,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a row; short rows are padded with nulls
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: Vec<Cell>) -> Self {
        self.push_row(row);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, or `MissingColumn`
    pub fn column(&self, name: &'static str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or(Error::MissingColumn {
                table: self.kind.as_str(),
                column: name,
            })
    }

    /// Fail with `MissingColumn` for the first absent column
    pub fn require(&self, names: &[&'static str]) -> Result<()> {
        for name in names {
            self.column(name)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

/// Read side of the store
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch all rows of an entity kind
    async fn fetch_table(&self, kind: EntityKind) -> Result<Table>;
}

/// Write side of the store
#[async_trait]
pub trait FeedSink: Send + Sync {
    /// Apply every staged write of the batch atomically
    async fn commit(&self, batch: FeedBatch) -> Result<CommitSummary>;
}

/// Convenience bound for stores that both read and write
pub trait Store: DataSource + FeedSink {}

impl<T: DataSource + FeedSink> Store for T {}

/// A new dynamic item and the per-user priorities created with it
#[derive(Debug, Clone, PartialEq)]
pub struct StagedItem {
    pub payload: ItemPayload,
    pub priorities: Vec<(i64, f64)>,
}

impl StagedItem {
    pub fn new(payload: ItemPayload) -> Self {
        Self {
            payload,
            priorities: Vec::new(),
        }
    }

    pub fn with_priority(mut self, user_id: i64, priority_score: f64) -> Self {
        self.priorities.push((user_id, priority_score));
        self
    }
}

/// Priority of an existing item for one user
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityRow {
    pub item_id: i64,
    pub user_id: i64,
    pub priority_score: f64,
}

/// One materialized feed entry
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub user_id: i64,
    pub item_id: i64,
    pub position: i32,
    pub feed_timestamp: DateTime<Utc>,
}

/// Writes staged by a batch job
///
/// Applied in this order on commit: delete items of `replace_kinds` (their
/// priorities and feed rows go with them), insert `items`, upsert
/// `priorities`, clear the feeds of `replace_feeds_for`, insert `feed_rows`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedBatch {
    pub replace_kinds: Vec<ItemKind>,
    pub items: Vec<StagedItem>,
    pub priorities: Vec<PriorityRow>,
    pub replace_feeds_for: Vec<i64>,
    pub feed_rows: Vec<FeedRow>,
}

impl FeedBatch {
    pub fn is_empty(&self) -> bool {
        self.replace_kinds.is_empty()
            && self.items.is_empty()
            && self.priorities.is_empty()
            && self.replace_feeds_for.is_empty()
            && self.feed_rows.is_empty()
    }

    /// Priority upserts keyed by (item_id, user_id); the last write for a pair wins
    pub fn deduped_priorities(&self) -> BTreeMap<(i64, i64), f64> {
        self.priorities
            .iter()
            .map(|p| ((p.item_id, p.user_id), p.priority_score))
            .collect()
    }

    /// Feed rows keyed by (user_id, item_id); the last write for a pair wins
    pub fn deduped_feed_rows(&self) -> Vec<FeedRow> {
        let mut by_key: BTreeMap<(i64, i64), FeedRow> = BTreeMap::new();
        for row in &self.feed_rows {
            by_key.insert((row.user_id, row.item_id), row.clone());
        }
        by_key.into_values().collect()
    }
}

/// Row counts applied by a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub items_deleted: usize,
    pub items_inserted: usize,
    pub priorities_written: usize,
    pub feed_rows_written: usize,
}

impl CommitSummary {
    pub fn rows_written(&self) -> usize {
        self.items_inserted + self.priorities_written + self.feed_rows_written
    }
}
