//! In-process store
//!
//! Source tables are supplied up front; the dynamic feed tables are kept as
//! typed maps and rendered as [`Table`]s on fetch. A commit is applied to a
//! copy of the state and swapped in only if every step succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{Cell, CommitSummary, DataSource, EntityKind, FeedBatch, FeedSink, Table};
use crate::error::{Error, Result};
use crate::feed::item::{DynamicItem, ItemPayload};

#[derive(Debug, Clone, PartialEq)]
struct StoredItem {
    payload: ItemPayload,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StoredFeedRow {
    position: i32,
    feed_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<EntityKind, Table>,
    items: BTreeMap<i64, StoredItem>,
    priorities: BTreeMap<(i64, i64), f64>,
    feeds: BTreeMap<(i64, i64), StoredFeedRow>,
    next_item_id: i64,
}

impl MemoryState {
    fn apply(&mut self, batch: FeedBatch) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();

        if !batch.replace_kinds.is_empty() {
            let removed: Vec<i64> = self
                .items
                .iter()
                .filter(|(_, item)| {
                    item.payload
                        .kind()
                        .is_some_and(|k| batch.replace_kinds.contains(&k))
                })
                .map(|(id, _)| *id)
                .collect();
            for item_id in &removed {
                self.items.remove(item_id);
            }
            self.priorities.retain(|(item_id, _), _| !removed.contains(item_id));
            self.feeds.retain(|(_, item_id), _| !removed.contains(item_id));
            summary.items_deleted = removed.len();
        }

        let mut priorities = batch.deduped_priorities();
        let now = Utc::now();
        for staged in batch.items {
            self.next_item_id += 1;
            let item_id = self.next_item_id;
            for (user_id, score) in staged.priorities {
                priorities.insert((item_id, user_id), score);
            }
            self.items.insert(
                item_id,
                StoredItem {
                    payload: staged.payload,
                    created_at: now,
                },
            );
            summary.items_inserted += 1;
        }

        for ((item_id, user_id), score) in priorities {
            if !self.items.contains_key(&item_id) {
                return Err(Error::ConstraintViolation {
                    message: format!("priority references missing item {}", item_id).into(),
                });
            }
            self.priorities.insert((item_id, user_id), score);
            summary.priorities_written += 1;
        }

        if !batch.replace_feeds_for.is_empty() {
            self.feeds
                .retain(|(user_id, _), _| !batch.replace_feeds_for.contains(user_id));
        }

        for row in batch.feed_rows {
            if !self.items.contains_key(&row.item_id) {
                return Err(Error::ConstraintViolation {
                    message: format!("feed row references missing item {}", row.item_id).into(),
                });
            }
            self.feeds.insert(
                (row.user_id, row.item_id),
                StoredFeedRow {
                    position: row.position,
                    feed_timestamp: row.feed_timestamp,
                },
            );
            summary.feed_rows_written += 1;
        }

        Ok(summary)
    }

    fn render(&self, kind: EntityKind) -> Result<Table> {
        let table = match kind {
            EntityKind::DynamicItem => {
                let mut table = Table::new(
                    kind,
                    &["item_id", "item_type", "content", "created_at"],
                );
                for (item_id, item) in &self.items {
                    table.push_row(vec![
                        Cell::Int(*item_id),
                        Cell::from(item.payload.item_type()),
                        Cell::Json(item.payload.content()?),
                        Cell::Timestamp(item.created_at),
                    ]);
                }
                table
            }
            EntityKind::DynamicItemPriority => {
                let mut table = Table::new(kind, &["item_id", "user_id", "priority_score"]);
                for ((item_id, user_id), score) in &self.priorities {
                    table.push_row(vec![
                        Cell::Int(*item_id),
                        Cell::Int(*user_id),
                        Cell::Float(*score),
                    ]);
                }
                table
            }
            EntityKind::DynamicUserFeed => {
                let mut table = Table::new(
                    kind,
                    &["user_id", "item_id", "feed_position", "feed_timestamp"],
                );
                for ((user_id, item_id), row) in &self.feeds {
                    table.push_row(vec![
                        Cell::Int(*user_id),
                        Cell::Int(*item_id),
                        Cell::Int(i64::from(row.position)),
                        Cell::Timestamp(row.feed_timestamp),
                    ]);
                }
                table
            }
            other => self
                .tables
                .get(&other)
                .cloned()
                .unwrap_or_else(|| Table::empty(other)),
        };
        Ok(table)
    }
}

/// Store keeping every table in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a source table, replacing any table of the same kind
    pub fn with_table(self, table: Table) -> Self {
        let mut state = self.state.into_inner();
        state.tables.insert(table.kind(), table);
        Self {
            state: RwLock::new(state),
        }
    }

    /// Every stored dynamic item, ordered by id
    pub async fn items(&self) -> Vec<DynamicItem> {
        self.state
            .read()
            .await
            .items
            .iter()
            .map(|(item_id, item)| DynamicItem {
                item_id: *item_id,
                payload: item.payload.clone(),
                created_at: Some(item.created_at),
            })
            .collect()
    }

    pub async fn priority(&self, item_id: i64, user_id: i64) -> Option<f64> {
        self.state
            .read()
            .await
            .priorities
            .get(&(item_id, user_id))
            .copied()
    }

    pub async fn priority_count(&self) -> usize {
        self.state.read().await.priorities.len()
    }

    /// Item ids of a user's feed in composition order
    pub async fn feed_item_ids(&self, user_id: i64) -> Vec<i64> {
        let state = self.state.read().await;
        let mut rows: Vec<(DateTime<Utc>, i32, i64)> = state
            .feeds
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((_, item_id), row)| (row.feed_timestamp, row.position, *item_id))
            .collect();
        rows.sort();
        rows.into_iter().map(|(_, _, item_id)| item_id).collect()
    }
}

#[async_trait]
impl DataSource for MemoryStore {
    async fn fetch_table(&self, kind: EntityKind) -> Result<Table> {
        self.state.read().await.render(kind)
    }
}

#[async_trait]
impl FeedSink for MemoryStore {
    async fn commit(&self, batch: FeedBatch) -> Result<CommitSummary> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let summary = staged.apply(batch)?;
        *state = staged;
        Ok(summary)
    }
}
