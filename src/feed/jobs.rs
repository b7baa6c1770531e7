//! Feed batch jobs
//!
//! Each job reads what it needs, stages every write in one [`FeedBatch`] and
//! commits it at the end, so a failure before the commit leaves the stored
//! feed state untouched. Jobs replace their whole scope on every run: item
//! population replaces the item kinds it produces, feed generation replaces
//! the feeds of every user it composes for.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::composer::{FeedPolicy, FeedPools};
use super::item::{
    ActivityContent, AdContent, DynamicItem, GameRecommendationContent, ItemKind, ItemPayload,
    PlaylistRecommendationContent,
};
use super::priority::{calculate_priority, has_static_priority};
use crate::config::FeedConfig;
use crate::error::{absorb_missing, Result};
use crate::recommendation::metrics::PerformanceTimer;
use crate::recommendation::RecommendationEngine;
use crate::store::{
    CommitSummary, EntityKind, FeedBatch, FeedRow, PriorityRow, StagedItem, Store, Table,
};

/// Outcome of one job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub rows_written: usize,
}

/// One entry of a user's materialized feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub item_id: i64,
    pub item_type: String,
    pub content: Value,
    pub feed_timestamp: DateTime<Utc>,
}

/// Per-user candidate pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub activities: usize,
    pub recommendations: usize,
    pub ads: usize,
}

impl From<&FeedConfig> for PoolLimits {
    fn from(config: &FeedConfig) -> Self {
        Self {
            activities: config.activity_limit,
            recommendations: config.recommendation_limit,
            ads: config.ad_limit,
        }
    }
}

/// Split a user's prioritized items into candidate pools
///
/// `ranked` is ordered by descending priority. Pools follow the declared item
/// kind even when the stored content did not decode. Recommendations produced
/// for another user and item kinds outside the cadence are skipped.
pub fn build_pools(
    user_id: i64,
    ranked: &[i64],
    items: &HashMap<i64, DynamicItem>,
    limits: PoolLimits,
) -> FeedPools<i64> {
    let mut pools = FeedPools::default();
    for item_id in ranked {
        let Some(item) = items.get(item_id) else {
            continue;
        };
        let (pool, limit) = match item.payload.kind() {
            Some(ItemKind::Activity) => (&mut pools.activities, limits.activities),
            Some(ItemKind::Recommendation)
                if item.payload.target_user().map_or(true, |u| u == user_id) =>
            {
                (&mut pools.recommendations, limits.recommendations)
            }
            Some(ItemKind::Ad) => (&mut pools.ads, limits.ads),
            _ => continue,
        };
        if pool.len() < limit {
            pool.push(*item_id);
        }
    }
    pools
}

/// Batch jobs that maintain dynamic items, priorities and user feeds
#[derive(Clone)]
pub struct FeedJobs {
    store: Arc<dyn Store>,
    engine: RecommendationEngine,
    config: FeedConfig,
}

impl FeedJobs {
    pub fn new(store: Arc<dyn Store>, engine: RecommendationEngine, config: FeedConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Replace activity, recommendation and ad items
    ///
    /// Activities come from the `activity` table, recommendations from the
    /// all-users game ranking, and ads are the configured static ad repeated.
    #[instrument(skip(self))]
    pub async fn populate_dynamic_items(&self) -> Result<JobReport> {
        let _timer = PerformanceTimer::new("populate_dynamic_items");
        let activity = self.store.fetch_table(EntityKind::Activity).await?;
        let activities = absorb_missing(activity_payloads(&activity))?;
        let recommendations = self.engine.fetch_recommendations().await?;

        let mut items: Vec<StagedItem> = activities.into_iter().map(StagedItem::new).collect();
        items.extend(recommendations.into_iter().map(|r| {
            StagedItem::new(ItemPayload::Recommendation(GameRecommendationContent {
                user_id: r.user_id,
                game_id: r.item_id,
                score: r.score,
            }))
        }));
        items.extend((0..self.config.static_ad_count).map(|_| {
            StagedItem::new(ItemPayload::Ad(AdContent {
                ad_content: self.config.static_ad_text.clone(),
            }))
        }));

        let batch = FeedBatch {
            replace_kinds: vec![ItemKind::Activity, ItemKind::Recommendation, ItemKind::Ad],
            items,
            ..Default::default()
        };
        let summary = self.commit("populate_dynamic_items", batch).await?;
        Ok(report("populate_dynamic_items", summary.items_inserted))
    }

    /// Upsert the static priority of every item for every user
    ///
    /// Playlist recommendation items keep the priorities written with them.
    #[instrument(skip(self))]
    pub async fn populate_item_priorities(&self) -> Result<JobReport> {
        let _timer = PerformanceTimer::new("populate_item_priorities");
        let (items, users) = tokio::try_join!(
            self.store.fetch_table(EntityKind::DynamicItem),
            self.store.fetch_table(EntityKind::User),
        )?;
        let items = absorb_missing(DynamicItem::from_table(&items))?;
        let users = absorb_missing(user_ids(&users))?;

        let priorities: Vec<PriorityRow> = items
            .iter()
            .filter(|item| has_static_priority(&item.payload))
            .flat_map(|item| {
                let priority_score = calculate_priority(&item.payload);
                users.iter().map(move |&user_id| PriorityRow {
                    item_id: item.item_id,
                    user_id,
                    priority_score,
                })
            })
            .collect();

        debug!(
            "Staged {} priorities for {} items and {} users",
            priorities.len(),
            items.len(),
            users.len()
        );
        let batch = FeedBatch {
            priorities,
            ..Default::default()
        };
        let summary = self.commit("populate_item_priorities", batch).await?;
        Ok(report("populate_item_priorities", summary.priorities_written))
    }

    /// Compose and replace the feed of every user
    #[instrument(skip(self))]
    pub async fn generate_user_feeds(&self) -> Result<JobReport> {
        let _timer = PerformanceTimer::new("generate_user_feeds");
        let (users, items, priorities) = tokio::try_join!(
            self.store.fetch_table(EntityKind::User),
            self.store.fetch_table(EntityKind::DynamicItem),
            self.store.fetch_table(EntityKind::DynamicItemPriority),
        )?;
        let users = absorb_missing(user_ids(&users))?;
        let items: HashMap<i64, DynamicItem> = absorb_missing(DynamicItem::from_table(&items))?
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();
        let mut ranked = absorb_missing(ranked_items_by_user(&priorities))?;

        let policy = FeedPolicy::from(&self.config);
        let limits = PoolLimits::from(&self.config);
        let now = Utc::now();
        let mut feed_rows = Vec::new();

        for &user_id in &users {
            let user_ranked = ranked.remove(&user_id).unwrap_or_default();
            let pools = build_pools(user_id, &user_ranked, &items, limits);
            let feed = policy.compose(pools);
            debug!("Composed {} feed items for user {}", feed.len(), user_id);
            feed_rows.extend(feed.into_iter().enumerate().map(|(position, item_id)| FeedRow {
                user_id,
                item_id,
                position: position as i32,
                feed_timestamp: now,
            }));
        }

        let batch = FeedBatch {
            replace_feeds_for: users,
            feed_rows,
            ..Default::default()
        };
        let summary = self.commit("generate_user_feeds", batch).await?;
        Ok(report("generate_user_feeds", summary.feed_rows_written))
    }

    /// Replace playlist recommendation items with a fresh top-K per user
    ///
    /// Each item is written with a priority for its user equal to its score.
    #[instrument(skip(self))]
    pub async fn update_playlist_recommendations(&self) -> Result<JobReport> {
        let _timer = PerformanceTimer::new("update_playlist_recommendations");
        let recommendations = self.engine.playlist_recommendations().await?;

        let items = recommendations
            .into_iter()
            .map(|r| {
                StagedItem::new(ItemPayload::PlaylistRecommendation(
                    PlaylistRecommendationContent {
                        user_id: r.user_id,
                        playlist_id: r.item_id,
                        score: r.score,
                    },
                ))
                .with_priority(r.user_id, r.score)
            })
            .collect();

        let batch = FeedBatch {
            replace_kinds: vec![ItemKind::PlaylistRecommendation],
            items,
            ..Default::default()
        };
        let summary = self.commit("update_playlist_recommendations", batch).await?;
        Ok(report(
            "update_playlist_recommendations",
            summary.items_inserted + summary.priorities_written,
        ))
    }

    /// Run every job in dependency order
    pub async fn run_all(&self) -> Result<Vec<JobReport>> {
        let reports = vec![
            self.populate_dynamic_items().await?,
            self.update_playlist_recommendations().await?,
            self.populate_item_priorities().await?,
            self.generate_user_feeds().await?,
        ];
        info!(
            "Batch jobs finished: {}",
            reports
                .iter()
                .map(|r| format!("{}={}", r.job, r.rows_written))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(reports)
    }

    /// The user's materialized feed in composition order
    #[instrument(skip(self))]
    pub async fn feed_for_user(&self, user_id: i64) -> Result<Vec<FeedEntry>> {
        let (feeds, items) = tokio::try_join!(
            self.store.fetch_table(EntityKind::DynamicUserFeed),
            self.store.fetch_table(EntityKind::DynamicItem),
        )?;
        let items: HashMap<i64, DynamicItem> = DynamicItem::from_table(&items)?
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();

        if feeds.is_empty() {
            return Ok(Vec::new());
        }
        let user_col = feeds.column("user_id")?;
        let item_col = feeds.column("item_id")?;
        let ts_col = feeds.column("feed_timestamp")?;
        let position_col = feeds.column("feed_position").ok();

        let mut rows: Vec<(DateTime<Utc>, i64, i64)> = feeds
            .rows()
            .filter(|row| row[user_col].as_i64() == Some(user_id))
            .filter_map(|row| {
                Some((
                    row[ts_col].as_timestamp()?,
                    position_col.and_then(|c| row[c].as_i64()).unwrap_or(0),
                    row[item_col].as_i64()?,
                ))
            })
            .collect();
        rows.sort();

        rows.into_iter()
            .filter_map(|(feed_timestamp, _, item_id)| {
                items.get(&item_id).map(|item| (feed_timestamp, item))
            })
            .map(|(feed_timestamp, item)| {
                Ok(FeedEntry {
                    item_id: item.item_id,
                    item_type: item.payload.item_type().to_string(),
                    content: item.payload.content()?,
                    feed_timestamp,
                })
            })
            .collect()
    }

    async fn commit(&self, job: &'static str, batch: FeedBatch) -> Result<CommitSummary> {
        let timer = PerformanceTimer::new("feed_commit");
        let summary = self.store.commit(batch).await?;
        timer.log_if_slow(self.config.slow_commit_ms);
        metrics::counter!("playfeed_job_rows_written_total", "job" => job)
            .increment(summary.rows_written() as u64);
        info!(
            "{}: deleted {} items, inserted {} items, {} priorities, {} feed rows",
            job,
            summary.items_deleted,
            summary.items_inserted,
            summary.priorities_written,
            summary.feed_rows_written
        );
        Ok(summary)
    }
}

fn report(job: &'static str, rows_written: usize) -> JobReport {
    JobReport { job, rows_written }
}

/// Activity items from `activity` rows
fn activity_payloads(activity: &Table) -> Result<Vec<ItemPayload>> {
    if activity.is_empty() {
        return Ok(Vec::new());
    }
    let id_col = activity.column("id")?;
    let user_col = activity.column("user_id")?;
    let target_col = activity.column("target_id")?;
    let optional = |name: &'static str| activity.column(name).ok();
    let (type_col, target_type_col, text_col, ts_col) = (
        optional("activity_type"),
        optional("target_type"),
        optional("primary_text"),
        optional("timestamp"),
    );

    Ok(activity
        .rows()
        .filter_map(|row| {
            let text = |col: Option<usize>| {
                col.and_then(|c| row[c].as_str()).map(str::to_string)
            };
            Some(ItemPayload::Activity(ActivityContent {
                activity_id: row[id_col].as_i64()?,
                user_id: row[user_col].as_i64()?,
                target_id: row[target_col].as_i64()?,
                activity_type: text(type_col),
                target_type: text(target_type_col),
                primary_text: text(text_col),
                timestamp: ts_col.and_then(|c| row[c].as_timestamp()),
            }))
        })
        .collect())
}

/// Ids from the `user` table
fn user_ids(users: &Table) -> Result<Vec<i64>> {
    if users.is_empty() {
        return Ok(Vec::new());
    }
    let id_col = users.column("id")?;
    let mut ids: Vec<i64> = users.rows().filter_map(|row| row[id_col].as_i64()).collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Item ids per user, by descending priority then ascending item id
fn ranked_items_by_user(priorities: &Table) -> Result<HashMap<i64, Vec<i64>>> {
    if priorities.is_empty() {
        return Ok(HashMap::new());
    }
    let item_col = priorities.column("item_id")?;
    let user_col = priorities.column("user_id")?;
    let score_col = priorities.column("priority_score")?;

    let mut by_user: HashMap<i64, Vec<(f64, i64)>> = HashMap::new();
    for row in priorities.rows() {
        let (Some(item_id), Some(user_id)) = (row[item_col].as_i64(), row[user_col].as_i64())
        else {
            continue;
        };
        let score = row[score_col].as_f64().unwrap_or(0.0);
        by_user.entry(user_id).or_default().push((score, item_id));
    }

    Ok(by_user
        .into_iter()
        .map(|(user_id, mut scored)| {
            scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
            (user_id, scored.into_iter().map(|(_, item_id)| item_id).collect())
        })
        .collect())
}
