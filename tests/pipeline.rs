//! End-to-end runs of the recommendation engine and feed jobs against the
//! in-process store.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use playfeed::config::{FeedConfig, RecommendationConfig};
use playfeed::feed::{calculate_priority, ItemKind, ItemPayload};
use playfeed::store::{
    Cell, CommitSummary, DataSource, EntityKind, FeedBatch, FeedSink, MemoryStore, Table,
};
use playfeed::{Error, FeedJobs, RecommendationEngine};

fn users(ids: &[i64]) -> Table {
    let mut table = Table::new(EntityKind::User, &["id", "username"]);
    for &id in ids {
        table.push_row(vec![Cell::Int(id), Cell::from(format!("user{}", id))]);
    }
    table
}

fn game_sessions(rows: &[(i64, i64, i64)]) -> Table {
    let mut table = Table::new(
        EntityKind::GameSession,
        &["user_id", "game_id", "session_total_time"],
    );
    for &(user_id, game_id, secs) in rows {
        table.push_row(vec![
            Cell::Int(user_id),
            Cell::Int(game_id),
            Cell::from(chrono::Duration::seconds(secs)),
        ]);
    }
    table
}

/// `count` activities by user 2, each targeting one of the known games
fn activities(count: i64) -> Table {
    let mut table = Table::new(
        EntityKind::Activity,
        &["id", "user_id", "target_id", "activity_type"],
    );
    for id in 1..=count {
        table.push_row(vec![
            Cell::Int(id),
            Cell::Int(2),
            Cell::Int(10 + id % 3),
            Cell::from("played"),
        ]);
    }
    table
}

fn playlist_sessions() -> Table {
    Table::new(
        EntityKind::PlaylistSession,
        &["user_id", "playlist_id", "completed"],
    )
    .with_row(vec![Cell::Int(1), Cell::Int(50), Cell::Bool(true)])
    .with_row(vec![Cell::Int(2), Cell::Int(51), Cell::Bool(true)])
    .with_row(vec![Cell::Int(2), Cell::Int(50), Cell::Bool(false)])
}

/// Two users over three games, seven activities and two completed playlists
fn seeded_store() -> MemoryStore {
    MemoryStore::new()
        .with_table(users(&[1, 2]))
        .with_table(game_sessions(&[
            (1, 10, 600),
            (1, 11, 120),
            (1, 12, 30),
            (2, 10, 45),
            (2, 11, 900),
        ]))
        .with_table(activities(7))
        .with_table(playlist_sessions())
}

fn jobs_for(store: Arc<MemoryStore>) -> FeedJobs {
    let engine = RecommendationEngine::new(store.clone(), RecommendationConfig::default())
        .expect("default weights are valid");
    FeedJobs::new(store, engine, FeedConfig::default())
}

#[tokio::test]
async fn test_recommendations_cover_every_user_without_duplicates() {
    let store = Arc::new(seeded_store());
    let engine = RecommendationEngine::new(store, RecommendationConfig::default()).unwrap();

    let recs = engine.fetch_recommendations().await.unwrap();
    for user_id in [1, 2] {
        let games: Vec<i64> = recs
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.item_id)
            .collect();
        assert_eq!(games.len(), 3, "user {} should rank every game", user_id);
        assert!(games.len() <= 10);
        let unique: HashSet<i64> = games.iter().copied().collect();
        assert_eq!(unique.len(), games.len());
        assert!(games.iter().all(|g| [10, 11, 12].contains(g)));
    }

    let for_user = engine.recommend_for_user(1).await.unwrap();
    assert_eq!(for_user.len(), 3);
    assert!(for_user.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(engine.recommend_for_user(99).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_without_sessions_gets_default_playlist_response() {
    let store = Arc::new(seeded_store());
    let engine = RecommendationEngine::new(store, RecommendationConfig::default()).unwrap();

    let known = engine.fetch_playlist_recommendations(2).await.unwrap();
    let playlists: Vec<i64> = known
        .playlist_recommendations
        .iter()
        .map(|r| r.item_id)
        .collect();
    assert_eq!(playlists, vec![51]);
    assert!(!known.game_recommendations.is_empty());

    let unknown = engine.fetch_playlist_recommendations(3).await.unwrap();
    assert!(unknown.game_recommendations.is_empty());
    assert!(unknown.playlist_recommendations.is_empty());
}

#[tokio::test]
async fn test_populate_and_prioritize_items() {
    let store = Arc::new(seeded_store());
    let jobs = jobs_for(store.clone());

    let report = jobs.populate_dynamic_items().await.unwrap();
    // 7 activities, 3 games for each of 2 users, 10 static ads
    assert_eq!(report.rows_written, 7 + 6 + 10);

    let report = jobs.populate_item_priorities().await.unwrap();
    assert_eq!(report.rows_written, 23 * 2);

    for item in store.items().await {
        let expected = match item.payload.kind() {
            Some(ItemKind::Activity) => 10.0,
            Some(ItemKind::Recommendation) => 5.0,
            Some(ItemKind::Ad) => 1.0,
            other => panic!("unexpected item kind {:?}", other),
        };
        for user_id in [1, 2] {
            assert_eq!(store.priority(item.item_id, user_id).await, Some(expected));
        }
    }

    let unknown = ItemPayload::from_parts("banner", serde_json::json!({"text": "hi"}));
    assert_eq!(calculate_priority(&unknown), 0.0);
}

#[tokio::test]
async fn test_generated_feed_follows_cadence() {
    let store = Arc::new(seeded_store());
    let jobs = jobs_for(store.clone());
    jobs.run_all().await.unwrap();

    let feed = jobs.feed_for_user(1).await.unwrap();
    let types: Vec<&str> = feed.iter().map(|e| e.item_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "activity",
            "activity",
            "activity",
            "recommendation",
            "ad",
            "activity",
            "activity",
            "activity",
            "recommendation",
        ]
    );

    // Only the user's own recommendations are placed
    for entry in feed.iter().filter(|e| e.item_type == "recommendation") {
        assert_eq!(entry.content["user_id"], 1);
    }

    // Activities come out by ascending item id on equal priority
    let activity_ids: Vec<i64> = feed
        .iter()
        .filter(|e| e.item_type == "activity")
        .map(|e| e.item_id)
        .collect();
    let mut sorted = activity_ids.clone();
    sorted.sort_unstable();
    assert_eq!(activity_ids, sorted);

    assert_eq!(
        store.feed_item_ids(1).await,
        feed.iter().map(|e| e.item_id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_rerunning_jobs_replaces_previous_state() {
    let store = Arc::new(seeded_store());
    let jobs = jobs_for(store.clone());

    let first = jobs.run_all().await.unwrap();
    let items_after_first = store.items().await.len();
    let priorities_after_first = store.priority_count().await;
    let feed_after_first = jobs.feed_for_user(2).await.unwrap().len();

    let second = jobs.run_all().await.unwrap();
    assert_eq!(
        first.iter().map(|r| r.rows_written).collect::<Vec<_>>(),
        second.iter().map(|r| r.rows_written).collect::<Vec<_>>()
    );
    assert_eq!(store.items().await.len(), items_after_first);
    assert_eq!(store.priority_count().await, priorities_after_first);
    assert_eq!(jobs.feed_for_user(2).await.unwrap().len(), feed_after_first);
}

#[tokio::test]
async fn test_playlist_items_carry_their_own_priority() {
    let store = Arc::new(seeded_store());
    let jobs = jobs_for(store.clone());

    let report = jobs.update_playlist_recommendations().await.unwrap();
    // Two playlists ranked for each of two users, one priority per item
    assert_eq!(report.rows_written, 4 + 4);

    let playlist_items: Vec<_> = store
        .items()
        .await
        .into_iter()
        .filter(|i| i.payload.kind() == Some(ItemKind::PlaylistRecommendation))
        .collect();
    assert_eq!(playlist_items.len(), 4);
    for item in &playlist_items {
        let ItemPayload::PlaylistRecommendation(content) = &item.payload else {
            unreachable!();
        };
        assert_eq!(
            store.priority(item.item_id, content.user_id).await,
            Some(content.score)
        );
    }

    // The static priority job leaves playlist priorities alone
    jobs.populate_item_priorities().await.unwrap();
    for item in &playlist_items {
        let ItemPayload::PlaylistRecommendation(content) = &item.payload else {
            unreachable!();
        };
        let other_user = if content.user_id == 1 { 2 } else { 1 };
        assert_eq!(store.priority(item.item_id, other_user).await, None);
    }
}

#[tokio::test]
async fn test_zero_slow_thresholds_only_warn() {
    let store = Arc::new(seeded_store());
    let engine = RecommendationEngine::new(
        store.clone(),
        RecommendationConfig {
            slow_stage_ms: 0,
            ..Default::default()
        },
    )
    .unwrap();
    let jobs = FeedJobs::new(
        store.clone(),
        engine,
        FeedConfig {
            slow_commit_ms: 0,
            ..Default::default()
        },
    );

    let reports = jobs.run_all().await.unwrap();
    assert!(reports.iter().any(|r| r.rows_written > 0));
    assert!(!jobs.feed_for_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feeds_are_empty_without_priorities() {
    let store = Arc::new(seeded_store());
    let jobs = jobs_for(store.clone());

    jobs.populate_dynamic_items().await.unwrap();
    let report = jobs.generate_user_feeds().await.unwrap();

    assert_eq!(report.rows_written, 0);
    assert!(jobs.feed_for_user(1).await.unwrap().is_empty());
    assert!(jobs.feed_for_user(42).await.unwrap().is_empty());
}

/// Store whose commits can be switched to fail
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail: AtomicBool,
}

#[async_trait]
impl DataSource for FlakyStore {
    async fn fetch_table(&self, kind: EntityKind) -> playfeed::Result<Table> {
        self.inner.fetch_table(kind).await
    }
}

#[async_trait]
impl FeedSink for FlakyStore {
    async fn commit(&self, batch: FeedBatch) -> playfeed::Result<CommitSummary> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Database {
                message: "connection reset".into(),
                source: None,
            });
        }
        self.inner.commit(batch).await
    }
}

#[tokio::test]
async fn test_failed_job_keeps_previous_feed() {
    let inner = Arc::new(seeded_store());
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        fail: AtomicBool::new(false),
    });
    let engine = RecommendationEngine::new(store.clone(), RecommendationConfig::default()).unwrap();
    let jobs = FeedJobs::new(store.clone(), engine, FeedConfig::default());

    jobs.run_all().await.unwrap();
    let items_before = inner.items().await;
    let feed_before = inner.feed_item_ids(1).await;
    assert!(!feed_before.is_empty());

    store.fail.store(true, Ordering::SeqCst);
    assert!(jobs.populate_dynamic_items().await.is_err());
    assert!(jobs.generate_user_feeds().await.is_err());
    assert!(jobs.run_all().await.is_err());

    assert_eq!(inner.items().await, items_before);
    assert_eq!(inner.feed_item_ids(1).await, feed_before);
}
