//! Recommendation Engine
//!
//! Fetches the source tables a run needs, turns them into signal matrices over
//! shared index sets, and ranks the fused scores. Every call builds its own
//! matrices; the engine itself only holds the data source and configuration.
//!
//! Signals per recommendation type:
//! - games: play time (`game_session`) and engagement (`activity`, `favorite`,
//!   `comment`), fused with the configured weights
//! - playlists: completion (`playlist_session`)

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::fusion::SignalFuser;
use super::index::IndexSet;
use super::matrix::InteractionMatrix;
use super::metrics::PerformanceTimer;
use super::normalize::normalize_rows;
use super::ranker::{self, Recommendation};
use super::signals::{self, InteractionEvent, SignalKind};
use super::svd;
use crate::config::RecommendationConfig;
use crate::error::{absorb_missing, Result};
use crate::store::{DataSource, EntityKind, Table};

/// A game and its fused score for one user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameScore {
    pub game_id: i64,
    pub score: f64,
}

/// Game and playlist recommendations for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRecommendations {
    pub game_recommendations: Vec<Recommendation>,
    pub playlist_recommendations: Vec<Recommendation>,
}

/// Events of one signal kind feeding a run
#[derive(Debug, Clone)]
pub struct SignalInput {
    pub kind: SignalKind,
    pub events: Vec<InteractionEvent>,
}

impl SignalInput {
    pub fn new(kind: SignalKind, events: Vec<InteractionEvent>) -> Self {
        Self { kind, events }
    }
}

/// Fused scores with the index sets mapping rows and columns back to ids
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    pub users: IndexSet,
    pub items: IndexSet,
    pub scores: DMatrix<f64>,
}

/// Build, normalize, reconstruct and fuse one matrix per signal
///
/// Row and column index sets are the union of every id seen across the
/// signals, so a signal with no events contributes an all-zero matrix of the
/// common shape.
pub fn compute_scores(
    signals: &[SignalInput],
    fuser: &SignalFuser,
    rank: usize,
) -> Result<ScoreMatrix> {
    let (users, items) = signals.iter().fold(
        (IndexSet::default(), IndexSet::default()),
        |(users, items), signal| {
            (
                users.union(&IndexSet::from_ids(signal.events.iter().map(|e| e.user_id))),
                items.union(&IndexSet::from_ids(signal.events.iter().map(|e| e.item_id))),
            )
        },
    );

    let reconstructed: Vec<Option<DMatrix<f64>>> = signals
        .par_iter()
        .map(|signal| {
            let matrix = InteractionMatrix::build(&signal.events, signal.kind, &users, &items);
            debug!("Built {} matrix of shape {:?}", matrix.kind(), matrix.shape());
            let normalized = normalize_rows(matrix.values());
            Some(svd::reconstruct(&normalized, rank))
        })
        .collect();

    let scores = fuser.fuse((users.len(), items.len()), &reconstructed)?;
    Ok(ScoreMatrix {
        users,
        items,
        scores,
    })
}

/// Main recommendation engine
#[derive(Clone)]
pub struct RecommendationEngine {
    source: Arc<dyn DataSource>,
    config: RecommendationConfig,
    game_fuser: SignalFuser,
}

impl RecommendationEngine {
    /// Fails with `InvalidWeights` when the game fusion weights are unusable
    pub fn new(source: Arc<dyn DataSource>, config: RecommendationConfig) -> Result<Self> {
        let game_fuser =
            SignalFuser::new(vec![config.play_time_weight, config.engagement_weight])?;
        Ok(Self {
            source,
            config,
            game_fuser,
        })
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    /// Top `game_top_k` games for every user
    ///
    /// Empty when `game_session` lacks its `user_id` or `game_id` column.
    #[instrument(skip(self))]
    pub async fn fetch_recommendations(&self) -> Result<Vec<Recommendation>> {
        let _timer = PerformanceTimer::new("fetch_recommendations");
        let Some(scores) = self.game_scores().await? else {
            return Ok(Vec::new());
        };

        let recommendations = ranker::rank_all(
            &scores.scores,
            &scores.users,
            &scores.items,
            self.config.game_top_k,
        );
        info!(
            "Ranked {} game recommendations for {} users",
            recommendations.len(),
            scores.users.len()
        );
        Ok(recommendations)
    }

    /// Top `user_top_k` games for one user; empty for unknown users
    #[instrument(skip(self))]
    pub async fn recommend_for_user(&self, user_id: i64) -> Result<Vec<GameScore>> {
        let _timer = PerformanceTimer::new("recommend_for_user");
        let Some(scores) = self.game_scores().await? else {
            return Ok(Vec::new());
        };

        let games = ranker::rank_user(
            &scores.scores,
            &scores.users,
            &scores.items,
            user_id,
            self.config.user_top_k,
        )
        .into_iter()
        .map(|r| GameScore {
            game_id: r.item_id,
            score: r.score,
        })
        .collect::<Vec<_>>();

        debug!("{} game recommendations for user {}", games.len(), user_id);
        Ok(games)
    }

    /// Play-time game recommendations plus the user's completed playlists
    ///
    /// Users without any game session get neither list.
    #[instrument(skip(self))]
    pub async fn fetch_playlist_recommendations(
        &self,
        user_id: i64,
    ) -> Result<PlaylistRecommendations> {
        let _timer = PerformanceTimer::new("fetch_playlist_recommendations");
        let (sessions, playlist_sessions) = tokio::try_join!(
            self.source.fetch_table(EntityKind::GameSession),
            self.source.fetch_table(EntityKind::PlaylistSession),
        )?;

        if !has_columns(&sessions, &["user_id", "game_id"]) {
            return Ok(PlaylistRecommendations::default());
        }
        let play_time = absorb_missing(signals::play_time_events(&sessions))?;
        let fuser = SignalFuser::new(vec![1.0])?;
        let scores = self
            .score(vec![SignalInput::new(SignalKind::PlayTime, play_time)], fuser)
            .await?;

        if scores.users.position(user_id).is_none() {
            debug!("User {} has no game sessions", user_id);
            return Ok(PlaylistRecommendations::default());
        }

        let game_recommendations = ranker::rank_user(
            &scores.scores,
            &scores.users,
            &scores.items,
            user_id,
            self.config.user_top_k,
        );

        let completed = absorb_missing(signals::completion_events(&playlist_sessions))?;
        let playlist_ids = IndexSet::from_ids(
            completed
                .iter()
                .filter(|e| e.user_id == user_id && e.magnitude > 0.0)
                .map(|e| e.item_id),
        );
        let playlist_recommendations = playlist_ids
            .ids()
            .iter()
            .take(self.config.playlist_top_k)
            .map(|&playlist_id| Recommendation {
                user_id,
                item_id: playlist_id,
                score: 1.0,
            })
            .collect();

        Ok(PlaylistRecommendations {
            game_recommendations,
            playlist_recommendations,
        })
    }

    /// Top `playlist_top_k` playlists for every user from reconstructed completions
    #[instrument(skip(self))]
    pub async fn playlist_recommendations(&self) -> Result<Vec<Recommendation>> {
        let _timer = PerformanceTimer::new("playlist_recommendations");
        let playlist_sessions = self.source.fetch_table(EntityKind::PlaylistSession).await?;
        let completions = absorb_missing(signals::completion_events(&playlist_sessions))?;
        let fuser = SignalFuser::new(vec![1.0])?;
        let scores = self
            .score(vec![SignalInput::new(SignalKind::Completion, completions)], fuser)
            .await?;

        Ok(ranker::rank_all(
            &scores.scores,
            &scores.users,
            &scores.items,
            self.config.playlist_top_k,
        ))
    }

    /// Fused play-time and engagement scores over all users and games
    ///
    /// `None` when `game_session` lacks its key columns.
    async fn game_scores(&self) -> Result<Option<ScoreMatrix>> {
        let (sessions, activity, favorites, comments) = tokio::try_join!(
            self.source.fetch_table(EntityKind::GameSession),
            self.source.fetch_table(EntityKind::Activity),
            self.source.fetch_table(EntityKind::Favorite),
            self.source.fetch_table(EntityKind::Comment),
        )?;

        if !has_columns(&sessions, &["user_id", "game_id"]) {
            return Ok(None);
        }

        let play_time = absorb_missing(signals::play_time_events(&sessions))?;
        let mut engagement =
            absorb_missing(signals::engagement_events(&activity, "target_id", "timestamp"))?;
        engagement.extend(absorb_missing(signals::engagement_events(
            &favorites,
            "game_id",
            "timestamp",
        ))?);
        engagement.extend(absorb_missing(signals::engagement_events(
            &comments,
            "game_id",
            "created_at",
        ))?);

        let signals = vec![
            SignalInput::new(SignalKind::PlayTime, play_time),
            SignalInput::new(SignalKind::Engagement, engagement),
        ];
        let scores = self.score(signals, self.game_fuser.clone()).await?;
        Ok(Some(scores))
    }

    /// Run the matrix pipeline off the async runtime
    async fn score(&self, signals: Vec<SignalInput>, fuser: SignalFuser) -> Result<ScoreMatrix> {
        metrics::counter!("playfeed_recommendation_runs_total").increment(1);
        let rank = self.config.svd_rank;
        let slow_ms = self.config.slow_stage_ms;
        tokio::task::spawn_blocking(move || {
            let timer = PerformanceTimer::new("score_matrix");
            let scores = compute_scores(&signals, &fuser, rank);
            timer.log_if_slow(slow_ms);
            scores
        })
        .await?
    }
}

/// Whether a table that carries columns has all of `names`
///
/// A table without any columns is an empty source and passes; the signal
/// extractors treat it as no events.
fn has_columns(table: &Table, names: &[&'static str]) -> bool {
    if table.columns().is_empty() && table.is_empty() {
        return true;
    }
    match table.require(names) {
        Ok(()) => true,
        Err(e) => {
            warn!("{}; returning no recommendations", e);
            metrics::counter!("playfeed_missing_columns_total").increment(1);
            false
        }
    }
}
