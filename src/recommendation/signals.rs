//! Interaction signals
//!
//! Turns fetched source tables into [`InteractionEvent`]s. Each extractor
//! fails with `MissingColumn` when a required column is absent; an empty
//! table always yields no events.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::Table;

/// Kind of behavioral signal carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Seconds played
    PlayTime,
    /// Number of engagement events
    Engagement,
    /// Whether the item was completed
    Completion,
    /// Rating on a 0-5 scale
    Rating,
}

/// How multiple events for the same (user, item) pair collapse into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Count,
    Any,
    Mean,
}

impl SignalKind {
    pub fn reducer(&self) -> Reducer {
        match self {
            SignalKind::PlayTime => Reducer::Sum,
            SignalKind::Engagement => Reducer::Count,
            SignalKind::Completion => Reducer::Any,
            SignalKind::Rating => Reducer::Mean,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::PlayTime => "play_time",
            SignalKind::Engagement => "engagement",
            SignalKind::Completion => "completion",
            SignalKind::Rating => "rating",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEvent {
    pub user_id: i64,
    pub item_id: i64,
    pub kind: SignalKind,
    pub magnitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Play time per (user, game) from `game_session.session_total_time`
///
/// Durations are converted to seconds; a null duration still registers the
/// pair with zero seconds.
pub fn play_time_events(sessions: &Table) -> Result<Vec<InteractionEvent>> {
    if sessions.is_empty() {
        return Ok(Vec::new());
    }
    let user_col = sessions.column("user_id")?;
    let game_col = sessions.column("game_id")?;
    let time_col = sessions.column("session_total_time")?;
    let ts_col = sessions.column("created_at").ok();

    Ok(sessions
        .rows()
        .filter_map(|row| {
            Some(InteractionEvent {
                user_id: row[user_col].as_i64()?,
                item_id: row[game_col].as_i64()?,
                kind: SignalKind::PlayTime,
                magnitude: row[time_col].as_f64().unwrap_or(0.0),
                timestamp: ts_col.and_then(|c| row[c].as_timestamp()),
            })
        })
        .collect())
}

/// One engagement event per row, keyed by `user_id` and `item_column`
///
/// Rows with a null item (e.g. comments not attached to a game) are skipped.
pub fn engagement_events(
    table: &Table,
    item_column: &'static str,
    timestamp_column: &'static str,
) -> Result<Vec<InteractionEvent>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }
    let user_col = table.column("user_id")?;
    let item_col = table.column(item_column)?;
    let ts_col = table.column(timestamp_column).ok();

    Ok(table
        .rows()
        .filter_map(|row| {
            Some(InteractionEvent {
                user_id: row[user_col].as_i64()?,
                item_id: row[item_col].as_i64()?,
                kind: SignalKind::Engagement,
                magnitude: 1.0,
                timestamp: ts_col.and_then(|c| row[c].as_timestamp()),
            })
        })
        .collect())
}

/// Playlist completion per (user, playlist) from `playlist_session.completed`
pub fn completion_events(playlist_sessions: &Table) -> Result<Vec<InteractionEvent>> {
    if playlist_sessions.is_empty() {
        return Ok(Vec::new());
    }
    let user_col = playlist_sessions.column("user_id")?;
    let playlist_col = playlist_sessions.column("playlist_id")?;
    let completed_col = playlist_sessions.column("completed")?;
    let ts_col = playlist_sessions
        .column("updated_at")
        .or_else(|_| playlist_sessions.column("created_at"))
        .ok();

    Ok(playlist_sessions
        .rows()
        .filter_map(|row| {
            let completed = row[completed_col].as_bool().unwrap_or(false);
            Some(InteractionEvent {
                user_id: row[user_col].as_i64()?,
                item_id: row[playlist_col].as_i64()?,
                kind: SignalKind::Completion,
                magnitude: if completed { 1.0 } else { 0.0 },
                timestamp: ts_col.and_then(|c| row[c].as_timestamp()),
            })
        })
        .collect())
}
