//! Dynamic feed items
//!
//! Items are stored as an `item_type` discriminator plus a JSON `content`
//! payload. In memory they are a tagged [`ItemPayload`]; content that does not
//! decode, or a type the engine does not recognize, stays readable as
//! [`ItemPayload::Raw`]. The kind of an item always follows its `item_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{Cell, Table};

/// Known item discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Activity,
    Recommendation,
    Ad,
    PlaylistRecommendation,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Activity => "activity",
            ItemKind::Recommendation => "recommendation",
            ItemKind::Ad => "ad",
            ItemKind::PlaylistRecommendation => "playlist_recommendation",
        }
    }

    pub fn parse(item_type: &str) -> Option<Self> {
        match item_type {
            "activity" => Some(ItemKind::Activity),
            "recommendation" => Some(ItemKind::Recommendation),
            "ad" => Some(ItemKind::Ad),
            "playlist_recommendation" => Some(ItemKind::PlaylistRecommendation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organic activity surfaced in feeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityContent {
    pub activity_id: i64,
    pub user_id: i64,
    pub target_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A game recommended to one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecommendationContent {
    pub user_id: i64,
    pub game_id: i64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdContent {
    pub ad_content: String,
}

/// A playlist recommended to one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRecommendationContent {
    pub user_id: i64,
    pub playlist_id: i64,
    pub score: f64,
}

/// Item content tagged by its kind
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPayload {
    Activity(ActivityContent),
    Recommendation(GameRecommendationContent),
    Ad(AdContent),
    PlaylistRecommendation(PlaylistRecommendationContent),
    /// Stored content kept as is; `kind` is set when `item_type` is recognized
    Raw {
        kind: Option<ItemKind>,
        item_type: String,
        content: Value,
    },
}

impl ItemPayload {
    pub fn kind(&self) -> Option<ItemKind> {
        match self {
            ItemPayload::Activity(_) => Some(ItemKind::Activity),
            ItemPayload::Recommendation(_) => Some(ItemKind::Recommendation),
            ItemPayload::Ad(_) => Some(ItemKind::Ad),
            ItemPayload::PlaylistRecommendation(_) => Some(ItemKind::PlaylistRecommendation),
            ItemPayload::Raw { kind, .. } => *kind,
        }
    }

    /// The stored `item_type` discriminator
    pub fn item_type(&self) -> &str {
        match self {
            ItemPayload::Raw { item_type, .. } => item_type,
            known => known.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// The stored JSON `content`
    pub fn content(&self) -> Result<Value> {
        let value = match self {
            ItemPayload::Activity(c) => serde_json::to_value(c)?,
            ItemPayload::Recommendation(c) => serde_json::to_value(c)?,
            ItemPayload::Ad(c) => serde_json::to_value(c)?,
            ItemPayload::PlaylistRecommendation(c) => serde_json::to_value(c)?,
            ItemPayload::Raw { content, .. } => content.clone(),
        };
        Ok(value)
    }

    /// Rebuild a payload from its stored parts
    ///
    /// Content that does not decode for its declared type is kept as `Raw`
    /// with the declared kind.
    pub fn from_parts(item_type: &str, content: Value) -> Self {
        let kind = ItemKind::parse(item_type);
        let decoded = match kind {
            Some(ItemKind::Activity) => serde_json::from_value(content.clone())
                .ok()
                .map(ItemPayload::Activity),
            Some(ItemKind::Recommendation) => serde_json::from_value(content.clone())
                .ok()
                .map(ItemPayload::Recommendation),
            Some(ItemKind::Ad) => serde_json::from_value(content.clone())
                .ok()
                .map(ItemPayload::Ad),
            Some(ItemKind::PlaylistRecommendation) => serde_json::from_value(content.clone())
                .ok()
                .map(ItemPayload::PlaylistRecommendation),
            None => None,
        };

        decoded.unwrap_or_else(|| ItemPayload::Raw {
            kind,
            item_type: item_type.to_string(),
            content,
        })
    }

    /// User the item was produced for, if it is targeted
    pub fn target_user(&self) -> Option<i64> {
        match self {
            ItemPayload::Recommendation(c) => Some(c.user_id),
            ItemPayload::PlaylistRecommendation(c) => Some(c.user_id),
            ItemPayload::Raw {
                kind: Some(ItemKind::Recommendation | ItemKind::PlaylistRecommendation),
                content,
                ..
            } => content.get("user_id").and_then(Value::as_i64),
            _ => None,
        }
    }
}

/// A persisted dynamic item
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicItem {
    pub item_id: i64,
    pub payload: ItemPayload,
    pub created_at: Option<DateTime<Utc>>,
}

impl DynamicItem {
    /// Decode every row of a `dynamic_item` table
    pub fn from_table(table: &Table) -> Result<Vec<DynamicItem>> {
        if table.is_empty() {
            return Ok(Vec::new());
        }
        let id_col = table.column("item_id")?;
        let type_col = table.column("item_type")?;
        let content_col = table.column("content")?;
        let created_col = table.column("created_at").ok();

        let items = table
            .rows()
            .filter_map(|row| {
                let item_id = row[id_col].as_i64()?;
                let item_type = row[type_col].as_str()?;
                let content = match &row[content_col] {
                    Cell::Json(v) => v.clone(),
                    Cell::Text(s) => serde_json::from_str(s).unwrap_or(Value::String(s.clone())),
                    _ => Value::Null,
                };
                Some(DynamicItem {
                    item_id,
                    payload: ItemPayload::from_parts(item_type, content),
                    created_at: created_col.and_then(|c| row[c].as_timestamp()),
                })
            })
            .collect();

        Ok(items)
    }
}
