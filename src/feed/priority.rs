//! Static priority table
//!
//! Priorities are a fixed lookup by item kind, not a learned score.
//! Playlist recommendations carry their own reconstructed score instead.

use super::item::{ItemKind, ItemPayload};

pub const ACTIVITY_PRIORITY: f64 = 10.0;
pub const RECOMMENDATION_PRIORITY: f64 = 5.0;
pub const AD_PRIORITY: f64 = 1.0;
pub const DEFAULT_PRIORITY: f64 = 0.0;

/// Priority of an item for any user, by its declared kind
pub fn calculate_priority(payload: &ItemPayload) -> f64 {
    match payload.kind() {
        Some(ItemKind::Activity) => ACTIVITY_PRIORITY,
        Some(ItemKind::Recommendation) => RECOMMENDATION_PRIORITY,
        Some(ItemKind::Ad) => AD_PRIORITY,
        Some(ItemKind::PlaylistRecommendation) | None => DEFAULT_PRIORITY,
    }
}

/// Whether the population job owns this item's priority rows
pub fn has_static_priority(payload: &ItemPayload) -> bool {
    payload.kind() != Some(ItemKind::PlaylistRecommendation)
}
