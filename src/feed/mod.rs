//! Dynamic feed
//!
//! Tagged feed items, the static priority table, the feed composer and the
//! batch jobs that materialize per-user feeds.

pub mod composer;
pub mod item;
pub mod jobs;
pub mod priority;

pub use composer::{FeedPolicy, FeedPools};
pub use item::{DynamicItem, ItemKind, ItemPayload};
pub use jobs::{FeedEntry, FeedJobs, JobReport};
pub use priority::calculate_priority;
