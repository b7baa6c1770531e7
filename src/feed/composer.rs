//! Feed composition
//!
//! Activities are consumed in fixed-size chunks. Each chunk is followed by one
//! recommendation while any remain, and chunks starting at a multiple of the ad
//! interval are also followed by one ad. Composition stops when activities run
//! out, so leftover recommendations and ads are not placed.

use crate::config::FeedConfig;

/// Placement cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPolicy {
    pub chunk_size: usize,
    pub ad_interval: usize,
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            ad_interval: 6,
        }
    }
}

impl From<&FeedConfig> for FeedPolicy {
    fn from(config: &FeedConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            ad_interval: config.ad_interval.max(1),
        }
    }
}

/// Candidate pools, each already ordered by descending priority
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPools<T> {
    pub activities: Vec<T>,
    pub recommendations: Vec<T>,
    pub ads: Vec<T>,
}

impl<T> Default for FeedPools<T> {
    fn default() -> Self {
        Self {
            activities: Vec::new(),
            recommendations: Vec::new(),
            ads: Vec::new(),
        }
    }
}

impl FeedPolicy {
    /// Interleave the pools into one ordered feed
    pub fn compose<T>(&self, pools: FeedPools<T>) -> Vec<T> {
        let chunk_size = self.chunk_size.max(1);
        let ad_interval = self.ad_interval.max(1);

        let mut recommendations = pools.recommendations.into_iter();
        let mut ads = pools.ads.into_iter();
        let mut feed = Vec::with_capacity(pools.activities.len() * 2);
        let mut activities = pools.activities.into_iter().peekable();
        let mut offset = 0;

        while activities.peek().is_some() {
            feed.extend(activities.by_ref().take(chunk_size));
            if let Some(rec) = recommendations.next() {
                feed.push(rec);
            }
            if offset % ad_interval == 0 {
                if let Some(ad) = ads.next() {
                    feed.push(ad);
                }
            }
            offset += chunk_size;
        }

        feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools(activities: usize, recommendations: usize, ads: usize) -> FeedPools<String> {
        FeedPools {
            activities: (1..=activities).map(|i| format!("a{}", i)).collect(),
            recommendations: (1..=recommendations).map(|i| format!("r{}", i)).collect(),
            ads: (1..=ads).map(|i| format!("ad{}", i)).collect(),
        }
    }

    #[test]
    fn test_compose_nine_activities() {
        let feed = FeedPolicy::default().compose(pools(9, 2, 1));
        assert_eq!(
            feed,
            vec![
                "a1", "a2", "a3", "r1", "ad1", "a4", "a5", "a6", "r2", "a7", "a8", "a9"
            ]
        );
    }

    #[test]
    fn test_ad_every_other_chunk() {
        let feed = FeedPolicy::default().compose(pools(12, 0, 3));
        assert_eq!(
            feed,
            vec!["a1", "a2", "a3", "ad1", "a4", "a5", "a6", "a7", "a8", "a9", "ad2", "a10", "a11", "a12"]
        );
    }

    #[test]
    fn test_partial_last_chunk_still_gets_recommendation() {
        let feed = FeedPolicy::default().compose(pools(4, 3, 0));
        assert_eq!(feed, vec!["a1", "a2", "a3", "r1", "a4", "r2"]);
    }

    #[test]
    fn test_no_activities_drops_everything() {
        let feed = FeedPolicy::default().compose(pools(0, 2, 1));
        assert!(feed.is_empty());
    }
}
