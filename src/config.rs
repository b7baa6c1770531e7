//! Configuration management for the Playfeed engine
//!
//! Strongly-typed configuration with validation, environment variable parsing,
//! and defaults matching the production recommendation settings.
//!
//! # Example
//! ```no_run
//! use playfeed::Config;
//! let config = Config::from_env().expect("failed to load config");
//! println!("SVD rank: {}", config.recommendation.svd_rank);
//! ```

use crate::error::{Error, Result};
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Recommendation engine configuration
    pub recommendation: RecommendationConfig,
    /// Feed composition and population configuration
    pub feed: FeedConfig,
    /// Scheduled batch job configuration
    pub jobs: JobsConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections to keep open
    pub min_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Idle timeout for connections
    pub idle_timeout: Duration,
    /// Maximum lifetime for connections
    pub max_lifetime: Duration,
    /// Enable statement caching
    pub statement_cache_size: usize,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Port to listen on
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Port for the Prometheus exporter (feature `prometheus`)
    pub metrics_port: u16,
}

/// Recommendation engine configuration
#[derive(Debug, Clone)]
pub struct RecommendationConfig {
    /// Target rank for the truncated SVD
    pub svd_rank: usize,
    /// Items kept per user for general game recommendations
    pub game_top_k: usize,
    /// Items returned by the per-user endpoint
    pub user_top_k: usize,
    /// Playlists kept per user
    pub playlist_top_k: usize,
    /// Fusion weight of the play-time signal
    pub play_time_weight: f64,
    /// Fusion weight of the engagement signal
    pub engagement_weight: f64,
    /// Scoring runs slower than this many milliseconds are logged as warnings
    pub slow_stage_ms: u64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            svd_rank: 2,
            game_top_k: 10,
            user_top_k: 5,
            playlist_top_k: 5,
            play_time_weight: 0.5,
            engagement_weight: 0.5,
            slow_stage_ms: 2000,
        }
    }
}

/// Feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Activities fetched per user when composing a feed
    pub activity_limit: usize,
    /// Recommendations fetched per user when composing a feed
    pub recommendation_limit: usize,
    /// Ads fetched per user when composing a feed
    pub ad_limit: usize,
    /// Activities consumed per chunk
    pub chunk_size: usize,
    /// Chunks starting at a multiple of this offset are followed by an ad
    pub ad_interval: usize,
    /// Static ads created per population run
    pub static_ad_count: usize,
    /// Content of the static ads
    pub static_ad_text: String,
    /// Commits slower than this many milliseconds are logged as warnings
    pub slow_commit_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            activity_limit: 6,
            recommendation_limit: 2,
            ad_limit: 1,
            chunk_size: 3,
            ad_interval: 6,
            static_ad_count: 10,
            static_ad_text: "Buy now!".to_string(),
            slow_commit_ms: 2000,
        }
    }
}

/// Scheduled job configuration
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// How often to rerun every batch job; `None` disables the schedule
    pub interval: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Platforms that mount secrets as files point FFOLDER at a directory where
        // each file name is the variable name and its contents is the value.
        if let Ok(folder) = std::env::var("FFOLDER") {
            let p = std::path::Path::new(&folder);
            if p.is_dir() {
                match std::fs::read_dir(p) {
                    Ok(entries) => {
                        for entry in entries.flatten() {
                            let path = entry.path();
                            let Ok(name) = entry.file_name().into_string() else {
                                continue;
                            };
                            if !path.is_file() || std::env::var(&name).is_ok() {
                                continue;
                            }
                            if let Ok(contents) = std::fs::read_to_string(&path) {
                                std::env::set_var(&name, contents.trim());
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to read FFOLDER {}: {}", folder, err);
                    }
                }
                info!("Loaded configuration from FFOLDER={}", folder);
            }
        } else {
            // Try to load .env file (ignore if not found)
            dotenvy::dotenv().ok();
        }

        let config = Self {
            database: DatabaseConfig::from_env()?,
            api: ApiConfig::from_env()?,
            recommendation: RecommendationConfig::from_env()?,
            feed: FeedConfig::from_env()?,
            jobs: JobsConfig::from_env()?,
        };

        config.validate()?;
        config.log_summary();

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections < self.database.min_connections {
            return Err(Error::InvalidConfig {
                key: "DB_MAX_CONNECTIONS",
                message: "max_connections must be >= min_connections".into(),
            });
        }

        let rec = &self.recommendation;
        for (key, weight) in [
            ("REC_PLAY_TIME_WEIGHT", rec.play_time_weight),
            ("REC_ENGAGEMENT_WEIGHT", rec.engagement_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidConfig {
                    key,
                    message: format!("weight must be a nonnegative number, got {}", weight).into(),
                });
            }
        }
        let total = rec.play_time_weight + rec.engagement_weight;
        if (total - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidConfig {
                key: "REC_PLAY_TIME_WEIGHT",
                message: format!("fusion weights must sum to 1, got {}", total).into(),
            });
        }

        for (key, value) in [
            ("REC_SVD_RANK", rec.svd_rank),
            ("REC_GAME_TOP_K", rec.game_top_k),
            ("REC_USER_TOP_K", rec.user_top_k),
            ("REC_PLAYLIST_TOP_K", rec.playlist_top_k),
            ("FEED_CHUNK_SIZE", self.feed.chunk_size),
            ("FEED_AD_INTERVAL", self.feed.ad_interval),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig {
                    key,
                    message: "must be at least 1".into(),
                });
            }
        }

        Ok(())
    }

    /// Log configuration summary (without sensitive data)
    fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Database:");
        info!("    URL: {}", mask_url(&self.database.url));
        info!(
            "    Pool Size: {}-{}",
            self.database.min_connections, self.database.max_connections
        );
        info!("  API:");
        info!("    Listening on: {}:{}", self.api.host, self.api.port);
        info!("  Recommendation:");
        info!(
            "    SVD rank: {}, top-k (games/user/playlists): {}/{}/{}",
            self.recommendation.svd_rank,
            self.recommendation.game_top_k,
            self.recommendation.user_top_k,
            self.recommendation.playlist_top_k
        );
        info!(
            "    Weights (play time/engagement): {}/{}",
            self.recommendation.play_time_weight, self.recommendation.engagement_weight
        );
        info!(
            "  Slow thresholds (scoring/commit): {}ms/{}ms",
            self.recommendation.slow_stage_ms, self.feed.slow_commit_ms
        );
        match self.jobs.interval {
            Some(interval) => info!("  Jobs: every {:?}", interval),
            None => info!("  Jobs: on demand only"),
        }
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = get_env("DATABASE_URL").unwrap_or_else(|_| {
            let user = std::env::var("USER").unwrap_or_else(|_| "postgres".to_string());
            format!("postgres://{}@localhost/playfeed_dev", user)
        });

        Ok(Self {
            url,
            max_connections: get_env_parsed_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: get_env_parsed_or("DB_MIN_CONNECTIONS", 2)?,
            connect_timeout: Duration::from_secs(get_env_parsed_or("DB_CONNECT_TIMEOUT_SECS", 30)?),
            idle_timeout: Duration::from_secs(get_env_parsed_or("DB_IDLE_TIMEOUT_SECS", 600)?),
            max_lifetime: Duration::from_secs(get_env_parsed_or("DB_MAX_LIFETIME_SECS", 3600)?),
            statement_cache_size: get_env_parsed_or("DB_STATEMENT_CACHE_SIZE", 100)?,
        })
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            port: get_env_parsed_or("API_PORT", 8080)?,
            host: get_env_or("API_HOST", "0.0.0.0"),
            request_timeout: Duration::from_secs(get_env_parsed_or(
                "API_REQUEST_TIMEOUT_SECS",
                120,
            )?),
            cors_enabled: get_env_parsed_or("API_CORS_ENABLED", true)?,
            metrics_port: get_env_parsed_or("METRICS_PORT", 9000)?,
        })
    }
}

impl RecommendationConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            svd_rank: get_env_parsed_or("REC_SVD_RANK", defaults.svd_rank)?,
            game_top_k: get_env_parsed_or("REC_GAME_TOP_K", defaults.game_top_k)?,
            user_top_k: get_env_parsed_or("REC_USER_TOP_K", defaults.user_top_k)?,
            playlist_top_k: get_env_parsed_or("REC_PLAYLIST_TOP_K", defaults.playlist_top_k)?,
            play_time_weight: get_env_parsed_or("REC_PLAY_TIME_WEIGHT", defaults.play_time_weight)?,
            engagement_weight: get_env_parsed_or(
                "REC_ENGAGEMENT_WEIGHT",
                defaults.engagement_weight,
            )?,
            slow_stage_ms: get_env_parsed_or("REC_SLOW_STAGE_MS", defaults.slow_stage_ms)?,
        })
    }
}

impl FeedConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            activity_limit: get_env_parsed_or("FEED_ACTIVITY_LIMIT", defaults.activity_limit)?,
            recommendation_limit: get_env_parsed_or(
                "FEED_RECOMMENDATION_LIMIT",
                defaults.recommendation_limit,
            )?,
            ad_limit: get_env_parsed_or("FEED_AD_LIMIT", defaults.ad_limit)?,
            chunk_size: get_env_parsed_or("FEED_CHUNK_SIZE", defaults.chunk_size)?,
            ad_interval: get_env_parsed_or("FEED_AD_INTERVAL", defaults.ad_interval)?,
            static_ad_count: get_env_parsed_or("FEED_STATIC_AD_COUNT", defaults.static_ad_count)?,
            static_ad_text: get_env_or("FEED_STATIC_AD_TEXT", &defaults.static_ad_text),
            slow_commit_ms: get_env_parsed_or("FEED_SLOW_COMMIT_MS", defaults.slow_commit_ms)?,
        })
    }
}

impl JobsConfig {
    fn from_env() -> Result<Self> {
        let secs: u64 = get_env_parsed_or("JOBS_INTERVAL_SECS", 0)?;
        Ok(Self {
            interval: (secs > 0).then(|| Duration::from_secs(secs)),
        })
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Get required environment variable
fn get_env(key: &'static str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::MissingEnvVar { var: key })
}

/// Get environment variable with default
fn get_env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, rejecting values that do not parse
fn get_env_parsed_or<T>(key: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
            key,
            message: format!("Invalid value '{}': {}", value, e).into(),
        }),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive parts of URL
fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // Skip the scheme separator in "postgres://user@host"
            if url[colon_pos..].starts_with("://") {
                return url.to_string();
            }
            return format!("{}****{}", &url[..=colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
