//! Recommendation Module
//!
//! Collapses behavioral signals into low-rank latent scores and ranks
//! candidates per user.
//!
//! ## Pipeline
//!
//! 1. **Signals** - Extract interaction events from source tables
//! 2. **Matrix** - Aggregate events into dense users x items matrices over shared [`IndexSet`]s
//! 3. **Normalize** - Row-wise max normalization into [0, 1]
//! 4. **SVD** - Truncated SVD reconstruction (zeros on failure)
//! 5. **Fusion** - Fixed weighted sum of the reconstructed matrices
//! 6. **Ranker** - Per-user top-K with deterministic tie-breaking
//!
//! [`RecommendationEngine`] runs the pipeline against a [`crate::store::DataSource`].

pub mod engine;
pub mod fusion;
pub mod index;
pub mod matrix;
pub mod metrics;
pub mod normalize;
pub mod ranker;
pub mod signals;
pub mod svd;

pub use engine::{GameScore, PlaylistRecommendations, RecommendationEngine};
pub use index::IndexSet;
pub use ranker::Recommendation;
pub use signals::{InteractionEvent, SignalKind};
