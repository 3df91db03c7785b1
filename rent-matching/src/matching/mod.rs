pub mod engine;
pub mod visibility;

pub use engine::{LikeOutcome, MatchEngine, MatchView, PotentialMatch, UnlikeOutcome};
pub use visibility::VisibilityGate;
