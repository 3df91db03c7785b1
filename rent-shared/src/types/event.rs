use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `rent.{domain}.{entity}.{action}`
/// Example: `rent.matching.match.created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    // Profile store events (consumed)
    pub const PROFILE_SAVED: &str = "rent.profile.user.saved";
    pub const PROFILE_DEACTIVATED: &str = "rent.profile.user.deactivated";

    // Matching events (published)
    pub const MATCHING_LIKE_SENT: &str = "rent.matching.like.sent";
    pub const MATCHING_LIKE_REVOKED: &str = "rent.matching.like.revoked";
    pub const MATCHING_MATCH_CREATED: &str = "rent.matching.match.created";
    pub const MATCHING_MATCH_RETRACTED: &str = "rent.matching.match.retracted";
}

/// Common event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ProfileSaved {
        pub user_id: Uuid,
        pub display_name: Option<String>,
        pub bio: Option<String>,
        pub photo_url: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ProfileDeactivated {
        pub user_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LikeSent {
        pub actor_id: Uuid,
        pub target_id: Uuid,
        /// `user` or `listing`
        pub target_kind: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LikeRevoked {
        pub actor_id: Uuid,
        pub target_id: Uuid,
        pub target_kind: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchCreated {
        pub match_id: Uuid,
        pub user_a_id: Uuid,
        pub user_b_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchRetracted {
        pub match_id: Uuid,
        pub user_a_id: Uuid,
        pub user_b_id: Uuid,
        /// The member whose revoked like dissolved the match.
        pub retracted_by: Uuid,
    }
}
