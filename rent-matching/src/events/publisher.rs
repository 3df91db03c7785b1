use uuid::Uuid;

use rent_shared::clients::rabbitmq::RabbitMQClient;
use rent_shared::types::event::{payloads, routing_keys, Event};

use crate::models::{LikeTarget, Match};

const SOURCE: &str = "rent-matching";

pub async fn publish_like_sent(rabbitmq: &RabbitMQClient, actor_id: Uuid, target: LikeTarget) {
    let event = Event::new(
        SOURCE,
        routing_keys::MATCHING_LIKE_SENT,
        payloads::LikeSent {
            actor_id,
            target_id: target.id(),
            target_kind: target.kind().to_string(),
        },
    )
    .with_user(actor_id);

    if let Err(e) = rabbitmq.publish(routing_keys::MATCHING_LIKE_SENT, &event).await {
        tracing::error!(error = %e, "failed to publish like.sent event");
    }
}

pub async fn publish_like_revoked(rabbitmq: &RabbitMQClient, actor_id: Uuid, target: LikeTarget) {
    let event = Event::new(
        SOURCE,
        routing_keys::MATCHING_LIKE_REVOKED,
        payloads::LikeRevoked {
            actor_id,
            target_id: target.id(),
            target_kind: target.kind().to_string(),
        },
    )
    .with_user(actor_id);

    if let Err(e) = rabbitmq.publish(routing_keys::MATCHING_LIKE_REVOKED, &event).await {
        tracing::error!(error = %e, "failed to publish like.revoked event");
    }
}

/// Sent once per match, by the request that inserted it.
pub async fn publish_match_created(rabbitmq: &RabbitMQClient, record: &Match, actor_id: Uuid) {
    let event = Event::new(
        SOURCE,
        routing_keys::MATCHING_MATCH_CREATED,
        payloads::MatchCreated {
            match_id: record.id,
            user_a_id: record.user_a_id,
            user_b_id: record.user_b_id,
        },
    )
    .with_user(actor_id);

    if let Err(e) = rabbitmq.publish(routing_keys::MATCHING_MATCH_CREATED, &event).await {
        tracing::error!(error = %e, match_id = %record.id, "failed to publish match.created event");
    }
}

pub async fn publish_match_retracted(rabbitmq: &RabbitMQClient, record: &Match, retracted_by: Uuid) {
    let event = Event::new(
        SOURCE,
        routing_keys::MATCHING_MATCH_RETRACTED,
        payloads::MatchRetracted {
            match_id: record.id,
            user_a_id: record.user_a_id,
            user_b_id: record.user_b_id,
            retracted_by,
        },
    )
    .with_user(retracted_by);

    if let Err(e) = rabbitmq.publish(routing_keys::MATCHING_MATCH_RETRACTED, &event).await {
        tracing::error!(error = %e, match_id = %record.id, "failed to publish match.retracted event");
    }
}
