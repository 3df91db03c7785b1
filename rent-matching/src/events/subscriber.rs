use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;

use rent_shared::clients::rabbitmq::RabbitMQClient;
use rent_shared::types::event::{payloads, routing_keys, Event};

use crate::matching::MatchEngine;
use crate::models::ProfileUpsert;
use crate::AppState;

const QUEUE: &str = "rent-matching.profile";

/// Mirror profile saves and deactivations from the profile store.
pub async fn listen_profile_events(state: Arc<AppState>, rabbitmq: RabbitMQClient) -> anyhow::Result<()> {
    let mut consumer = rabbitmq
        .subscribe(
            QUEUE,
            &[routing_keys::PROFILE_SAVED, routing_keys::PROFILE_DEACTIVATED],
        )
        .await?;

    tracing::info!("listening for profile events");

    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                let routing_key = delivery.routing_key.as_str().to_string();
                let engine = state.engine.clone();
                let data = delivery.data.clone();

                let applied =
                    tokio::task::spawn_blocking(move || apply_profile_event(&engine, &routing_key, &data)).await;
                match applied {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "failed to apply profile event"),
                    Err(e) => tracing::error!(error = %e, "profile event task panicked"),
                }
                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
            }
        }
    }

    Ok(())
}

/// Decode one delivery and apply it. Unknown routing keys are ignored.
pub fn apply_profile_event(engine: &MatchEngine, routing_key: &str, data: &[u8]) -> anyhow::Result<()> {
    match routing_key {
        routing_keys::PROFILE_SAVED => {
            let event: Event<payloads::ProfileSaved> = serde_json::from_slice(data)?;
            let p = event.data;
            tracing::info!(user_id = %p.user_id, "received profile.saved event");
            engine.save_profile(&ProfileUpsert {
                id: p.user_id,
                display_name: p.display_name,
                bio: p.bio,
                photo_url: p.photo_url,
            })?;
        }
        routing_keys::PROFILE_DEACTIVATED => {
            let event: Event<payloads::ProfileDeactivated> = serde_json::from_slice(data)?;
            tracing::info!(user_id = %event.data.user_id, "received profile.deactivated event");
            engine.deactivate_profile(event.data.user_id)?;
        }
        other => {
            tracing::warn!(routing_key = %other, "ignoring unexpected event");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::{MemoryStore, ProfileDirectory};

    #[test]
    fn saved_then_deactivated() {
        let store = Arc::new(MemoryStore::default());
        let engine = MatchEngine::new(store.clone(), 10);
        let user_id = Uuid::new_v4();

        let saved = Event::new(
            "rent-profile",
            routing_keys::PROFILE_SAVED,
            payloads::ProfileSaved {
                user_id,
                display_name: Some("Ines".into()),
                bio: None,
                photo_url: None,
            },
        );
        apply_profile_event(&engine, routing_keys::PROFILE_SAVED, &serde_json::to_vec(&saved).unwrap()).unwrap();
        let profile = store.find_profile(user_id).unwrap().unwrap();
        assert!(profile.is_active);
        assert_eq!(profile.display_name.as_deref(), Some("Ines"));

        let gone = Event::new(
            "rent-profile",
            routing_keys::PROFILE_DEACTIVATED,
            payloads::ProfileDeactivated { user_id },
        );
        apply_profile_event(&engine, routing_keys::PROFILE_DEACTIVATED, &serde_json::to_vec(&gone).unwrap())
            .unwrap();
        assert!(!store.find_profile(user_id).unwrap().unwrap().is_active);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let engine = MatchEngine::new(Arc::new(MemoryStore::default()), 10);
        assert!(apply_profile_event(&engine, routing_keys::PROFILE_SAVED, b"{}").is_err());
        assert!(apply_profile_event(&engine, "rent.other.thing", b"{}").is_ok());
    }
}
