// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Device actor behavior through the actor system: bounded sessions with
//! coupled subscription eviction, activity reporting and stats flushing.

use device::{
    ActivityStrategyType, DeviceActor, DeviceActorConfig, DeviceEvent,
    DeviceMessage, DeviceResponse, SessionId, SessionMeta, SubscriptionInfo,
};
use runtime::{ActorSystem, EntityId, EntityType, StopReason};

use tokio_util::sync::CancellationToken;

use std::time::Duration;

fn meta(transport: &str) -> SessionMeta {
    SessionMeta {
        transport: transport.to_owned(),
        node: "node-a".to_owned(),
        last_activity_time: 0,
    }
}

fn config(max_sessions: usize) -> DeviceActorConfig {
    DeviceActorConfig {
        max_concurrent_sessions_per_device: max_sessions,
        stats_interval: Duration::from_millis(50),
        activity_strategy: ActivityStrategyType::FirstAndLast,
    }
}

#[tokio::test]
async fn session_limit_evicts_oldest_with_subscriptions() {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move {
        runner.run().await;
    });

    let device_id = EntityId::random(EntityType::Device);
    let actor_ref = system
        .create_root_actor("device", DeviceActor::new(device_id, &config(2)))
        .await
        .unwrap();

    let first = SessionId::random();
    let second = SessionId::random();
    let third = SessionId::random();
    for session_id in [first, second] {
        actor_ref
            .ask(DeviceMessage::SessionOpen {
                session_id,
                meta: meta("mqtt"),
            })
            .await
            .unwrap();
    }
    actor_ref
        .ask(DeviceMessage::SubscribeAttributes {
            session_id: first,
            info: SubscriptionInfo { since: 1 },
        })
        .await
        .unwrap();
    actor_ref
        .ask(DeviceMessage::SubscribeRpc {
            session_id: first,
            info: SubscriptionInfo { since: 1 },
        })
        .await
        .unwrap();

    // Third session overflows the limit of two: the oldest goes, and its
    // subscriptions go with it.
    actor_ref
        .ask(DeviceMessage::SessionOpen {
            session_id: third,
            meta: meta("coap"),
        })
        .await
        .unwrap();

    let sessions = match actor_ref.ask(DeviceMessage::GetSessions).await.unwrap() {
        DeviceResponse::Sessions(sessions) => sessions,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(sessions.len(), 2);
    assert!(!sessions.contains(&first));

    match actor_ref.ask(DeviceMessage::GetSubscribers).await.unwrap() {
        DeviceResponse::Subscribers { attributes, rpc } => {
            assert!(attributes.is_empty());
            assert!(rpc.is_empty());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn telemetry_reports_activity_and_flushes_stats() {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move {
        runner.run().await;
    });

    let device_id = EntityId::random(EntityType::Device);
    let actor_ref = system
        .create_root_actor("device", DeviceActor::new(device_id, &config(2)))
        .await
        .unwrap();
    let mut events = actor_ref.subscribe();

    actor_ref
        .ask(DeviceMessage::Telemetry {
            time: 100,
            session_id: None,
            payload: b"t=21".to_vec(),
        })
        .await
        .unwrap();

    // First occurrence of the period reports immediately.
    match events.recv().await.unwrap() {
        DeviceEvent::ActivityReported { device, time } => {
            assert_eq!(device, device_id);
            assert_eq!(time, 100);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The stats tick flushes the processed counter.
    match events.recv().await.unwrap() {
        DeviceEvent::StatsFlushed {
            processed, failed, ..
        } => {
            assert_eq!(processed, 1);
            assert_eq!(failed, 0);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Counters reset after the flush.
    match actor_ref.ask(DeviceMessage::GetStats).await.unwrap() {
        DeviceResponse::Stats { processed, .. } => assert_eq!(processed, 0),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn empty_telemetry_fails_and_is_counted() {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move {
        runner.run().await;
    });

    let device_id = EntityId::random(EntityType::Device);
    let actor_ref = system
        .create_root_actor("device", DeviceActor::new(device_id, &config(2)))
        .await
        .unwrap();

    let result = actor_ref
        .ask(DeviceMessage::Telemetry {
            time: 1,
            session_id: None,
            payload: vec![],
        })
        .await;
    assert!(result.is_err());

    match actor_ref.ask(DeviceMessage::GetStats).await.unwrap() {
        DeviceResponse::Stats { failed, .. } => assert_eq!(failed, 1),
        other => panic!("unexpected response: {:?}", other),
    }

    actor_ref.ask_stop(StopReason::EntityDeleted).await.unwrap();
}
