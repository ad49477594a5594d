// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Device actor
//!
//! The busiest actor kind: one per device, owning its transport sessions, the
//! attribute and RPC subscriptions bound to them, its activity record and its
//! processing counters. Session capacity and the activity strategy are read
//! once from configuration at construction.
//!
//! A periodic self-tick closes the activity reporting period and flushes the
//! counters as a stats event; both reach observers through the actor's event
//! channel.

use crate::{
    activity::{ActivityState, ActivityStrategyType},
    session::{SessionId, SessionMeta, SessionStore, SubscriptionInfo},
};

use runtime::{
    Actor, ActorContext, ActorPath, EntityId, Error, Event, Handler, Message,
    Response, StopReason,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tracing::{debug, info};

use std::time::Duration;

/// Static-at-construction settings for device actors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceActorConfig {
    /// Session capacity per device; the oldest session is evicted beyond it.
    pub max_concurrent_sessions_per_device: usize,
    /// Interval of the stats/activity flush tick.
    pub stats_interval: Duration,
    /// Which activity occurrences get reported.
    pub activity_strategy: ActivityStrategyType,
}

impl Default for DeviceActorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions_per_device: 1,
            stats_interval: Duration::from_secs(60),
            activity_strategy: ActivityStrategyType::Last,
        }
    }
}

/// Messages a device actor processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceMessage {
    /// A transport opened a session to this device.
    SessionOpen {
        session_id: SessionId,
        meta: SessionMeta,
    },
    /// A transport closed a session.
    SessionClose { session_id: SessionId },
    SubscribeAttributes {
        session_id: SessionId,
        info: SubscriptionInfo,
    },
    UnsubscribeAttributes { session_id: SessionId },
    SubscribeRpc {
        session_id: SessionId,
        info: SubscriptionInfo,
    },
    UnsubscribeRpc { session_id: SessionId },
    /// Inbound telemetry from the device.
    Telemetry {
        time: u64,
        session_id: Option<SessionId>,
        payload: Vec<u8>,
    },
    GetSessions,
    GetSubscribers,
    GetStats,
}

impl Message for DeviceMessage {}

/// Responses for ask-pattern interactions.
#[derive(Debug, Clone)]
pub enum DeviceResponse {
    Accepted,
    Sessions(Vec<SessionId>),
    Subscribers {
        attributes: Vec<SessionId>,
        rpc: Vec<SessionId>,
    },
    Stats {
        processed: u64,
        failed: u64,
        evictions: u64,
    },
}

impl Response for DeviceResponse {}

/// Events published for the stats sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Periodic counter flush. Eviction counts surface here so undersized
    /// session limits are visible to operators.
    StatsFlushed {
        device: EntityId,
        processed: u64,
        failed: u64,
        evictions: u64,
    },
    /// Device activity worth reporting downstream.
    ActivityReported { device: EntityId, time: u64 },
}

impl Event for DeviceEvent {}

/// Per-device state machine.
pub struct DeviceActor {
    device_id: EntityId,
    sessions: SessionStore,
    activity: ActivityState,
    stats_interval: Duration,
    processed: u64,
    failed: u64,
    /// Eviction total at the last flush, to report deltas.
    flushed_evictions: u64,
}

impl DeviceActor {
    pub fn new(device_id: EntityId, config: &DeviceActorConfig) -> Self {
        Self {
            device_id,
            sessions: SessionStore::new(config.max_concurrent_sessions_per_device),
            activity: ActivityState::new(config.activity_strategy),
            stats_interval: config.stats_interval,
            processed: 0,
            failed: 0,
            flushed_evictions: 0,
        }
    }

    async fn flush_stats(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        let evictions = self.sessions.evictions() - self.flushed_evictions;
        if self.processed == 0 && self.failed == 0 && evictions == 0 {
            return Ok(());
        }
        ctx.publish_event(DeviceEvent::StatsFlushed {
            device: self.device_id,
            processed: self.processed,
            failed: self.failed,
            evictions,
        })
        .await?;
        self.processed = 0;
        self.failed = 0;
        self.flushed_evictions = self.sessions.evictions();
        Ok(())
    }
}

#[async_trait]
impl Actor for DeviceActor {
    type Message = DeviceMessage;
    type Response = DeviceResponse;
    type Event = DeviceEvent;

    async fn init(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        debug!("Device actor {} starting.", self.device_id);
        ctx.schedule_tick(self.stats_interval);
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        if let Some(time) = self.activity.on_reporting_period_end() {
            ctx.publish_event(DeviceEvent::ActivityReported {
                device: self.device_id,
                time,
            })
            .await?;
        }
        self.flush_stats(ctx).await
    }

    async fn stopped(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        reason: StopReason,
        cause: Option<Error>,
    ) {
        info!(
            "Device actor {} stopped ({}), {} sessions open. Cause: {:?}",
            self.device_id,
            reason,
            self.sessions.session_count(),
            cause
        );
    }
}

#[async_trait]
impl Handler<DeviceActor> for DeviceActor {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        msg: DeviceMessage,
        ctx: &mut ActorContext<DeviceActor>,
    ) -> Result<DeviceResponse, Error> {
        match msg {
            DeviceMessage::SessionOpen { session_id, meta } => {
                debug!(
                    "Device {}: session {} opened via {}.",
                    self.device_id, session_id, meta.transport
                );
                self.sessions.open(session_id, meta);
            }
            DeviceMessage::SessionClose { session_id } => {
                self.sessions.close(&session_id);
            }
            DeviceMessage::SubscribeAttributes { session_id, info } => {
                self.sessions.subscribe_attributes(session_id, info);
            }
            DeviceMessage::UnsubscribeAttributes { session_id } => {
                self.sessions.unsubscribe_attributes(&session_id);
            }
            DeviceMessage::SubscribeRpc { session_id, info } => {
                self.sessions.subscribe_rpc(session_id, info);
            }
            DeviceMessage::UnsubscribeRpc { session_id } => {
                self.sessions.unsubscribe_rpc(&session_id);
            }
            DeviceMessage::Telemetry {
                time,
                session_id,
                payload,
            } => {
                if payload.is_empty() {
                    self.failed += 1;
                    return Err(Error::Functional(format!(
                        "Empty telemetry payload for device {}",
                        self.device_id
                    )));
                }
                self.processed += 1;
                if let Some(session_id) = session_id {
                    self.sessions.record_activity(&session_id, time);
                }
                if let Some(time) = self.activity.on_activity(time) {
                    ctx.publish_event(DeviceEvent::ActivityReported {
                        device: self.device_id,
                        time,
                    })
                    .await?;
                }
            }
            DeviceMessage::GetSessions => {
                return Ok(DeviceResponse::Sessions(self.sessions.session_ids()));
            }
            DeviceMessage::GetSubscribers => {
                return Ok(DeviceResponse::Subscribers {
                    attributes: self.sessions.attribute_subscribers(),
                    rpc: self.sessions.rpc_subscribers(),
                });
            }
            DeviceMessage::GetStats => {
                return Ok(DeviceResponse::Stats {
                    processed: self.processed,
                    failed: self.failed,
                    evictions: self.sessions.evictions(),
                });
            }
        }
        Ok(DeviceResponse::Accepted)
    }
}
