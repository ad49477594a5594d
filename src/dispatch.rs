// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dispatch service
//!
//! The top of the pipeline: polls the queue transport, wraps each batch in an
//! ack-tracked pack, routes every message through the partition resolver and
//! the owning tenant's actor to the device actor, and hands sealed packs to the
//! backpressure strategy. The batch is committed only after the strategy is
//! done with it, so a crash mid-batch redelivers.
//!
//! Messages whose partition this node does not own are failed inside the pack
//! and left to the owning node's redelivery; a rebalance mid-batch therefore
//! stops local side effects without losing work.

use crate::{
    Error,
    config::{DispatchConfig, RetryPolicy},
};

use cluster::{PartitionResolver, ServiceType, TopologyHandle};
use device::{
    DedupExecutor, DedupHandler, DeviceActor, DeviceEvent, DeviceMessage,
    RateLimiter, SessionId,
};
use queue::{
    MsgPack, PackDecision, PackStrategy, QueueConsumer, QueueMsg,
    RetryAllStrategy, RetryFailedStrategy, StrategyStats,
};
use runtime::{
    Actor, ActorContext, ActorPath, ActorRef, EntityId, EntityRegistry,
    EntityType, Handler, Message, Response, Sink, StopReason, Subscriber,
    SystemRef,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tracing::{debug, info, warn};

use std::sync::Arc;

/// Header with the owning tenant's UUID, as raw bytes.
pub const TENANT_ID_HEADER: &str = "tenant-id";
/// Header with the telemetry timestamp, big-endian epoch millis.
pub const TS_HEADER: &str = "ts";
/// Header with the originating session UUID, as raw bytes.
pub const SESSION_ID_HEADER: &str = "session-id";

/// Root actor of one tenant: owns the registry of its device actors and the
/// tenant's rate limit. All device creation for the tenant funnels through its
/// message loop, which keeps the one-actor-per-device invariant lock free.
pub struct TenantActor {
    tenant_id: EntityId,
    registry: EntityRegistry<DeviceActor>,
    limiter: Option<RateLimiter>,
    resolver: PartitionResolver,
    reporter: DedupExecutor<EntityId, u64>,
}

impl TenantActor {
    pub fn new(
        tenant_id: EntityId,
        device_config: device::DeviceActorConfig,
        rate_limit: &str,
        resolver: PartitionResolver,
        reporter: DedupExecutor<EntityId, u64>,
    ) -> Result<Self, Error> {
        let limiter = if rate_limit.is_empty() {
            None
        } else {
            Some(RateLimiter::parse(rate_limit)?)
        };
        let registry = EntityRegistry::new(move |id| {
            DeviceActor::new(id, &device_config)
        });
        Ok(Self {
            tenant_id,
            registry,
            limiter,
            resolver,
            reporter,
        })
    }
}

#[derive(Debug, Clone)]
pub enum TenantMessage {
    /// Route one queue message to its device actor.
    Dispatch(QueueMsg),
    /// The device was deleted; stop and discard its actor.
    RemoveDevice(EntityId),
    /// The topology changed; release device actors this node no longer owns.
    Rebalance,
}

impl Message for TenantMessage {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Rejected by the tenant's rate limit; the pack treats it as a failure
    /// and the backpressure strategy decides on redelivery.
    RateLimited,
}

impl Response for DispatchOutcome {}

#[async_trait]
impl Actor for TenantActor {
    type Message = TenantMessage;
    type Response = DispatchOutcome;
    type Event = ();

    async fn init(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), runtime::Error> {
        debug!("Tenant actor {} starting.", self.tenant_id);
        Ok(())
    }
}

#[async_trait]
impl Handler<TenantActor> for TenantActor {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        msg: TenantMessage,
        ctx: &mut ActorContext<TenantActor>,
    ) -> Result<DispatchOutcome, runtime::Error> {
        match msg {
            TenantMessage::Dispatch(msg) => {
                if let Some(limiter) = self.limiter.as_mut() {
                    if !limiter.try_consume() {
                        debug!(
                            "Tenant {} rate limited message {}.",
                            self.tenant_id, msg.id
                        );
                        return Ok(DispatchOutcome::RateLimited);
                    }
                }
                let known = self
                    .registry
                    .get(&msg.key)
                    .map(|actor_ref| !actor_ref.is_closed())
                    .unwrap_or(false);
                let device_ref = self.registry.get_or_create(ctx, msg.key).await?;
                if !known {
                    // First sight of this device: drain its activity events
                    // into the shared reporter.
                    let sink = Sink::new(
                        device_ref.subscribe(),
                        ActivityForwarder {
                            reporter: self.reporter.clone(),
                        },
                    );
                    ctx.system().run_sink(sink).await;
                }
                device_ref.ask(telemetry_from(&msg)).await?;
                Ok(DispatchOutcome::Accepted)
            }
            TenantMessage::RemoveDevice(id) => {
                self.registry.remove(&id, StopReason::EntityDeleted).await;
                Ok(DispatchOutcome::Accepted)
            }
            TenantMessage::Rebalance => {
                let ids: Vec<EntityId> = self.registry.ids().copied().collect();
                for id in ids {
                    if !self.resolver.is_my_partition(ServiceType::Core, &id) {
                        info!(
                            "Tenant {} releasing device {} after rebalance.",
                            self.tenant_id, id
                        );
                        self.registry.remove(&id, StopReason::Rebalance).await;
                    }
                }
                Ok(DispatchOutcome::Accepted)
            }
        }
    }
}

/// Forwards device activity events into the deduplicating reporter, so a
/// burst of telemetry produces a bounded number of downstream reports per
/// device.
struct ActivityForwarder {
    reporter: DedupExecutor<EntityId, u64>,
}

#[async_trait]
impl Subscriber<DeviceEvent> for ActivityForwarder {
    async fn notify(&self, event: DeviceEvent) {
        if let DeviceEvent::ActivityReported { device, time } = event {
            self.reporter.submit(device, time);
        }
    }
}

/// Default activity consumer: records the report in the log. Deployments
/// wanting persistence swap in their own handler before the service runs.
fn activity_logger() -> DedupHandler<EntityId, u64> {
    Arc::new(move |device, time| {
        Box::pin(async move {
            debug!("Device {} reported activity at {}.", device, time);
            Ok(())
        })
    })
}

/// Builds the device message for one inbound queue message.
fn telemetry_from(msg: &QueueMsg) -> DeviceMessage {
    let time = msg
        .header(TS_HEADER)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0);
    let session_id = msg
        .header(SESSION_ID_HEADER)
        .and_then(|bytes| Uuid::from_slice(bytes).ok())
        .map(SessionId);
    DeviceMessage::Telemetry {
        time,
        session_id,
        payload: msg.payload.clone(),
    }
}

/// The tenant a message belongs to, from its header. Messages without the
/// header land on the nil tenant.
fn tenant_of(msg: &QueueMsg) -> EntityId {
    let id = msg
        .header(TENANT_ID_HEADER)
        .and_then(|bytes| Uuid::from_slice(bytes).ok())
        .unwrap_or(Uuid::nil());
    EntityId::new(EntityType::Tenant, id)
}

/// Per-node dispatch loop.
pub struct DispatchService<C>
where
    C: QueueConsumer,
{
    system: SystemRef,
    resolver: PartitionResolver,
    consumer: C,
    strategy: Box<dyn PackStrategy>,
    config: DispatchConfig,
    token: CancellationToken,
    topology: TopologyHandle,
    /// Cleared when the topology publisher goes away, so the consume loop
    /// stops selecting on a channel that will never change again.
    watch_topology: bool,
    activity: DedupExecutor<EntityId, u64>,
}

impl<C> DispatchService<C>
where
    C: QueueConsumer,
{
    pub fn new(
        system: SystemRef,
        resolver: PartitionResolver,
        consumer: C,
        config: DispatchConfig,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        // Surface a bad rate limit definition at startup, not on first use.
        RateLimiter::parse(&config.tenant_rate_limit)?;
        let strategy: Box<dyn PackStrategy> = match config.retry_policy {
            RetryPolicy::Retry => {
                Box::new(RetryFailedStrategy::new(config.pack_max_retry_attempts))
            }
            RetryPolicy::RetryAll => {
                Box::new(RetryAllStrategy::new(config.pack_max_retry_attempts))
            }
        };
        let topology = resolver.topology();
        Ok(Self {
            system,
            resolver,
            consumer,
            strategy,
            config,
            token,
            topology,
            watch_topology: true,
            activity: DedupExecutor::new(activity_logger()),
        })
    }

    /// Replaces the default activity consumer. Only effective before `run`;
    /// tenant actors capture the executor when they are created.
    pub fn with_activity_handler(
        mut self,
        handler: DedupHandler<EntityId, u64>,
    ) -> Self {
        self.activity = DedupExecutor::new(handler);
        self
    }

    /// Retry/drop counters of the backpressure strategy, for the stats sink.
    pub fn strategy_stats(&self) -> Arc<StrategyStats> {
        self.strategy.stats()
    }

    /// Consume loop: poll, process, commit. Returns after the token cancels.
    pub async fn run(mut self) -> Result<(), Error> {
        self.consumer.subscribe().await?;
        info!(
            "Dispatch service consuming `{}` as {}.",
            self.config.topic, self.config.node_id
        );
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!("Dispatch service stopping.");
                    break;
                }
                changed = self.topology.changed(), if self.watch_topology => {
                    match changed {
                        Ok(()) => self.rebalance().await,
                        Err(_) => self.watch_topology = false,
                    }
                }
                batch = self.consumer.poll(self.config.poll_timeout()) => {
                    let batch = batch?;
                    if batch.is_empty() {
                        continue;
                    }
                    self.process_batch(batch).await;
                    self.consumer.commit().await?;
                }
            }
        }
        self.consumer.unsubscribe().await?;
        Ok(())
    }

    /// Tells every tenant actor to drop the device actors this node no longer
    /// owns under the new topology. Messages for those devices then fail the
    /// local ownership check and are left to the owning node's redelivery.
    async fn rebalance(&self) {
        info!("Topology changed, rebalancing tenant actors.");
        for path in self.system.children(&ActorPath::from("/user")).await {
            if let Some(tenant_ref) =
                self.system.get_actor::<TenantActor>(&path).await
            {
                if let Err(err) = tenant_ref.tell(TenantMessage::Rebalance).await
                {
                    warn!("Rebalance of {} failed: {}", path, err);
                }
            }
        }
    }

    /// Runs one polled batch through packs and the backpressure strategy until
    /// it resolves or its failures are dropped.
    async fn process_batch(&self, batch: Vec<QueueMsg>) {
        let mut pack = MsgPack::new(batch);
        loop {
            self.process_pack(&pack).await;
            if !pack.await_sealed(self.config.pack_timeout()).await {
                warn!("Pack {} timed out, failing remainder.", pack.id());
                pack.fail_remaining();
            }
            match self.strategy.on_sealed(&pack) {
                PackDecision::Resolved => break,
                PackDecision::Drop(_dropped) => break,
                PackDecision::Retry(next) => pack = next,
            }
        }
    }

    async fn process_pack(&self, pack: &MsgPack) {
        for msg in pack.msgs().to_vec() {
            if !self
                .resolver
                .is_my_partition(ServiceType::Core, &msg.key)
            {
                debug!(
                    "Entity {} is not owned here, leaving {} to redelivery.",
                    msg.key, msg.id
                );
                pack.on_failure(msg.id);
                continue;
            }
            match self.tenant_for(&msg).await {
                Ok(tenant_ref) => {
                    match tenant_ref.ask(TenantMessage::Dispatch(msg.clone())).await
                    {
                        Ok(DispatchOutcome::Accepted) => pack.on_success(msg.id),
                        Ok(DispatchOutcome::RateLimited) => {
                            pack.on_failure(msg.id)
                        }
                        Err(err) => {
                            debug!("Dispatch of {} failed: {}", msg.id, err);
                            pack.on_failure(msg.id);
                        }
                    }
                }
                Err(err) => {
                    warn!("No tenant actor for {}: {}", msg.id, err);
                    pack.on_failure(msg.id);
                }
            }
        }
    }

    /// The root actor of the message's tenant, created on first use.
    async fn tenant_for(
        &self,
        msg: &QueueMsg,
    ) -> Result<ActorRef<TenantActor>, Error> {
        let tenant_id = tenant_of(msg);
        let name = tenant_id.to_string();
        let path = ActorPath::from("/user") / &name;
        if let Some(actor_ref) = self.system.get_actor::<TenantActor>(&path).await
        {
            return Ok(actor_ref);
        }
        let actor = TenantActor::new(
            tenant_id,
            self.config.device_config(),
            &self.config.tenant_rate_limit,
            self.resolver.clone(),
            self.activity.clone(),
        )?;
        match self.system.create_root_actor(&name, actor).await {
            Ok(actor_ref) => Ok(actor_ref),
            // Lost a create race with another batch's task.
            Err(runtime::Error::Exists(_)) => self
                .system
                .get_actor::<TenantActor>(&path)
                .await
                .ok_or_else(|| {
                    Error::Runtime(runtime::Error::Start(format!(
                        "Tenant actor {} vanished",
                        path
                    )))
                }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cluster::{ClusterTopology, NodeId, topology_channel};
    use device::{ActivityStrategyType, DeviceActorConfig};
    use runtime::ActorSystem;

    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    fn counting_reporter(
        reports: Arc<AtomicU64>,
    ) -> DedupHandler<EntityId, u64> {
        Arc::new(move |_device, _time| {
            let reports = reports.clone();
            Box::pin(async move {
                reports.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn core_resolver(node: &str) -> PartitionResolver {
        let (mut publisher, handle) = topology_channel();
        let mut topology = ClusterTopology::new();
        topology.add_node(ServiceType::Core, NodeId::new(node));
        publisher.publish(topology);
        PartitionResolver::new(NodeId::new(node), handle)
    }

    #[tokio::test]
    async fn test_tenant_forwards_device_activity_to_reporter() {
        let token = CancellationToken::new();
        let (system, mut runner) = ActorSystem::create(token.clone());
        tokio::spawn(async move {
            runner.run().await;
        });

        let reports = Arc::new(AtomicU64::new(0));
        let reporter = DedupExecutor::new(counting_reporter(reports.clone()));

        let config = DeviceActorConfig {
            activity_strategy: ActivityStrategyType::All,
            ..DeviceActorConfig::default()
        };
        let tenant_id = EntityId::random(EntityType::Tenant);
        let tenant = TenantActor::new(
            tenant_id,
            config,
            "",
            core_resolver("node-a"),
            reporter,
        )
        .unwrap();
        let tenant_ref = system
            .create_root_actor(&tenant_id.to_string(), tenant)
            .await
            .unwrap();

        let device = EntityId::random(EntityType::Device);
        let msg = QueueMsg::new(device, b"42".to_vec())
            .with_header(TS_HEADER, 100u64.to_be_bytes().to_vec());
        let outcome =
            tenant_ref.ask(TenantMessage::Dispatch(msg)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Accepted);

        // The report crosses the sink task, so give it a moment to land.
        for _ in 0..100 {
            if reports.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reports.load(Ordering::SeqCst) >= 1);

        token.cancel();
    }

    #[tokio::test]
    async fn test_rebalance_releases_devices_owned_elsewhere() {
        let token = CancellationToken::new();
        let (system, mut runner) = ActorSystem::create(token.clone());
        tokio::spawn(async move {
            runner.run().await;
        });

        let (mut publisher, handle) = topology_channel();
        let mut topology = ClusterTopology::new();
        topology.add_node(ServiceType::Core, NodeId::new("node-a"));
        publisher.publish(topology);
        let resolver = PartitionResolver::new(NodeId::new("node-a"), handle);

        let tenant_id = EntityId::random(EntityType::Tenant);
        let tenant = TenantActor::new(
            tenant_id,
            DeviceActorConfig::default(),
            "",
            resolver,
            DedupExecutor::new(counting_reporter(Arc::new(AtomicU64::new(0)))),
        )
        .unwrap();
        let tenant_ref = system
            .create_root_actor(&tenant_id.to_string(), tenant)
            .await
            .unwrap();

        let device = EntityId::random(EntityType::Device);
        let msg = QueueMsg::new(device, b"42".to_vec());
        tenant_ref.ask(TenantMessage::Dispatch(msg)).await.unwrap();
        let device_path =
            ActorPath::from("/user") / &tenant_id.to_string() / &device.to_string();
        assert!(system.get_actor::<DeviceActor>(&device_path).await.is_some());

        // Hand the whole core partition space to another node; the rebalance
        // must stop the local device actor.
        let mut topology = ClusterTopology::new();
        topology.add_node(ServiceType::Core, NodeId::new("node-b"));
        publisher.publish(topology);
        tenant_ref.ask(TenantMessage::Rebalance).await.unwrap();

        for _ in 0..100 {
            if system.get_actor::<DeviceActor>(&device_path).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(system.get_actor::<DeviceActor>(&device_path).await.is_none());

        token.cancel();
    }
}
