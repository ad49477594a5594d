// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Entity actor registry
//!
//! Maps entity identifiers to their live actor references under a single owning
//! parent actor. All mutations happen inside the owner's message handlers, so the
//! map needs no lock and two concurrent "get or create" requests for the same
//! entity can never race: the second request always observes the actor created by
//! the first.
//!
//! On startup a registry can be pre-warmed from an [`EntityPager`], fetching entity
//! ids in fixed-size pages so that a tenant with millions of entities never has to
//! materialize the full id list in memory.
//!

use crate::{
    Actor, ActorContext, ActorRef, Error, Handler,
    actor::StopReason,
    entity::EntityId,
};

use async_trait::async_trait;

use tracing::{debug, warn};

use std::collections::HashMap;

/// Default number of entity ids fetched per warm-up page.
pub const DEFAULT_WARM_UP_PAGE_SIZE: usize = 100;

/// Cursor for paged entity fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLink {
    /// Zero-based page index.
    pub page: usize,
    /// Number of ids per page.
    pub page_size: usize,
}

impl PageLink {
    pub fn new(page_size: usize) -> Self {
        Self { page: 0, page_size }
    }

    /// The link for the following page.
    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            page_size: self.page_size,
        }
    }
}

/// One page of entity ids.
#[derive(Debug, Clone)]
pub struct PageData {
    /// Ids in this page.
    pub entities: Vec<EntityId>,
    /// True when more pages follow.
    pub has_next: bool,
}

/// Source of entity ids for registry warm-up. Implementations page over whatever
/// store holds the entities; a disabled pager skips warm-up entirely and actors
/// are created lazily on first message instead.
#[async_trait]
pub trait EntityPager: Send + Sync {
    /// Whether warm-up should run at all.
    fn enabled(&self) -> bool {
        true
    }

    /// Fetches one page of entity ids.
    async fn fetch_page(&self, link: &PageLink) -> Result<PageData, Error>;
}

/// Registry of entity actors, owned by a parent actor.
///
/// The factory builds the initial actor state for an entity the first time it is
/// seen. Children are named after the entity id, so the actor path of an entity is
/// stable across restarts of its parent.
pub struct EntityRegistry<A>
where
    A: Actor + Handler<A>,
{
    /// Live actors by entity id.
    entities: HashMap<EntityId, ActorRef<A>>,
    /// Builds the actor state for a new entity.
    factory: Box<dyn Fn(EntityId) -> A + Send + Sync>,
    /// Page size used during warm-up.
    page_size: usize,
}

impl<A> EntityRegistry<A>
where
    A: Actor + Handler<A>,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(EntityId) -> A + Send + Sync + 'static,
    {
        Self {
            entities: HashMap::new(),
            factory: Box::new(factory),
            page_size: DEFAULT_WARM_UP_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Returns the actor for `id`, creating it as a supervised child of the owner
    /// if it does not exist yet. Creation is atomic: on failure no entry remains
    /// and the error propagates to the caller.
    pub async fn get_or_create<P>(
        &mut self,
        ctx: &mut ActorContext<P>,
        id: EntityId,
    ) -> Result<ActorRef<A>, Error>
    where
        P: Actor + Handler<P>,
    {
        if let Some(actor_ref) = self.entities.get(&id) {
            if !actor_ref.is_closed() {
                return Ok(actor_ref.clone());
            }
            // Stale entry from an actor that stopped on its own.
            self.entities.remove(&id);
        }
        debug!("Creating actor for entity {}.", id);
        let actor = (self.factory)(id);
        let actor_ref = ctx.create_child(&id.to_string(), actor).await?;
        self.entities.insert(id, actor_ref.clone());
        Ok(actor_ref)
    }

    /// Returns the actor for `id` without creating it.
    pub fn get(&self, id: &EntityId) -> Option<ActorRef<A>> {
        self.entities.get(id).cloned()
    }

    /// Stops and removes the actor for `id`, waiting for it to finish stopping.
    /// Removing an unknown id is a no-op, so deletion events can be replayed.
    pub async fn remove(&mut self, id: &EntityId, reason: StopReason) {
        if let Some(actor_ref) = self.entities.remove(id) {
            debug!("Removing actor for entity {} ({}).", id, reason);
            if let Err(err) = actor_ref.ask_stop(reason).await {
                warn!("Entity {} did not confirm stop: {}", id, err);
            }
        }
    }

    /// Pre-creates actors for every entity the pager yields, one page at a time.
    /// Returns the number of actors created. Skipped when the pager is disabled.
    pub async fn warm_up<P>(
        &mut self,
        ctx: &mut ActorContext<P>,
        pager: &dyn EntityPager,
    ) -> Result<usize, Error>
    where
        P: Actor + Handler<P>,
    {
        if !pager.enabled() {
            debug!("Entity warm-up disabled.");
            return Ok(0);
        }
        let mut link = PageLink::new(self.page_size);
        let mut created = 0;
        loop {
            let page = pager.fetch_page(&link).await?;
            for id in page.entities {
                self.get_or_create(ctx, id).await?;
                created += 1;
            }
            if !page.has_next {
                break;
            }
            link = link.next();
        }
        debug!("Warm-up created {} entity actors.", created);
        Ok(created)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids of all live entities.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{
        actor::{Actor, ActorContext, Handler, Message, Response, StopReason},
        entity::EntityType,
        system::ActorSystem,
    };

    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct EntityActor {
        id: EntityId,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping;

    impl Message for Ping {}

    #[async_trait]
    impl Actor for EntityActor {
        type Message = Ping;
        type Event = ();
        type Response = ();
    }

    #[async_trait]
    impl Handler<EntityActor> for EntityActor {
        async fn handle_message(
            &mut self,
            _sender: crate::ActorPath,
            _msg: Ping,
            _ctx: &mut ActorContext<EntityActor>,
        ) -> Result<(), Error> {
            debug!("Ping for {}.", self.id);
            Ok(())
        }
    }

    struct Manager {
        registry: EntityRegistry<EntityActor>,
        pager: VecPager,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum ManagerCommand {
        Obtain(EntityId),
        Remove(EntityId),
        WarmUp,
    }

    impl Message for ManagerCommand {}

    #[derive(Debug, Clone)]
    struct Count(usize);

    impl Response for Count {}

    #[async_trait]
    impl Actor for Manager {
        type Message = ManagerCommand;
        type Event = ();
        type Response = Count;
    }

    #[async_trait]
    impl Handler<Manager> for Manager {
        async fn handle_message(
            &mut self,
            _sender: crate::ActorPath,
            msg: ManagerCommand,
            ctx: &mut ActorContext<Manager>,
        ) -> Result<Count, Error> {
            match msg {
                ManagerCommand::Obtain(id) => {
                    self.registry.get_or_create(ctx, id).await?;
                }
                ManagerCommand::Remove(id) => {
                    self.registry.remove(&id, StopReason::EntityDeleted).await;
                }
                ManagerCommand::WarmUp => {
                    self.registry.warm_up(ctx, &self.pager).await?;
                }
            }
            Ok(Count(self.registry.len()))
        }
    }

    #[derive(Clone)]
    struct VecPager {
        ids: Vec<EntityId>,
        enabled: bool,
    }

    #[async_trait]
    impl EntityPager for VecPager {
        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn fetch_page(&self, link: &PageLink) -> Result<PageData, Error> {
            let start = link.page * link.page_size;
            let end = (start + link.page_size).min(self.ids.len());
            let entities = if start < self.ids.len() {
                self.ids[start..end].to_vec()
            } else {
                vec![]
            };
            Ok(PageData {
                entities,
                has_next: end < self.ids.len(),
            })
        }
    }

    fn manager(ids: Vec<EntityId>, enabled: bool) -> Manager {
        Manager {
            registry: EntityRegistry::new(|id| EntityActor { id })
                .with_page_size(2),
            pager: VecPager { ids, enabled },
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (system, mut runner) = ActorSystem::create(CancellationToken::new());
        tokio::spawn(async move {
            runner.run().await;
        });

        let manager_ref = system
            .create_root_actor("manager", manager(vec![], true))
            .await
            .unwrap();

        let id = EntityId::new(EntityType::Device, Uuid::new_v4());
        let count = manager_ref.ask(ManagerCommand::Obtain(id)).await.unwrap();
        assert_eq!(count.0, 1);
        // Same entity again does not create a second actor.
        let count = manager_ref.ask(ManagerCommand::Obtain(id)).await.unwrap();
        assert_eq!(count.0, 1);

        // The child is addressable under the manager's path.
        let path = crate::ActorPath::from("/user/manager") / &id.to_string();
        assert!(system.get_actor::<EntityActor>(&path).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_stops_child() {
        let (system, mut runner) = ActorSystem::create(CancellationToken::new());
        tokio::spawn(async move {
            runner.run().await;
        });

        let manager_ref = system
            .create_root_actor("manager", manager(vec![], true))
            .await
            .unwrap();

        let id = EntityId::new(EntityType::Device, Uuid::new_v4());
        manager_ref.ask(ManagerCommand::Obtain(id)).await.unwrap();

        let count = manager_ref.ask(ManagerCommand::Remove(id)).await.unwrap();
        assert_eq!(count.0, 0);
        let path = crate::ActorPath::from("/user/manager") / &id.to_string();
        assert!(system.get_actor::<EntityActor>(&path).await.is_none());

        // Replaying the deletion is a no-op.
        let count = manager_ref.ask(ManagerCommand::Remove(id)).await.unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_warm_up_pages_through_all_entities() {
        let (system, mut runner) = ActorSystem::create(CancellationToken::new());
        tokio::spawn(async move {
            runner.run().await;
        });

        let ids: Vec<EntityId> = (0..5)
            .map(|_| EntityId::new(EntityType::Device, Uuid::new_v4()))
            .collect();
        let manager_ref = system
            .create_root_actor("manager", manager(ids, true))
            .await
            .unwrap();

        let count = manager_ref.ask(ManagerCommand::WarmUp).await.unwrap();
        assert_eq!(count.0, 5);
    }

    #[tokio::test]
    async fn test_warm_up_skipped_when_pager_disabled() {
        let (system, mut runner) = ActorSystem::create(CancellationToken::new());
        tokio::spawn(async move {
            runner.run().await;
        });

        let ids = vec![EntityId::new(EntityType::Device, Uuid::new_v4())];
        let manager_ref = system
            .create_root_actor("manager", manager(ids, false))
            .await
            .unwrap();

        let count = manager_ref.ask(ManagerCommand::WarmUp).await.unwrap();
        assert_eq!(count.0, 0);
    }
}
