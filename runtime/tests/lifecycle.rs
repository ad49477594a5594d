// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle semantics of entity actors: stop reasons reach the `stopped` hook
//! synchronously, tick errors do not cancel the schedule, and system shutdown
//! fans out to children before parents finish stopping.

use runtime::{
    Actor, ActorContext, ActorPath, ActorSystem, Error, Handler, Message,
    StopReason,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Cmd {
    StopTicks,
}

impl Message for Cmd {}

/// Records its stop reason into a channel shared with the test body.
#[derive(Debug, Clone)]
struct Recorder {
    name: &'static str,
    stops: mpsc::UnboundedSender<(&'static str, StopReason)>,
    with_child: bool,
}

#[async_trait]
impl Actor for Recorder {
    type Message = Cmd;
    type Event = ();
    type Response = ();

    async fn init(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        if self.with_child {
            ctx.create_child(
                "child",
                Recorder {
                    name: "child",
                    stops: self.stops.clone(),
                    with_child: false,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn stopped(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        reason: StopReason,
        _cause: Option<Error>,
    ) {
        let _ = self.stops.send((self.name, reason));
    }
}

#[async_trait]
impl Handler<Recorder> for Recorder {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        _msg: Cmd,
        _ctx: &mut ActorContext<Recorder>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn stop_reason_reaches_stopped_hook_before_removal() {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move {
        runner.run().await;
    });

    let (stops, mut stopped) = mpsc::unbounded_channel();
    let actor_ref = system
        .create_root_actor(
            "recorder",
            Recorder {
                name: "recorder",
                stops,
                with_child: false,
            },
        )
        .await
        .unwrap();

    actor_ref.ask_stop(StopReason::Rebalance).await.unwrap();

    // The hook already ran by the time the stop confirmation arrived.
    let (name, reason) = stopped.try_recv().unwrap();
    assert_eq!(name, "recorder");
    assert_eq!(reason, StopReason::Rebalance);
    assert!(
        system
            .get_actor::<Recorder>(&ActorPath::from("/user/recorder"))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn shutdown_fans_out_to_children_first() {
    let token = CancellationToken::new();
    let (system, mut runner) = ActorSystem::create(token.clone());
    tokio::spawn(async move {
        runner.run().await;
    });

    let (stops, mut stopped) = mpsc::unbounded_channel();
    let _parent = system
        .create_root_actor(
            "parent",
            Recorder {
                name: "parent",
                stops,
                with_child: true,
            },
        )
        .await
        .unwrap();

    token.cancel();
    let first = stopped.recv().await.unwrap();
    let second = stopped.recv().await.unwrap();
    assert_eq!(first, ("child", StopReason::Shutdown));
    assert_eq!(second, ("parent", StopReason::Shutdown));
}

/// Ticks on a fixed interval; the first tick fails on purpose.
#[derive(Debug, Clone)]
struct Ticker {
    ticks: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor for Ticker {
    type Message = Cmd;
    type Event = ();
    type Response = ();

    async fn init(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        ctx.schedule_tick(Duration::from_millis(20));
        Ok(())
    }

    async fn on_tick(&mut self, _ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        let count = self.ticks.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            return Err(Error::Functional("first tick fails".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<Ticker> for Ticker {
    async fn handle_message(
        &mut self,
        _sender: ActorPath,
        msg: Cmd,
        ctx: &mut ActorContext<Ticker>,
    ) -> Result<(), Error> {
        match msg {
            Cmd::StopTicks => ctx.cancel_tick(),
        }
        Ok(())
    }
}

#[tokio::test]
async fn tick_error_does_not_cancel_schedule() {
    let (system, mut runner) = ActorSystem::create(CancellationToken::new());
    tokio::spawn(async move {
        runner.run().await;
    });

    let ticks = Arc::new(AtomicUsize::new(0));
    let actor_ref = system
        .create_root_actor("ticker", Ticker { ticks: ticks.clone() })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    // The failed first tick did not stop the schedule.
    assert!(ticks.load(Ordering::SeqCst) >= 3);

    actor_ref.ask(Cmd::StopTicks).await.unwrap();
    // An already queued tick may still fire; after that the count settles.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}
