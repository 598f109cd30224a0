//! Core actor framework types and traits.
//!
//! Provides the building blocks the scheduler is built on:
//! - `Actor` trait for defining actor behavior
//! - `ActorHandle` / `WeakActorHandle` for sending messages to actors
//! - `ActorRef` for stopping and observing a spawned actor

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message. Returns `false` to stop the actor.
    async fn handle(&mut self, msg: Self::Message) -> bool;

    /// Called once after the loop exits, whatever the reason.
    async fn on_stop(&mut self) {}
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor stopped")]
    ActorStopped,

    /// The actor dropped the reply channel without answering.
    #[error("actor dropped the reply")]
    NoReply,
}

// =============================================================================
// Handles
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Send a message to the actor, waiting for mailbox space.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    /// Send a message built around a reply channel and await the reply.
    pub async fn ask<R, F>(&self, make: F) -> Result<R, ActorError>
    where
        R: Send + 'static,
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| ActorError::NoReply)
    }

    /// A handle that does not keep the actor alive.
    pub fn downgrade(&self) -> WeakActorHandle<M> {
        WeakActorHandle {
            tx: self.tx.downgrade(),
            actor_id: self.actor_id.clone(),
        }
    }

    /// Whether the actor's mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Non-owning handle; used by tasks an actor spawns to post results back.
pub struct WeakActorHandle<M: Message> {
    tx: mpsc::WeakSender<M>,
    actor_id: String,
}

impl<M: Message> Clone for WeakActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> WeakActorHandle<M> {
    pub fn upgrade(&self) -> Option<ActorHandle<M>> {
        self.tx.upgrade().map(|tx| ActorHandle {
            tx,
            actor_id: self.actor_id.clone(),
        })
    }
}

/// Receiving half of an actor mailbox, created before the actor itself so
/// the actor can hold a weak handle to itself.
pub struct Mailbox<M: Message> {
    rx: mpsc::Receiver<M>,
    actor_id: String,
}

/// Creates a bounded mailbox for an actor named `name`.
pub fn mailbox<M: Message>(name: &str, size: usize) -> (ActorHandle<M>, Mailbox<M>) {
    let actor_id = format!("{}_{}", name, generate_actor_id());
    let (tx, rx) = mpsc::channel(size.max(1));
    (
        ActorHandle {
            tx,
            actor_id: actor_id.clone(),
        },
        Mailbox { rx, actor_id },
    )
}

/// Reference to a running actor task.
pub struct ActorRef {
    pub actor_id: String,
    task_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop after the message in hand.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Wait for the actor task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task_handle.await {
            error!(actor_id = %self.actor_id, error = %e, "Actor task panicked");
        }
    }
}

/// Spawns `actor` on the runtime, reading from `mailbox`.
pub fn spawn<A: Actor>(actor: A, mailbox: Mailbox<A::Message>) -> ActorRef {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let Mailbox { rx, actor_id } = mailbox;
    let actor_type = actor.name().to_string();

    let loop_id = actor_id.clone();
    let task_handle = tokio::spawn(async move {
        run_actor_loop(actor, rx, shutdown_rx, loop_id).await;
    });

    info!(actor_id = %actor_id, actor_type = %actor_type, "Spawned actor");

    ActorRef {
        actor_id,
        task_handle,
        shutdown_tx,
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) {
    debug!(actor_id = %actor_id, "Actor started");

    let mut messages_processed: u64 = 0;
    // A dropped ActorRef detaches the actor; it then runs until its mailbox closes.
    let mut watch_shutdown = true;

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed(), if watch_shutdown => {
                if changed.is_err() {
                    watch_shutdown = false;
                } else if *shutdown.borrow() {
                    info!(actor_id = %actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %actor_id, "Actor mailbox closed");
                    break;
                };

                messages_processed += 1;
                if !actor.handle(msg).await {
                    info!(actor_id = %actor_id, "Actor requested stop");
                    break;
                }
            }
        }
    }

    actor.on_stop().await;

    info!(
        actor_id = %actor_id,
        messages_processed,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================
