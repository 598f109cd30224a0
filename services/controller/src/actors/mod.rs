//! Actor framework for the controller.
//!
//! A small single-consumer actor runtime. The scheduler is the only actor:
//! it owns all allocation state and processes one command at a time, which
//! serializes every mutation without explicit locks.
//!
//! ## Design Principles
//!
//! - **One owner**: an actor's state is never shared; callers send messages
//! - **No remote calls in handlers**: slow work runs in spawned tasks that
//!   post results back through a `WeakActorHandle`
//! - **Bounded mailboxes**: backpressure instead of unbounded queues

mod framework;

pub use framework::{
    mailbox, spawn, Actor, ActorError, ActorHandle, ActorRef, Mailbox, Message, WeakActorHandle,
};
