//! # hotplug-events
//!
//! Event type definitions and serialization for the hotplug controller.
//!
//! ## Design Principles
//!
//! - Events are immutable records of committed engine transitions
//! - An event is emitted only after the state change it describes is applied
//! - Every event names its subject (an agent, or an `agent/job` key)
//!
//! ## Event Envelope
//!
//! All events share a common envelope with:
//! - Global ordering (`event_id`, a time-ordered ULID)
//! - Wall clock time (`occurred_at`, UTC)
//! - The action kind and its structured detail
//!
//! ## Actions
//!
//! `register`, `allocate`, `steal`, `complete`, `queue`, `drop`.

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
