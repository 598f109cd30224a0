//! hotplug controller library.
//!
//! This crate primarily ships a `controller` binary, but we expose the
//! engine and router as a library to enable integration testing and reuse.

pub mod activity;
pub mod actors;
pub mod admission;
pub mod agent_client;
pub mod api;
pub mod config;
pub mod core_map;
pub mod error;
pub mod event_log;
pub mod ledger;
pub mod pending;
pub mod pool;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod state;
