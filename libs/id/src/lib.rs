//! # hotplug-id
//!
//! Names and IDs shared by the controller, its event stream and the CLI.
//!
//! ## Design Principles
//!
//! - Agent and job names are caller-chosen labels; they are validated once at
//!   the boundary and carried as typed values afterwards
//! - Names and IDs have a canonical string form with strict parsing
//! - Types are distinct so an agent name can never be passed as a job name
//!
//! ## Formats
//!
//! Names (`AgentName`, `JobName`) are 1 to 64 characters drawn from
//! `[A-Za-z0-9._-]`, e.g. `agentA`, `job-7`.
//!
//! Event IDs use a prefixed ULID: `evt_01HV4Z2WQXKJNM8GPQY6VBKC3D`. ULIDs are
//! time-ordered, so event IDs sort in emission order across restarts.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::MAX_NAME_LEN;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
