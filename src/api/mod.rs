//! Purpose: Define the public Rust API boundary for murmur.
//! Exports: Store, message, error types, and the HTTP remote client.
//! Role: Single import path for the CLI, the server, and integration tests.
//! Invariants: Additive-only; core modules stay reachable for unit-level use.

mod remote;

pub use crate::core::clock::{Clock, SystemClock};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::ids::{IdGenerator, RandomIds};
pub use crate::core::message::{Message, Timestamp, short_id};
pub use crate::core::store::{DeleteOutcome, MessageStore, Snapshot, StreamSender};
pub use remote::{DEFAULT_TIMEOUT, RemoteClient, RemoteList};
