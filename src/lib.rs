//! Purpose: Shared library crate used by the `murmur` CLI, server, and tests.
//! Exports: `core` (message store, ids, clock, errors) and `api` (public surface + remote client).
//! Role: Library backing the binary; the server and client modes are thin layers over it.
//! Invariants: All message state lives in an explicit `MessageStore`; there is no global instance.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
