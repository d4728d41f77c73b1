// Core modules implementing the message store, identity/clock sources, and error modeling.
pub mod clock;
pub mod error;
pub mod ids;
pub mod message;
pub mod store;
