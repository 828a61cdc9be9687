//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `post` and
//! `take` operations for a given transport layer; an in-memory transport and
//! a pure-Rust TCP transport are included. The trait then provides default
//! implementations for barrier, gather, and abort.
//!

mod backoff;
pub mod comm;
pub mod local;
mod mailbox;
pub mod tcp;
pub mod util;

pub use comm::{Communicator, Completion, Envelope, Tag};
pub use local::LocalCommunicator;
pub use tcp::{TcpCommunicator, TcpHost};
