//! Control-plane RPC: framing, schemas, server, and client.
//!
//! ## Files & responsibilities
//! - **frame.rs**: 4-byte big-endian length prefix + JSON payload, 1 MiB
//!   cap.
//! - **protocol.rs**: the command set, precise error-code mapping, and
//!   response builders.
//! - **server.rs**: owner-only Unix socket, one task per connection,
//!   dispatch into [`Supervisor`](crate::core::Supervisor) operations.
//! - **client.rs**: [`Controller`], the request/response client used by
//!   `procvisorctl` and the integration tests.

pub mod frame;
pub mod protocol;

mod client;
mod server;

pub use client::Controller;
pub use server::RpcServer;
