//! Multi-room text chat over TCP.
//!
//! Clients pick a nickname, join a named room, and exchange lines with the
//! other members of that room. All room state lives in one place:
//!
//! - [`command`] models client requests and parses protocol lines.
//! - [`session`] allocates session ids and provides the bounded, non-blocking
//!   outbound queue each connection drains.
//! - [`room`] holds rooms, the registry, and broadcast.
//! - [`dispatcher`] is the single task that applies every command, in
//!   arrival order, against the registry.
//! - [`server`] accepts connections and runs a reader and a writer per client.
//! - [`client`] is a small terminal client relaying stdin and server lines.
//! - [`cli`] parses the command line for server and client modes.
//! - [`error`] lists the conditions reported back to clients.

pub mod cli;
pub mod client;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod room;
pub mod server;
pub mod session;
