//! Single-process publish/broadcast chat over WebSockets.
//!
//! Every message a participant sends is relayed to everyone currently
//! connected. Modules, leaves first:
//!
//! - [`message`] defines the JSON wire message and its terminal rendering.
//! - [`connection`] abstracts one participant's duplex channel.
//! - [`registry`] is the identity -> connection membership map.
//! - [`hub`] owns the registry behind a single event queue and performs
//!   fan-out; it is the only place membership changes.
//! - [`handler`] bridges one connection's reads into hub events.
//! - [`server`] adapts axum WebSockets to the connection traits and runs
//!   the accept loop.
//! - [`client`] is the terminal client: one flow renders incoming
//!   messages, the other sends stdin lines.
//! - [`cli`] parses the command line for both modes.

pub mod cli;
pub mod client;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod message;
pub mod registry;
pub mod server;
