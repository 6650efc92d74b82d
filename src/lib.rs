//! hashoff: checksum offload over TCP.
//!
//! A client streams randomly sized chunks of a file to a server, which
//! returns a 256-bit digest per chunk.
//!
//! - [`protocol`]: the four wire messages and their framing
//! - [`engine`]: the checksum engine and how sessions share it
//! - [`session`]: server-side state machine for one connection
//! - [`server`]: acceptor spawning one task per connection
//! - [`driver`]: client-side state machine

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{Error, Result};
