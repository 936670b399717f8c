//! trikv wire protocol
//!
//! Frames are an 8-byte big-endian length followed by a `postcard` payload.
//! A [`Server`] executes decoded [`Command`]s against a shared
//! [`trikv_core::Storage`]; a [`Client`] speaks the same frames from the
//! other end.

pub mod client;
pub mod error;
pub mod mux;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientConfig};
pub use error::{NetError, NetResult};
pub use mux::Multiplexer;
pub use protocol::{Command, CommandType, Response};
pub use server::{ListenAddress, Server, ServerConfig};
