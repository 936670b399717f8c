//! Command and response payloads
//!
//! Payloads are `postcard`-encoded. Variant order of [`CommandType`] is part
//! of the wire format: `Unknown = 0, Time = 1, Get = 2, Set = 3, Remove = 4`.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

/// Operation requested by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandType {
    #[default]
    Unknown,
    Time,
    Get,
    Set,
    Remove,
}

/// A request frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandType,
    pub id: String,
    pub value: String,
}

impl Command {
    pub fn time() -> Self {
        Self { kind: CommandType::Time, ..Self::default() }
    }

    pub fn get(id: impl Into<String>) -> Self {
        Self { kind: CommandType::Get, id: id.into(), value: String::new() }
    }

    pub fn set(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: CommandType::Set, id: id.into(), value: value.into() }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self { kind: CommandType::Remove, id: id.into(), value: String::new() }
    }

    pub fn encode(&self) -> NetResult<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| NetError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// A reply frame. An empty `error` means success.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub value: String,
    pub error: String,
}

impl Response {
    pub fn ok(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self { id: id.into(), value: value.into(), error: String::new() }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { id: id.into(), value: String::new(), error: error.into() }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// The value, or [`NetError::Server`] if the server reported an error.
    pub fn into_result(self) -> NetResult<String> {
        if self.error.is_empty() {
            Ok(self.value)
        } else {
            Err(NetError::Server(self.error))
        }
    }

    pub fn encode(&self) -> NetResult<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|e| NetError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> NetResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Body of a TIME reply.
pub fn time_greeting(now: SystemTime) -> String {
    format!("Hello! The time is currently {}.\n", humantime::format_rfc3339_seconds(now))
}
