//! Supervisor control channel
//!
//! The supervisor process launches this server and stays connected over a
//! private TCP channel on localhost. The port and shared secret arrive through
//! the environment.
//!
//! ```text
//! datalens                                  supervisor
//!    | -- {"authkey": "..."} -------------------> |
//!    | <------------------------- {"ok": true} -- |
//!    | -- {"kind": "startup"} ------------------> |
//!    | <-------- {"kind": "update", "data": {..}} |
//!    | -- {"kind": "startup_complete"} ---------> |
//!    | <-------------------- {"kind": "get_df"} - |
//!    | -- {"kind": "df", "data": {..}} ---------> |
//! ```

mod client;
mod messages;

use thiserror::Error;

pub use client::{ConnectionInfo, ControlChannel, ControlReader, ControlSender, MAX_LINE_LENGTH};
pub use messages::{
    AppConfigUpdate, DatasetSummary, HandshakeReply, HandshakeRequest, ProcessMessage, ProtocolError,
    SupervisorMessage,
};

/// Control channel failures
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Invalid port in {var}: {value:?}")]
    InvalidPort { var: String, value: String },

    #[error("Failed to connect to supervisor at {address} after {attempts} attempts")]
    Connect {
        address: String,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("Supervisor rejected the handshake")]
    Rejected,

    #[error("Malformed handshake reply: {0}")]
    Handshake(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Control channel closed")]
    Closed,
}
