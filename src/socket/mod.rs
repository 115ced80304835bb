// src/socket/mod.rs

//! The messaging-socket seam consumed by the bridge, plus readiness flags and
//! socket option handling.

pub mod options;
pub mod types;

pub use types::{BridgeSocket, PollEvents, RecvFlags, SendFlags};
