// src/transport/mod.rs

//! Messaging backends implementing `BridgeSocket`.

pub mod inproc;

pub use inproc::{InprocEngine, PairSocket};
