// src/bridge/mod.rs

//! Drives a `BridgeSocket` from a `Scheduler`.
//!
//! A socket exposes one edge-triggered descriptor for both directions, while
//! the scheduler only knows one-shot "run when readable" and "run now" tasks.
//! Each direction registered through [`add_read`]/[`add_write`] gets a drain
//! task. Whenever it fires, the drain asks the socket for its real readiness,
//! consumes everything currently available, then re-checks the opposite
//! direction: draining one side can change the other side's readiness without
//! the descriptor firing again.
//!
//! Per-socket state lives in a `ControlBlock` reached only through the
//! caller's [`CallbackSlot`]. The block is released through that slot once both
//! directions are cancelled and neither has a task outstanding.

mod control;
mod drain;
mod lifecycle;
mod registration;

pub use control::{CallbackSlot, Callbacks, CancelPolicy, Direction, ErrorFn, MessageFn, PartFn};
pub use lifecycle::cancel;
pub use registration::{add_read, add_write};
