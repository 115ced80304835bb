// src/lib.rs

//! rzmq_bridge - drives ZeroMQ sockets from a single-threaded cooperative
//! scheduler.
//!
//! A ZeroMQ socket exposes one edge-triggered descriptor for both directions,
//! and that descriptor only means "something may have changed". The bridge
//! turns it into level-triggered read and write callbacks: each time a
//! direction's task fires, it drains the socket's real readiness, re-checks
//! the other direction and waits on the descriptor again.
//!
//! ```ignore
//! let master = Rc::new(Master::new());
//! let slot = CallbackSlot::new();
//! add_read(&master, Callbacks::new().on_message(|s: &PairSocket| { /* recv */ }), socket, &slot)?;
//! master.run_until_idle()?;
//! cancel(&slot, Direction::Read);
//! ```

/// Read/write registration, the drain tasks and cancellation.
pub mod bridge;
/// The process-wide ZeroMQ context shared by every user of the bridge.
pub mod context;
/// Error type used throughout the crate.
pub mod error;
/// Message parts handed to part callbacks.
pub mod message;
/// The scheduler seam, plus a poll(2) loop and a tokio `LocalSet` scheduler.
pub mod runtime;
/// The socket seam the bridge drives, and ZeroMQ option numbers.
pub mod socket;
/// In-process socket backend.
pub mod transport;

pub use bridge::{add_read, add_write, cancel, CallbackSlot, Callbacks, CancelPolicy, Direction};
pub use error::ZmqError;
pub use message::{Msg, MsgFlags};
pub use runtime::{Master, Scheduler, TaskId, TokioScheduler};
pub use socket::{BridgeSocket, PollEvents};
pub use transport::{InprocEngine, PairSocket};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
