// src/context.rs

//! The process-wide messaging context.
//!
//! Several independent subsystems may need the same underlying engine. Each
//! one calls [`init`] when it starts and [`finish`] when it stops; the engine
//! is created on the first `init` and terminated on the last `finish`.

use crate::error::ZmqError;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// A messaging engine that can back the shared context.
pub trait Engine: Send + Sync + 'static {
  /// Creates a fresh engine instance.
  fn create() -> Result<Self, ZmqError>
  where
    Self: Sized;

  /// Enables or disables IPv6 support for sockets created afterwards.
  fn set_ipv6(&self, enabled: bool) -> Result<(), ZmqError>;

  /// Shuts the engine down. Called once, when the last user finishes.
  fn terminate(&self);
}

struct LiveEngine {
  engine: Arc<dyn Engine>,
  // Same allocation as `engine`, kept for typed lookups.
  any: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct SharedContext {
  live: Option<LiveEngine>,
  users: usize,
}

static SHARED: Lazy<Mutex<SharedContext>> = Lazy::new(|| Mutex::new(SharedContext::default()));

/// Registers one more user of the shared context, creating the engine (with
/// IPv6 enabled) if this is the first user.
///
/// Fails with `InvalidState` if an engine of a different type is already live.
pub fn init<E: Engine>() -> Result<Arc<E>, ZmqError> {
  let mut shared = SHARED.lock();

  if let Some(live) = &shared.live {
    let engine = live
      .any
      .clone()
      .downcast::<E>()
      .map_err(|_| ZmqError::InvalidState("a different engine type backs the shared context"))?;
    shared.users += 1;
    tracing::debug!(users = shared.users, "Messaging context reused");
    return Ok(engine);
  }

  let engine = Arc::new(E::create()?);
  engine.set_ipv6(true)?;
  shared.live = Some(LiveEngine {
    engine: engine.clone(),
    any: engine.clone(),
  });
  shared.users = 1;
  tracing::info!(engine = std::any::type_name::<E>(), "Messaging context created");
  Ok(engine)
}

/// Releases one user of the shared context. The engine is terminated when the
/// count returns to zero.
pub fn finish() {
  let released = {
    let mut shared = SHARED.lock();
    if shared.users == 0 {
      tracing::warn!("Messaging context finish() called without a matching init()");
      return;
    }
    shared.users -= 1;
    tracing::debug!(users = shared.users, "Messaging context user released");
    if shared.users == 0 {
      shared.live.take()
    } else {
      None
    }
  };

  // Terminate outside the lock; engines may log or signal sockets.
  if let Some(live) = released {
    live.engine.terminate();
    tracing::info!("Messaging context destroyed");
  }
}

/// The live engine, if the context is currently initialised with type `E`.
pub fn handle<E: Engine>() -> Option<Arc<E>> {
  let shared = SHARED.lock();
  shared
    .live
    .as_ref()
    .and_then(|live| live.any.clone().downcast::<E>().ok())
}

/// Number of outstanding `init` calls.
pub fn users() -> usize {
  SHARED.lock().users
}
