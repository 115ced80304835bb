use crate::bridge::control::{CallbackSlot, Callbacks, ControlBlock, Direction};
use crate::bridge::drain;
use crate::error::ZmqError;
use crate::runtime::Scheduler;
use crate::socket::options::{EVENTS, FD};
use crate::socket::BridgeSocket;

use std::rc::Rc;

/// Registers the read direction of `socket` on `scheduler`.
///
/// `callbacks` must carry exactly one of `on_message` and `on_part`. Any task
/// already scheduled for the read direction of `slot` is replaced. Errors are
/// reported before anything is allocated or scheduled.
pub fn add_read<S, M>(
  scheduler: &Rc<M>,
  callbacks: Callbacks<S>,
  socket: Rc<S>,
  slot: &CallbackSlot<S>,
) -> Result<(), ZmqError>
where
  S: BridgeSocket + 'static,
  M: Scheduler + 'static,
{
  register(scheduler.clone(), Direction::Read, callbacks, socket, slot)
}

/// Registers the write direction of `socket` on `scheduler`.
///
/// `callbacks` must carry `on_message` and no `on_part`.
pub fn add_write<S, M>(
  scheduler: &Rc<M>,
  callbacks: Callbacks<S>,
  socket: Rc<S>,
  slot: &CallbackSlot<S>,
) -> Result<(), ZmqError>
where
  S: BridgeSocket + 'static,
  M: Scheduler + 'static,
{
  register(scheduler.clone(), Direction::Write, callbacks, socket, slot)
}

fn register<S: BridgeSocket + 'static>(
  scheduler: Rc<dyn Scheduler>,
  direction: Direction,
  callbacks: Callbacks<S>,
  socket: Rc<S>,
  slot: &CallbackSlot<S>,
) -> Result<(), ZmqError> {
  callbacks.validate(direction)?;
  let fd = socket.fd().map_err(|e| ZmqError::introspection(FD, e))?;
  let events = socket.events().map_err(|e| ZmqError::introspection(EVENTS, e))?;

  let replaced = {
    let mut guard = slot.inner.borrow_mut();
    let block = guard.get_or_insert_with(|| {
      tracing::debug!(fd, %direction, "Control block allocated");
      ControlBlock::new(socket.clone(), fd, direction)
    });
    block.socket = socket;
    block.fd = fd;
    let core = block.core_mut(direction);
    // The old task belongs to the scheduler it was registered on.
    let replaced = core.take_task();
    core.callbacks = callbacks;
    core.cancelled = false;
    core.scheduler = Some(scheduler.clone());
    replaced
  };
  if let Some((old_scheduler, old)) = replaced {
    old_scheduler.cancel(old);
  }

  let task = drain::task_for(slot.clone(), direction);
  let (id, immediate) = if events.contains(direction.event()) {
    (scheduler.schedule_now(task), true)
  } else {
    (scheduler.schedule_readable(fd, task), false)
  };
  slot.with_block(|block| block.core_mut(direction).task = Some(id));
  tracing::debug!(fd, %direction, task = ?id, immediate, "Direction registered");
  Ok(())
}
