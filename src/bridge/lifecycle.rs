use crate::bridge::control::{CallbackSlot, Direction};
use crate::bridge::drain;
use crate::socket::BridgeSocket;

/// Cancels one direction of the socket behind `slot`.
///
/// The direction's outstanding task is cancelled and its callbacks will not
/// be invoked again; a drain currently running for it stops at its next
/// checkpoint. The opposite direction is re-checked, then the control block
/// is released if the slot's [`CancelPolicy`](crate::bridge::CancelPolicy)
/// allows it. Cancelling through an empty slot does nothing.
pub fn cancel<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>, direction: Direction) {
  let pending = slot.with_block(|block| {
    let core = block.core_mut(direction);
    core.cancelled = true;
    core.take_task()
  });
  let Some(pending) = pending else {
    return;
  };
  if let Some((scheduler, id)) = pending {
    scheduler.cancel(id);
  }
  tracing::debug!(%direction, "Direction cancelled");

  cross_check(slot, direction.opposite());

  let policy = slot.cancel_policy();
  let release = slot.with_block(|block| policy.allows_release(block)).unwrap_or(false);
  if release {
    slot.release();
  }
}

/// Ends a drain whose direction was cancelled by one of its own callbacks.
pub(crate) fn finish_cancelled<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>, direction: Direction) {
  tracing::debug!(%direction, "Drain stopped by cancellation");
  cross_check(slot, direction.opposite());
  let release = slot
    .with_block(|block| {
      block.core_mut(direction).task = None;
      block.is_terminated()
    })
    .unwrap_or(false);
  if release {
    slot.release();
  }
}

/// Re-arms `direction` immediately if the socket already reports its event.
///
/// Does nothing when the direction is cancelled or has no task outstanding
/// (it is running, idle after an error, or the block is gone). The waiting
/// task is swapped for an immediate one, so the direction does not depend on
/// a descriptor edge that may already have been consumed.
pub(crate) fn cross_check<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>, direction: Direction) {
  let target = slot
    .with_block(|block| {
      let core = block.core(direction);
      match (core.task, &core.scheduler) {
        (Some(id), Some(scheduler)) if !core.cancelled => Some((block.socket.clone(), scheduler.clone(), id)),
        _ => None,
      }
    })
    .flatten();
  let Some((socket, scheduler, waiting)) = target else {
    return;
  };

  let events = match socket.events() {
    Ok(events) => events,
    Err(e) => {
      tracing::debug!(%direction, error = %e, "Cross-check could not read socket events");
      return;
    }
  };
  if !events.contains(direction.event()) {
    return;
  }

  scheduler.cancel(waiting);
  let id = scheduler.schedule_now(drain::task_for(slot.clone(), direction));
  slot.with_block(|block| block.core_mut(direction).task = Some(id));
  tracing::debug!(%direction, task = ?id, "Opposite direction re-armed");
}
