use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::{Scheduler, TaskId};
use crate::socket::PollEvents;

use std::cell::RefCell;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;

/// Called once per readiness unit; must consume exactly one message (read) or
/// send exactly one message (write).
pub type MessageFn<S> = Rc<dyn Fn(&S)>;
/// Called once per received part with the part index, starting at 0.
pub type PartFn<S> = Rc<dyn Fn(&S, &Msg, u32)>;
/// Called when polling the socket fails during a drain.
pub type ErrorFn<S> = Rc<dyn Fn(&S, &ZmqError)>;

/// One half of a socket's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
  Read,
  Write,
}

impl Direction {
  pub fn opposite(self) -> Direction {
    match self {
      Direction::Read => Direction::Write,
      Direction::Write => Direction::Read,
    }
  }

  /// The readiness bit this direction drains.
  pub fn event(self) -> PollEvents {
    match self {
      Direction::Read => PollEvents::POLLIN,
      Direction::Write => PollEvents::POLLOUT,
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Read => f.write_str("read"),
      Direction::Write => f.write_str("write"),
    }
  }
}

/// The callbacks for one direction.
///
/// The read direction takes exactly one of `on_message` and `on_part`; the
/// write direction takes `on_message` only. `on_error` is optional for both.
/// Any per-registration state the callbacks need is captured by the closures.
pub struct Callbacks<S> {
  pub(crate) on_message: Option<MessageFn<S>>,
  pub(crate) on_part: Option<PartFn<S>>,
  pub(crate) on_error: Option<ErrorFn<S>>,
}

impl<S> Callbacks<S> {
  pub fn new() -> Self {
    Self {
      on_message: None,
      on_part: None,
      on_error: None,
    }
  }

  pub fn on_message(mut self, f: impl Fn(&S) + 'static) -> Self {
    self.on_message = Some(Rc::new(f));
    self
  }

  pub fn on_part(mut self, f: impl Fn(&S, &Msg, u32) + 'static) -> Self {
    self.on_part = Some(Rc::new(f));
    self
  }

  pub fn on_error(mut self, f: impl Fn(&S, &ZmqError) + 'static) -> Self {
    self.on_error = Some(Rc::new(f));
    self
  }

  pub(crate) fn validate(&self, direction: Direction) -> Result<(), ZmqError> {
    match direction {
      Direction::Read => match (&self.on_message, &self.on_part) {
        (Some(_), Some(_)) => Err(ZmqError::InvalidCallbacks(
          "read direction takes a message callback or a part callback, not both",
        )),
        (None, None) => Err(ZmqError::InvalidCallbacks(
          "read direction needs a message callback or a part callback",
        )),
        _ => Ok(()),
      },
      Direction::Write => {
        if self.on_part.is_some() {
          Err(ZmqError::InvalidCallbacks("write direction does not take a part callback"))
        } else if self.on_message.is_none() {
          Err(ZmqError::InvalidCallbacks("write direction needs a message callback"))
        } else {
          Ok(())
        }
      }
    }
  }
}

impl<S> Default for Callbacks<S> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S> Clone for Callbacks<S> {
  fn clone(&self) -> Self {
    Self {
      on_message: self.on_message.clone(),
      on_part: self.on_part.clone(),
      on_error: self.on_error.clone(),
    }
  }
}

/// Registration and cancellation state of one direction.
pub(crate) struct DirectionCore<S> {
  pub(crate) callbacks: Callbacks<S>,
  pub(crate) cancelled: bool,
  /// The one outstanding task, if any. Cleared when the task starts running.
  pub(crate) task: Option<TaskId>,
  /// The scheduler this direction was last registered on. Task ids are only
  /// meaningful to the scheduler that issued them.
  pub(crate) scheduler: Option<Rc<dyn Scheduler>>,
}

impl<S> DirectionCore<S> {
  fn new(cancelled: bool) -> Self {
    Self {
      callbacks: Callbacks::new(),
      cancelled,
      task: None,
      scheduler: None,
    }
  }

  fn is_finished(&self) -> bool {
    self.cancelled && self.task.is_none()
  }

  /// Takes the outstanding task together with the scheduler that owns it.
  pub(crate) fn take_task(&mut self) -> Option<(Rc<dyn Scheduler>, TaskId)> {
    let id = self.task.take()?;
    match &self.scheduler {
      Some(scheduler) => Some((scheduler.clone(), id)),
      None => {
        tracing::warn!(task = ?id, "Outstanding task without a scheduler");
        None
      }
    }
  }
}

/// Per-socket state shared by both directions.
pub(crate) struct ControlBlock<S> {
  pub(crate) socket: Rc<S>,
  pub(crate) fd: RawFd,
  pub(crate) read: DirectionCore<S>,
  pub(crate) write: DirectionCore<S>,
}

impl<S> ControlBlock<S> {
  /// A block for a first registration of `direction`; the other direction
  /// starts out cancelled.
  pub(crate) fn new(socket: Rc<S>, fd: RawFd, direction: Direction) -> Self {
    Self {
      socket,
      fd,
      read: DirectionCore::new(direction != Direction::Read),
      write: DirectionCore::new(direction != Direction::Write),
    }
  }

  pub(crate) fn core(&self, direction: Direction) -> &DirectionCore<S> {
    match direction {
      Direction::Read => &self.read,
      Direction::Write => &self.write,
    }
  }

  pub(crate) fn core_mut(&mut self, direction: Direction) -> &mut DirectionCore<S> {
    match direction {
      Direction::Read => &mut self.read,
      Direction::Write => &mut self.write,
    }
  }

  /// Both directions cancelled, neither with a task outstanding.
  pub(crate) fn is_terminated(&self) -> bool {
    self.read.is_finished() && self.write.is_finished()
  }
}

/// When the standalone [`cancel`](crate::bridge::cancel) entry point releases
/// a control block. The drain loop always uses the `Unified` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
  /// Release once both directions are cancelled and neither has a task
  /// outstanding.
  #[default]
  Unified,
  /// Release only when read is cancelled with no task, and write is cancelled
  /// *with* a task outstanding. Kept for parity with older integrations that
  /// rely on `cancel` leaving the block in place; blocks are then released by
  /// the drain path only.
  Legacy,
}

impl CancelPolicy {
  pub(crate) fn allows_release<S>(self, block: &ControlBlock<S>) -> bool {
    match self {
      CancelPolicy::Unified => block.is_terminated(),
      CancelPolicy::Legacy => {
        block.read.cancelled && block.read.task.is_none() && block.write.cancelled && block.write.task.is_some()
      }
    }
  }
}

/// The caller-owned handle through which the bridge reaches a socket's
/// control block.
///
/// Clones share the same slot. The slot starts empty, is filled by the first
/// registration and is emptied when the block is released; it is the only
/// source of truth for whether the block still exists.
pub struct CallbackSlot<S> {
  pub(crate) inner: Rc<RefCell<Option<ControlBlock<S>>>>,
  policy: CancelPolicy,
}

impl<S> CallbackSlot<S> {
  pub fn new() -> Self {
    Self::with_cancel_policy(CancelPolicy::default())
  }

  pub fn with_cancel_policy(policy: CancelPolicy) -> Self {
    Self {
      inner: Rc::new(RefCell::new(None)),
      policy,
    }
  }

  pub fn cancel_policy(&self) -> CancelPolicy {
    self.policy
  }

  /// True when no control block is allocated.
  pub fn is_empty(&self) -> bool {
    self.inner.borrow().is_none()
  }

  /// `None` when the slot is empty.
  pub fn is_cancelled(&self, direction: Direction) -> Option<bool> {
    self.with_block(|block| block.core(direction).cancelled)
  }

  /// The task currently outstanding for `direction`.
  pub fn task(&self, direction: Direction) -> Option<TaskId> {
    self.with_block(|block| block.core(direction).task).flatten()
  }

  pub fn socket(&self) -> Option<Rc<S>> {
    self.with_block(|block| block.socket.clone())
  }

  pub fn fd(&self) -> Option<RawFd> {
    self.with_block(|block| block.fd)
  }

  pub(crate) fn with_block<R>(&self, f: impl FnOnce(&mut ControlBlock<S>) -> R) -> Option<R> {
    self.inner.borrow_mut().as_mut().map(f)
  }

  /// Empties the slot. Returns `false` if it was already empty.
  pub(crate) fn release(&self) -> bool {
    let block = self.inner.borrow_mut().take();
    match block {
      Some(mut block) => {
        // Only reachable with an outstanding task under the legacy rule.
        let leftover = [block.read.take_task(), block.write.take_task()];
        for (scheduler, task) in leftover.into_iter().flatten() {
          scheduler.cancel(task);
        }
        tracing::debug!(fd = block.fd, "Control block released");
        true
      }
      None => false,
    }
  }
}

impl<S> Default for CallbackSlot<S> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S> Clone for CallbackSlot<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      policy: self.policy,
    }
  }
}

impl<S> fmt::Debug for CallbackSlot<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CallbackSlot")
      .field("empty", &self.is_empty())
      .field("policy", &self.policy)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::Master;

  struct NoSocket;

  fn block(direction: Direction) -> ControlBlock<NoSocket> {
    ControlBlock::new(Rc::new(NoSocket), 7, direction)
  }

  #[test]
  fn first_registration_precancels_the_other_direction() {
    let b = block(Direction::Read);
    assert!(!b.read.cancelled);
    assert!(b.write.cancelled);

    let b = block(Direction::Write);
    assert!(b.read.cancelled);
    assert!(!b.write.cancelled);
  }

  #[test]
  fn termination_needs_both_cancelled_and_idle() {
    let mut b = block(Direction::Read);
    assert!(!b.is_terminated());
    b.read.cancelled = true;
    assert!(b.is_terminated());
    b.write.task = Some(TaskId(3));
    assert!(!b.is_terminated());
  }

  #[test]
  fn legacy_policy_requires_outstanding_write_task() {
    let mut b = block(Direction::Read);
    b.read.cancelled = true;
    assert!(CancelPolicy::Unified.allows_release(&b));
    assert!(!CancelPolicy::Legacy.allows_release(&b));

    b.write.task = Some(TaskId(9));
    assert!(!CancelPolicy::Unified.allows_release(&b));
    assert!(CancelPolicy::Legacy.allows_release(&b));
  }

  #[test]
  fn release_cancels_leftover_tasks_on_their_own_scheduler() {
    let read_master = Rc::new(Master::new());
    let write_master = Rc::new(Master::new());
    let slot: CallbackSlot<NoSocket> = CallbackSlot::new();
    let read_task = read_master.schedule_now(Box::new(|| {}));
    let write_task = write_master.schedule_now(Box::new(|| {}));

    let mut b = block(Direction::Read);
    b.read.task = Some(read_task);
    b.read.scheduler = Some(read_master.clone());
    b.write.task = Some(write_task);
    b.write.scheduler = Some(write_master.clone());
    *slot.inner.borrow_mut() = Some(b);

    assert!(slot.release());
    assert!(slot.is_empty());
    assert_eq!(read_master.pending(), 0);
    assert_eq!(write_master.pending(), 0);
  }

  #[test]
  fn callback_shapes_are_validated_per_direction() {
    let both: Callbacks<NoSocket> = Callbacks::new().on_message(|_| {}).on_part(|_, _, _| {});
    let neither: Callbacks<NoSocket> = Callbacks::new().on_error(|_, _| {});
    let message: Callbacks<NoSocket> = Callbacks::new().on_message(|_| {});
    let part: Callbacks<NoSocket> = Callbacks::new().on_part(|_, _, _| {});

    assert!(both.validate(Direction::Read).is_err());
    assert!(neither.validate(Direction::Read).is_err());
    assert!(message.validate(Direction::Read).is_ok());
    assert!(part.validate(Direction::Read).is_ok());

    assert!(part.validate(Direction::Write).is_err());
    assert!(both.validate(Direction::Write).is_err());
    assert!(neither.validate(Direction::Write).is_err());
    assert!(message.validate(Direction::Write).is_ok());
  }

  #[test]
  fn empty_slot_reports_nothing() {
    let slot: CallbackSlot<NoSocket> = CallbackSlot::new();
    assert!(slot.is_empty());
    assert_eq!(slot.is_cancelled(Direction::Read), None);
    assert_eq!(slot.task(Direction::Write), None);
    assert!(!slot.release());
  }
}
