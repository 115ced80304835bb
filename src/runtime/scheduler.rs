use std::fmt;
use std::os::fd::RawFd;

/// A one-shot unit of work. It runs at most once and is dropped afterwards.
pub type Task = Box<dyn FnOnce()>;

/// Opaque handle for a scheduled task, valid until the task runs or is
/// cancelled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Debug for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TaskId({})", self.0)
  }
}

/// A single-threaded cooperative scheduler.
///
/// Tasks never preempt each other. Implementations must not hold internal
/// borrows while a task runs, since tasks schedule and cancel other tasks.
pub trait Scheduler {
  /// Runs `task` once `fd` is readable.
  fn schedule_readable(&self, fd: RawFd, task: Task) -> TaskId;

  /// Runs `task` on the next turn of the loop, without waiting on anything.
  fn schedule_now(&self, task: Task) -> TaskId;

  /// Cancels a task that has not run yet. Returns `false` if `id` was not
  /// pending (already ran, already cancelled, or unknown).
  fn cancel(&self, id: TaskId) -> bool;
}
