// src/runtime/tokio_local.rs

//! `Scheduler` on top of a tokio `LocalSet`.
//!
//! Must be used from inside `LocalSet::run_until` (or a task spawned on the
//! set), since every scheduled task is a `spawn_local` future.

use crate::runtime::scheduler::{Scheduler, Task, TaskId};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::rc::Rc;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::task::JoinHandle;

type HandleMap = Rc<RefCell<HashMap<TaskId, JoinHandle<()>>>>;

#[derive(Default)]
pub struct TokioScheduler {
  next_id: Cell<u64>,
  handles: HandleMap,
}

impl TokioScheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of tasks that have been scheduled and have neither run nor been
  /// cancelled.
  pub fn pending(&self) -> usize {
    self.handles.borrow().len()
  }

  fn next_id(&self) -> TaskId {
    let id = self.next_id.get() + 1;
    self.next_id.set(id);
    TaskId(id)
  }
}

// The wait registers its own duplicate of the descriptor: the read and write
// directions of one socket wait on the same fd, and a descriptor can only be
// registered with the reactor once.
fn duplicate(fd: RawFd) -> std::io::Result<OwnedFd> {
  // SAFETY: the caller's descriptor stays open while its wait is scheduled;
  // it is only borrowed long enough to be duplicated.
  let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
  borrowed.try_clone_to_owned()
}

impl Scheduler for TokioScheduler {
  fn schedule_readable(&self, fd: RawFd, task: Task) -> TaskId {
    let id = self.next_id();
    let handles = self.handles.clone();
    let handle = tokio::task::spawn_local(async move {
      let wait = duplicate(fd).and_then(|owned| AsyncFd::with_interest(owned, Interest::READABLE));
      let async_fd = match wait {
        Ok(async_fd) => async_fd,
        Err(e) => {
          tracing::error!(task = id.as_u64(), fd, error = %e, "Failed to register descriptor wait; task dropped");
          handles.borrow_mut().remove(&id);
          return;
        }
      };
      if let Err(e) = async_fd.readable().await {
        tracing::error!(task = id.as_u64(), fd, error = %e, "Descriptor wait failed; task dropped");
        handles.borrow_mut().remove(&id);
        return;
      }
      // Deregister before running; the task may schedule a new wait on fd.
      drop(async_fd);
      handles.borrow_mut().remove(&id);
      tracing::trace!(task = id.as_u64(), fd, "Descriptor readable");
      task();
    });
    self.handles.borrow_mut().insert(id, handle);
    id
  }

  fn schedule_now(&self, task: Task) -> TaskId {
    let id = self.next_id();
    let handles = self.handles.clone();
    let handle = tokio::task::spawn_local(async move {
      handles.borrow_mut().remove(&id);
      task();
    });
    self.handles.borrow_mut().insert(id, handle);
    id
  }

  fn cancel(&self, id: TaskId) -> bool {
    let handle = self.handles.borrow_mut().remove(&id);
    match handle {
      Some(handle) => {
        handle.abort();
        true
      }
      None => false,
    }
  }
}
