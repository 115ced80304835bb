// src/runtime/master.rs

//! `Master`: a small single-threaded event loop.
//!
//! Immediate tasks run in FIFO order. Readable waits are one-shot: when the
//! descriptor polls readable, every wait on it moves to the immediate queue
//! and is forgotten by the loop. Readiness is checked with `poll(2)`, so it is
//! level-style from the scheduler's point of view.

use crate::error::ZmqError;
use crate::runtime::scheduler::{Scheduler, Task, TaskId};

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

struct ReadWait {
  fd: RawFd,
  task: Task,
}

#[derive(Default)]
struct MasterState {
  next_id: u64,
  ready: VecDeque<(TaskId, Task)>,
  // Keyed by id so waits on one descriptor fire in registration order.
  reads: BTreeMap<TaskId, ReadWait>,
}

impl MasterState {
  fn next_id(&mut self) -> TaskId {
    self.next_id += 1;
    TaskId(self.next_id)
  }
}

#[derive(Default)]
pub struct Master {
  state: RefCell<MasterState>,
}

impl Master {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of tasks waiting to run, immediate and readable waits combined.
  pub fn pending(&self) -> usize {
    let state = self.state.borrow();
    state.ready.len() + state.reads.len()
  }

  /// Whether `id` is still scheduled.
  pub fn is_scheduled(&self, id: TaskId) -> bool {
    self.is_immediate(id) || self.is_waiting_readable(id)
  }

  /// Whether `id` is queued to run without waiting on a descriptor.
  pub fn is_immediate(&self, id: TaskId) -> bool {
    self.state.borrow().ready.iter().any(|(queued, _)| *queued == id)
  }

  /// Whether `id` is waiting for its descriptor to become readable.
  pub fn is_waiting_readable(&self, id: TaskId) -> bool {
    self.state.borrow().reads.contains_key(&id)
  }

  /// Runs one batch of tasks and returns how many ran.
  ///
  /// If immediate tasks are queued, they run without polling. Otherwise the
  /// readable waits are polled for up to `timeout` (`None` blocks until a
  /// descriptor is readable); the ones that fire then run. Tasks scheduled by
  /// the batch itself run in a later batch.
  pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize, ZmqError> {
    if self.state.borrow().ready.is_empty() {
      self.poll_reads(timeout)?;
    }

    let batch: Vec<TaskId> = self.state.borrow().ready.iter().map(|(id, _)| *id).collect();
    let mut ran = 0;
    for id in batch {
      // An earlier task in the batch may have cancelled this one.
      let task = {
        let mut state = self.state.borrow_mut();
        state
          .ready
          .iter()
          .position(|(queued, _)| *queued == id)
          .and_then(|pos| state.ready.remove(pos))
      };
      if let Some((_, task)) = task {
        tracing::trace!(task = id.as_u64(), "Running task");
        task();
        ran += 1;
      }
    }
    Ok(ran)
  }

  /// Runs batches with a zero timeout until nothing is runnable. Returns the
  /// total number of tasks run.
  pub fn run_until_idle(&self) -> Result<usize, ZmqError> {
    let mut total = 0;
    loop {
      let ran = self.run_once(Some(Duration::ZERO))?;
      if ran == 0 {
        return Ok(total);
      }
      total += ran;
    }
  }

  fn poll_reads(&self, timeout: Option<Duration>) -> Result<(), ZmqError> {
    let mut pollfds: Vec<libc::pollfd> = {
      let state = self.state.borrow();
      if state.reads.is_empty() {
        return Ok(());
      }
      let mut fds: Vec<RawFd> = state.reads.values().map(|wait| wait.fd).collect();
      fds.sort_unstable();
      fds.dedup();
      fds
        .into_iter()
        .map(|fd| libc::pollfd {
          fd,
          events: libc::POLLIN,
          revents: 0,
        })
        .collect()
    };

    let timeout_ms = timeout_to_millis(timeout);
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
      let err = io::Error::last_os_error();
      if err.kind() == io::ErrorKind::Interrupted {
        return Ok(());
      }
      return Err(ZmqError::Io(err));
    }
    if rc == 0 {
      return Ok(());
    }

    let fired: Vec<RawFd> = pollfds
      .iter()
      .filter(|pfd| pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0)
      .map(|pfd| pfd.fd)
      .collect();

    let mut state = self.state.borrow_mut();
    let ids: Vec<TaskId> = state
      .reads
      .iter()
      .filter(|(_, wait)| fired.contains(&wait.fd))
      .map(|(id, _)| *id)
      .collect();
    for id in ids {
      if let Some(wait) = state.reads.remove(&id) {
        tracing::trace!(task = id.as_u64(), fd = wait.fd, "Descriptor readable");
        state.ready.push_back((id, wait.task));
      }
    }
    Ok(())
  }
}

fn timeout_to_millis(timeout: Option<Duration>) -> libc::c_int {
  match timeout {
    None => -1,
    Some(d) if d.is_zero() => 0,
    Some(d) => {
      // Round up so sub-millisecond timeouts still wait.
      let ms = d.as_millis().max(1);
      ms.min(libc::c_int::MAX as u128) as libc::c_int
    }
  }
}

impl Scheduler for Master {
  fn schedule_readable(&self, fd: RawFd, task: Task) -> TaskId {
    let mut state = self.state.borrow_mut();
    let id = state.next_id();
    state.reads.insert(id, ReadWait { fd, task });
    tracing::trace!(task = id.as_u64(), fd, "Scheduled readable wait");
    id
  }

  fn schedule_now(&self, task: Task) -> TaskId {
    let mut state = self.state.borrow_mut();
    let id = state.next_id();
    state.ready.push_back((id, task));
    tracing::trace!(task = id.as_u64(), "Scheduled immediate task");
    id
  }

  fn cancel(&self, id: TaskId) -> bool {
    // Drop the task outside the borrow; its captures may own other handles.
    let removed: Option<Task> = {
      let mut state = self.state.borrow_mut();
      if let Some(wait) = state.reads.remove(&id) {
        Some(wait.task)
      } else {
        state
          .ready
          .iter()
          .position(|(queued, _)| *queued == id)
          .and_then(|pos| state.ready.remove(pos))
          .map(|(_, task)| task)
      }
    };
    let cancelled = removed.is_some();
    drop(removed);
    tracing::trace!(task = id.as_u64(), cancelled, "Cancel requested");
    cancelled
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::io::Write;
  use std::os::fd::AsRawFd;
  use std::os::unix::net::UnixStream;
  use std::rc::Rc;

  fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = log.clone();
    let make = move |name: &'static str| -> Task {
      let log = log_clone.clone();
      Box::new(move || log.borrow_mut().push(name))
    };
    (log, make)
  }

  #[test]
  fn immediate_tasks_run_fifo() {
    let master = Master::new();
    let (log, task) = recorder();
    master.schedule_now(task("a"));
    master.schedule_now(task("b"));
    master.schedule_now(task("c"));
    assert_eq!(master.run_until_idle().unwrap(), 3);
    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    assert_eq!(master.pending(), 0);
  }

  #[test]
  fn cancelled_tasks_never_run() {
    let master = Master::new();
    let (log, task) = recorder();
    let a = master.schedule_now(task("a"));
    let (_tx, rx) = UnixStream::pair().unwrap();
    let b = master.schedule_readable(rx.as_raw_fd(), task("b"));
    assert!(master.is_immediate(a));
    assert!(master.is_waiting_readable(b));

    assert!(master.cancel(a));
    assert!(master.cancel(b));
    assert!(!master.cancel(b));
    assert_eq!(master.run_until_idle().unwrap(), 0);
    assert!(log.borrow().is_empty());
  }

  #[test]
  fn readable_wait_fires_once_descriptor_is_readable() {
    let master = Master::new();
    let (log, task) = recorder();
    let (mut tx, rx) = UnixStream::pair().unwrap();
    let id = master.schedule_readable(rx.as_raw_fd(), task("read"));

    assert_eq!(master.run_once(Some(Duration::ZERO)).unwrap(), 0);
    assert!(master.is_waiting_readable(id));

    tx.write_all(&[1]).unwrap();
    assert_eq!(master.run_once(Some(Duration::from_millis(100))).unwrap(), 1);
    assert_eq!(*log.borrow(), vec!["read"]);
    assert!(!master.is_scheduled(id));
  }

  #[test]
  fn tasks_scheduled_during_a_batch_run_in_the_next_one() {
    let master = Rc::new(Master::new());
    let log = Rc::new(RefCell::new(Vec::new()));
    {
      let master_inner = master.clone();
      let log = log.clone();
      master.schedule_now(Box::new(move || {
        log.borrow_mut().push("outer");
        let log = log.clone();
        master_inner.schedule_now(Box::new(move || log.borrow_mut().push("inner")));
      }));
    }
    assert_eq!(master.run_once(Some(Duration::ZERO)).unwrap(), 1);
    assert_eq!(*log.borrow(), vec!["outer"]);
    assert_eq!(master.run_once(Some(Duration::ZERO)).unwrap(), 1);
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
  }

  #[test]
  fn a_task_can_cancel_a_later_task_in_its_batch() {
    let master = Rc::new(Master::new());
    let (log, task) = recorder();
    let victim = Rc::new(RefCell::new(None));
    {
      let master_inner = master.clone();
      let victim = victim.clone();
      master.schedule_now(Box::new(move || {
        if let Some(id) = victim.borrow_mut().take() {
          master_inner.cancel(id);
        }
      }));
    }
    *victim.borrow_mut() = Some(master.schedule_now(task("victim")));
    assert_eq!(master.run_until_idle().unwrap(), 1);
    assert!(log.borrow().is_empty());
  }
}
