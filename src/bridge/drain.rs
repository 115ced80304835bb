// src/bridge/drain.rs

//! The read and write drain tasks.
//!
//! A drain runs when its direction's task fires. It polls the socket for the
//! direction's real readiness, invokes the callbacks until that readiness is
//! gone, re-checks the opposite direction if anything was processed, and
//! waits on the descriptor again. After every callback it re-reads the slot:
//! a callback may have cancelled the direction or released the block.

use crate::bridge::control::{CallbackSlot, Callbacks, Direction};
use crate::bridge::lifecycle::{cross_check, finish_cancelled};
use crate::error::ZmqError;
use crate::message::Msg;
use crate::runtime::Task;
use crate::socket::{BridgeSocket, PollEvents, RecvFlags};

use std::os::fd::RawFd;
use std::rc::Rc;

pub(crate) fn task_for<S: BridgeSocket + 'static>(slot: CallbackSlot<S>, direction: Direction) -> Task {
  match direction {
    Direction::Read => Box::new(move || read_drain(&slot)),
    Direction::Write => Box::new(move || write_drain(&slot)),
  }
}

/// What a drain needs from the block, copied out so no borrow is held while
/// callbacks run.
struct Pass<S> {
  socket: Rc<S>,
  fd: RawFd,
  callbacks: Callbacks<S>,
}

/// Starts a pass: the firing task is no longer outstanding. `None` when the
/// block is gone or the direction was cancelled after the task was queued.
fn begin<S>(slot: &CallbackSlot<S>, direction: Direction) -> Option<Pass<S>> {
  let state = slot.with_block(|block| {
    let cancelled = {
      let core = block.core_mut(direction);
      core.task = None;
      core.cancelled
    };
    if cancelled {
      return Err(block.is_terminated());
    }
    Ok(Pass {
      socket: block.socket.clone(),
      fd: block.fd,
      callbacks: block.core(direction).callbacks.clone(),
    })
  });
  match state {
    Some(Ok(pass)) => Some(pass),
    Some(Err(terminated)) => {
      tracing::warn!(%direction, "Drain fired for a cancelled direction");
      if terminated {
        slot.release();
      }
      None
    }
    None => {
      tracing::warn!(%direction, "Drain fired on a released control block");
      None
    }
  }
}

/// Re-reads the block after a callback. `None` if the direction was
/// cancelled or the block released in the meantime.
fn checkpoint<S>(slot: &CallbackSlot<S>, direction: Direction) -> Option<Pass<S>> {
  slot
    .with_block(|block| {
      let core = block.core(direction);
      if core.cancelled {
        None
      } else {
        Some(Pass {
          socket: block.socket.clone(),
          fd: block.fd,
          callbacks: core.callbacks.clone(),
        })
      }
    })
    .flatten()
}

fn has_event<S: BridgeSocket>(pass: &Pass<S>, event: PollEvents) -> Result<bool, ZmqError> {
  Ok(pass.socket.poll(event)?.contains(event))
}

fn read_drain<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>) {
  let direction = Direction::Read;
  let Some(mut pass) = begin(slot, direction) else {
    return;
  };
  let mut processed = false;

  loop {
    match has_event(&pass, PollEvents::POLLIN) {
      Ok(true) => {}
      Ok(false) => break,
      Err(e) => return fail(direction, &pass, e),
    }

    if let Some(on_message) = pass.callbacks.on_message.clone() {
      on_message(&*pass.socket);
      processed = true;
      match checkpoint(slot, direction) {
        Some(next) => pass = next,
        None => return finish_cancelled(slot, direction),
      }
      continue;
    }

    let Some(on_part) = pass.callbacks.on_part.clone() else {
      // Registration guarantees one of the two callbacks.
      break;
    };
    let mut msg = Msg::new();
    let mut part: u32 = 0;
    loop {
      match pass.socket.recv_part(&mut msg, RecvFlags::DONTWAIT) {
        Ok(()) => {}
        Err(e) if e.is_would_block() => break,
        Err(e) => {
          drop(msg);
          return fail(direction, &pass, e);
        }
      }
      processed = true;
      tracing::trace!(fd = pass.fd, part, "Delivering message part");

      on_part(&*pass.socket, &msg, part);
      match checkpoint(slot, direction) {
        Some(next) => pass = next,
        None => {
          drop(msg);
          return finish_cancelled(slot, direction);
        }
      }

      // The callback may have received further parts itself, so ask the
      // socket rather than the message's flags.
      match pass.socket.rcvmore() {
        Ok(true) => part += 1,
        Ok(false) => break,
        Err(e) => {
          drop(msg);
          return fail(direction, &pass, e);
        }
      }
    }
    drop(msg);
  }

  if processed {
    cross_check(slot, direction.opposite());
  }
  rearm(slot, direction);
}

fn write_drain<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>) {
  let direction = Direction::Write;
  let Some(mut pass) = begin(slot, direction) else {
    return;
  };
  let mut processed = false;

  loop {
    match has_event(&pass, PollEvents::POLLOUT) {
      Ok(true) => {}
      Ok(false) => break,
      Err(e) => return fail(direction, &pass, e),
    }

    let Some(on_message) = pass.callbacks.on_message.clone() else {
      break;
    };
    on_message(&*pass.socket);
    processed = true;
    match checkpoint(slot, direction) {
      Some(next) => pass = next,
      None => return finish_cancelled(slot, direction),
    }
  }

  if processed {
    cross_check(slot, direction.opposite());
  }
  rearm(slot, direction);
}

/// Waits on the descriptor again, unless a callback already scheduled a task
/// for this direction by re-registering it.
fn rearm<S: BridgeSocket + 'static>(slot: &CallbackSlot<S>, direction: Direction) {
  let target = slot
    .with_block(|block| {
      let core = block.core(direction);
      if core.cancelled || core.task.is_some() {
        None
      } else {
        core.scheduler.clone().map(|scheduler| (scheduler, block.fd))
      }
    })
    .flatten();
  let Some((scheduler, fd)) = target else {
    return;
  };

  let id = scheduler.schedule_readable(fd, task_for(slot.clone(), direction));
  slot.with_block(|block| block.core_mut(direction).task = Some(id));
  tracing::trace!(fd, %direction, task = ?id, "Drain re-armed");
}

/// Polling failed: report it and leave the direction idle until it is
/// registered again.
fn fail<S>(direction: Direction, pass: &Pass<S>, error: ZmqError) {
  match direction {
    Direction::Read => tracing::error!(fd = pass.fd, error = %error, "ZeroMQ read error"),
    Direction::Write => tracing::error!(fd = pass.fd, error = %error, "ZeroMQ write error"),
  }
  if let Some(on_error) = &pass.callbacks.on_error {
    on_error(&*pass.socket, &error);
  }
}
