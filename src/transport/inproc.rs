// src/transport/inproc.rs

//! In-process messaging backend.
//!
//! `InprocEngine` hands out connected `PairSocket`s. Each socket owns a
//! notification descriptor (one end of a `UnixStream` pair) that behaves like
//! libzmq's `ZMQ_FD`: it becomes readable whenever this socket's readiness may
//! have changed, in either direction, and it is reset by reading `events`.
//! Sockets are single-threaded (`Rc` internally) and must stay on the thread
//! that created them.

use crate::context::Engine;
use crate::error::ZmqError;
use crate::message::{Msg, MsgFlags};
use crate::socket::options::{parse_bool_option, InprocOptions, EVENTS, FD, IPV6, RCVMORE};
use crate::socket::{BridgeSocket, PollEvents, RecvFlags, SendFlags};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Engine for in-process socket pairs.
#[derive(Debug)]
pub struct InprocEngine {
  ipv6: AtomicBool,
  terminated: AtomicBool,
  next_handle: AtomicUsize,
}

impl Default for InprocEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl InprocEngine {
  pub fn new() -> Self {
    Self {
      ipv6: AtomicBool::new(false),
      terminated: AtomicBool::new(false),
      next_handle: AtomicUsize::new(1), // Start handle IDs from 1.
    }
  }

  /// Whether IPv6 support was enabled on this engine.
  pub fn ipv6(&self) -> bool {
    self.ipv6.load(Ordering::Acquire)
  }

  pub fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::Acquire)
  }

  /// Context-level `zmq_ctx_set` equivalent. Only `IPV6` is supported.
  pub fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    match option {
      IPV6 => {
        let enabled = parse_bool_option(value).map_err(|_| ZmqError::InvalidOptionValue(option))?;
        self.ipv6.store(enabled, Ordering::Release);
        Ok(())
      }
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  /// Context-level `zmq_ctx_get` equivalent.
  pub fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    match option {
      IPV6 => Ok((self.ipv6() as i32).to_ne_bytes().to_vec()),
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  /// Creates two sockets connected to each other.
  pub fn pair(self: &Arc<Self>) -> Result<(PairSocket, PairSocket), ZmqError> {
    if self.is_terminated() {
      return Err(ZmqError::ContextTerminated);
    }
    let channel = Rc::new(RefCell::new(Channel {
      ends: [Endpoint::new()?, Endpoint::new()?],
    }));
    let first = self.next_handle.fetch_add(2, Ordering::Relaxed);
    tracing::debug!(first_handle = first, "Inproc socket pair created");
    Ok((
      PairSocket::new(first, 0, channel.clone(), self.clone()),
      PairSocket::new(first + 1, 1, channel, self.clone()),
    ))
  }
}

impl Engine for InprocEngine {
  fn create() -> Result<Self, ZmqError> {
    Ok(Self::new())
  }

  fn set_ipv6(&self, enabled: bool) -> Result<(), ZmqError> {
    self.ipv6.store(enabled, Ordering::Release);
    Ok(())
  }

  fn terminate(&self) {
    if !self.terminated.swap(true, Ordering::AcqRel) {
      tracing::debug!("Inproc engine terminated");
    }
  }
}

/// One side of a pair.
struct Endpoint {
  /// Whole messages waiting to be received by this side.
  inbound: VecDeque<VecDeque<Msg>>,
  /// Remaining parts of the message currently being received.
  current: VecDeque<Msg>,
  rcvmore: bool,
  options: InprocOptions,
  closed: bool,
  signal_tx: UnixStream,
  signal_rx: UnixStream,
}

impl Endpoint {
  fn new() -> io::Result<Self> {
    let (signal_tx, signal_rx) = UnixStream::pair()?;
    signal_tx.set_nonblocking(true)?;
    signal_rx.set_nonblocking(true)?;
    Ok(Self {
      inbound: VecDeque::new(),
      current: VecDeque::new(),
      rcvmore: false,
      options: InprocOptions::default(),
      closed: false,
      signal_tx,
      signal_rx,
    })
  }

  /// Makes the notification descriptor readable.
  fn notify(&self) {
    match (&self.signal_tx).write(&[1u8]) {
      Ok(_) => {}
      // Buffer full: the descriptor is already readable.
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
      Err(e) => tracing::warn!(error = %e, "Inproc signal write failed"),
    }
  }

  /// Consumes all pending notifications.
  fn drain_signal(&self) -> io::Result<()> {
    let mut buf = [0u8; 64];
    loop {
      match (&self.signal_rx).read(&mut buf) {
        Ok(0) => return Ok(()),
        Ok(_) => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }

  fn readable(&self) -> bool {
    !self.current.is_empty() || !self.inbound.is_empty()
  }
}

struct Channel {
  ends: [Endpoint; 2],
}

impl Channel {
  fn split(&mut self, side: usize) -> (&mut Endpoint, &mut Endpoint) {
    let (first, second) = self.ends.split_at_mut(1);
    if side == 0 {
      (&mut first[0], &mut second[0])
    } else {
      (&mut second[0], &mut first[0])
    }
  }
}

fn writable(own: &Endpoint, peer: &Endpoint) -> bool {
  !peer.closed && peer.inbound.len() < own.options.sndhwm.min(peer.options.rcvhwm)
}

/// One end of an in-process, bidirectional, multi-part socket pair.
///
/// Sends never block: when the peer's queue is at its high-water mark the
/// first part of a message fails with `ZmqError::ResourceLimitReached`,
/// regardless of `SendFlags::DONTWAIT`. Once the first part is accepted the
/// rest of the message is accepted too.
pub struct PairSocket {
  handle: usize,
  side: usize,
  channel: Rc<RefCell<Channel>>,
  engine: Arc<InprocEngine>,
  outgoing: RefCell<Vec<Msg>>,
}

impl PairSocket {
  fn new(handle: usize, side: usize, channel: Rc<RefCell<Channel>>, engine: Arc<InprocEngine>) -> Self {
    Self {
      handle,
      side,
      channel,
      engine,
      outgoing: RefCell::new(Vec::new()),
    }
  }

  pub fn handle(&self) -> usize {
    self.handle
  }

  fn check_live(&self) -> Result<(), ZmqError> {
    if self.engine.is_terminated() {
      return Err(ZmqError::ContextTerminated);
    }
    if self.channel.borrow().ends[self.side].closed {
      return Err(ZmqError::InvalidState("socket is closed"));
    }
    Ok(())
  }

  /// Sends one part. `SendFlags::MORE` marks further parts of the same message.
  pub fn send(&self, msg: Msg, flags: SendFlags) -> Result<(), ZmqError> {
    self.check_live()?;
    let mut outgoing = self.outgoing.borrow_mut();
    let mut channel = self.channel.borrow_mut();
    let (own, peer) = channel.split(self.side);

    if peer.closed {
      return Err(ZmqError::ConnectionClosed);
    }
    if outgoing.is_empty() && !writable(own, peer) {
      return Err(ZmqError::ResourceLimitReached);
    }

    let mut msg = msg;
    if flags.contains(SendFlags::MORE) {
      msg.set_flags(MsgFlags::MORE);
      outgoing.push(msg);
      return Ok(());
    }

    msg.set_flags(MsgFlags::empty());
    let mut parts: VecDeque<Msg> = outgoing.drain(..).collect();
    parts.push_back(msg);
    tracing::trace!(handle = self.handle, parts = parts.len(), "Inproc message delivered");
    peer.inbound.push_back(parts);
    peer.notify();
    Ok(())
  }

  /// Sends all `parts` as one message.
  pub fn send_multipart<I>(&self, parts: I) -> Result<(), ZmqError>
  where
    I: IntoIterator<Item = Msg>,
  {
    let mut iter = parts.into_iter().peekable();
    if iter.peek().is_none() {
      return Err(ZmqError::InvalidArgument("empty multipart message".into()));
    }
    while let Some(part) = iter.next() {
      let flags = if iter.peek().is_some() {
        SendFlags::MORE
      } else {
        SendFlags::empty()
      };
      self.send(part, flags)?;
    }
    Ok(())
  }

  /// Receives every part of the next message without blocking.
  pub fn recv_msg(&self) -> Result<Vec<Msg>, ZmqError> {
    let mut parts = Vec::new();
    loop {
      let mut msg = Msg::new();
      self.recv_part(&mut msg, RecvFlags::DONTWAIT)?;
      let more = msg.is_more();
      parts.push(msg);
      if !more {
        return Ok(parts);
      }
    }
  }

  pub fn set_option(&self, option: i32, value: &[u8]) -> Result<(), ZmqError> {
    self.check_live()?;
    let mut channel = self.channel.borrow_mut();
    channel.ends[self.side].options.set(option, value)
  }

  pub fn get_option(&self, option: i32) -> Result<Vec<u8>, ZmqError> {
    match option {
      FD => Ok(self.fd()?.to_ne_bytes().to_vec()),
      EVENTS => Ok((self.events()?.bits() as i32).to_ne_bytes().to_vec()),
      RCVMORE => Ok((self.rcvmore()? as i32).to_ne_bytes().to_vec()),
      _ => {
        self.check_live()?;
        self.channel.borrow().ends[self.side].options.get(option)
      }
    }
  }

  /// Closes this end. Queued inbound messages are discarded and the peer is
  /// notified. Further operations on this end fail.
  pub fn close(&self) {
    let mut channel = self.channel.borrow_mut();
    let (own, peer) = channel.split(self.side);
    if own.closed {
      return;
    }
    own.closed = true;
    own.inbound.clear();
    own.current.clear();
    own.rcvmore = false;
    peer.notify();
    tracing::debug!(handle = self.handle, "Inproc socket closed");
  }
}

impl Drop for PairSocket {
  fn drop(&mut self) {
    self.close();
  }
}

impl BridgeSocket for PairSocket {
  fn fd(&self) -> Result<RawFd, ZmqError> {
    self.check_live()?;
    Ok(self.channel.borrow().ends[self.side].signal_rx.as_raw_fd())
  }

  fn events(&self) -> Result<PollEvents, ZmqError> {
    self.check_live()?;
    let channel = self.channel.borrow();
    let own = &channel.ends[self.side];
    let peer = &channel.ends[1 - self.side];
    own.drain_signal()?;

    let mut events = PollEvents::empty();
    if own.readable() {
      events |= PollEvents::POLLIN;
    }
    if writable(own, peer) {
      events |= PollEvents::POLLOUT;
    }
    Ok(events)
  }

  fn recv_part(&self, msg: &mut Msg, _flags: RecvFlags) -> Result<(), ZmqError> {
    self.check_live()?;
    let mut channel = self.channel.borrow_mut();
    let (own, peer) = channel.split(self.side);

    if own.current.is_empty() {
      match own.inbound.pop_front() {
        Some(parts) => {
          own.current = parts;
          // A queue slot was freed; the peer may have become writable.
          if !peer.closed {
            peer.notify();
          }
        }
        None => {
          own.rcvmore = false;
          return Err(ZmqError::ResourceLimitReached);
        }
      }
    }

    let part = own
      .current
      .pop_front()
      .ok_or_else(|| ZmqError::Internal("empty message in inbound queue".into()))?;
    own.rcvmore = !own.current.is_empty();
    msg.overwrite(part);
    msg.set_flags(if own.rcvmore { MsgFlags::MORE } else { MsgFlags::empty() });
    Ok(())
  }

  fn rcvmore(&self) -> Result<bool, ZmqError> {
    self.check_live()?;
    Ok(self.channel.borrow().ends[self.side].rcvmore)
  }
}
