// tests/common.rs
#![allow(dead_code)] // Each test binary uses a different subset of helpers.

use rzmq_bridge::socket::{BridgeSocket, PollEvents, RecvFlags};
use rzmq_bridge::{InprocEngine, Master, Msg, PairSocket, ZmqError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::{Arc, Once};

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "rzmq_bridge=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

/// A loop plus a connected socket pair on a private engine.
pub struct Fixture {
  pub master: Rc<Master>,
  pub engine: Arc<InprocEngine>,
  pub a: Rc<PairSocket>,
  pub b: Rc<PairSocket>,
}

pub fn fixture() -> Fixture {
  setup_tracing();
  let engine = Arc::new(InprocEngine::new());
  let (a, b) = engine.pair().expect("Failed to create socket pair");
  Fixture {
    master: Rc::new(Master::new()),
    engine,
    a: Rc::new(a),
    b: Rc::new(b),
  }
}

/// Shared event log for callbacks.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, entry: impl Into<String>) {
    self.0.borrow_mut().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.borrow().clone()
  }

  pub fn len(&self) -> usize {
    self.0.borrow().len()
  }
}

/// Receives every part of one message and returns the payloads as strings.
pub fn recv_strings(socket: &PairSocket) -> Vec<String> {
  socket
    .recv_msg()
    .expect("recv_msg failed")
    .iter()
    .map(|part| String::from_utf8_lossy(part.data().unwrap_or_default()).into_owned())
    .collect()
}

/// Sends each of `parts` as one multi-part message.
pub fn send_strings(socket: &PairSocket, parts: &[&str]) {
  socket
    .send_multipart(parts.iter().map(|p| Msg::from_vec(p.as_bytes().to_vec())))
    .expect("send_multipart failed");
}

/// Counts how many times it has been dropped.
#[derive(Clone)]
pub struct DropProbe {
  drops: Rc<Cell<usize>>,
  _token: Rc<DropToken>,
}

struct DropToken(Rc<Cell<usize>>);

impl Drop for DropToken {
  fn drop(&mut self) {
    self.0.set(self.0.get() + 1);
  }
}

impl DropProbe {
  pub fn new() -> Self {
    let drops = Rc::new(Cell::new(0));
    Self {
      _token: Rc::new(DropToken(drops.clone())),
      drops,
    }
  }

  /// A counter that is bumped once, when the last clone of the probe is gone.
  pub fn counter(&self) -> Rc<Cell<usize>> {
    self.drops.clone()
  }
}

/// A socket whose descriptor and readiness are scripted by the test.
///
/// `fd` is the read end of a `UnixStream` pair; `signal` makes it readable,
/// as a real socket's descriptor would be after a state change.
pub struct ScriptedSocket {
  pub events: Cell<PollEvents>,
  pub fail_fd: Cell<bool>,
  pub fail_events: Cell<bool>,
  /// `poll` fails for any interest intersecting these bits.
  pub fail_poll: Cell<PollEvents>,
  pub polls: Cell<usize>,
  tx: UnixStream,
  rx: UnixStream,
}

impl ScriptedSocket {
  pub fn new(events: PollEvents) -> Self {
    let (tx, rx) = UnixStream::pair().expect("Failed to create signal pair");
    tx.set_nonblocking(true).expect("set_nonblocking failed");
    rx.set_nonblocking(true).expect("set_nonblocking failed");
    Self {
      events: Cell::new(events),
      fail_fd: Cell::new(false),
      fail_events: Cell::new(false),
      fail_poll: Cell::new(PollEvents::empty()),
      polls: Cell::new(0),
      tx,
      rx,
    }
  }

  pub fn signal(&self) {
    use std::io::Write;
    let _ = (&self.tx).write(&[1u8]);
  }

  fn drain(&self) {
    use std::io::Read;
    let mut buf = [0u8; 64];
    while matches!((&self.rx).read(&mut buf), Ok(n) if n > 0) {}
  }
}

impl BridgeSocket for ScriptedSocket {
  fn fd(&self) -> Result<RawFd, ZmqError> {
    if self.fail_fd.get() {
      return Err(ZmqError::ContextTerminated);
    }
    Ok(self.rx.as_raw_fd())
  }

  fn events(&self) -> Result<PollEvents, ZmqError> {
    if self.fail_events.get() {
      return Err(ZmqError::ContextTerminated);
    }
    self.drain();
    Ok(self.events.get())
  }

  fn poll(&self, interest: PollEvents) -> Result<PollEvents, ZmqError> {
    self.polls.set(self.polls.get() + 1);
    if interest.intersects(self.fail_poll.get()) {
      return Err(ZmqError::Internal("scripted poll failure".into()));
    }
    Ok(self.events()? & interest)
  }

  fn recv_part(&self, _msg: &mut Msg, _flags: RecvFlags) -> Result<(), ZmqError> {
    Err(ZmqError::ResourceLimitReached)
  }

  fn rcvmore(&self) -> Result<bool, ZmqError> {
    Ok(false)
  }
}
