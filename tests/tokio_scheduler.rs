// tests/tokio_scheduler.rs

mod common;

use common::{recv_strings, send_strings, Log};
use rzmq_bridge::socket::options::SNDHWM;
use rzmq_bridge::socket::SendFlags;
use rzmq_bridge::{add_read, add_write, cancel, CallbackSlot, Callbacks, Direction, InprocEngine, Msg, PairSocket, TokioScheduler};

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::LocalSet;
use tokio::time::{sleep, timeout};

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

async fn wait_until(mut done: impl FnMut() -> bool) {
  timeout(LONG_TIMEOUT, async {
    while !done() {
      sleep(Duration::from_millis(1)).await;
    }
  })
  .await
  .expect("condition not reached in time");
}

fn pair() -> (Rc<PairSocket>, Rc<PairSocket>) {
  common::setup_tracing();
  let engine = Arc::new(InprocEngine::new());
  let (a, b) = engine.pair().expect("Failed to create socket pair");
  (Rc::new(a), Rc::new(b))
}

#[tokio::test(flavor = "current_thread")]
async fn read_direction_wakes_on_descriptor() {
  let local = LocalSet::new();
  local
    .run_until(async {
      let scheduler = Rc::new(TokioScheduler::new());
      let (a, b) = pair();
      let slot = CallbackSlot::new();
      let log = Log::new();

      let cb_log = log.clone();
      let callbacks = Callbacks::new().on_message(move |s: &PairSocket| cb_log.push(recv_strings(s).join(",")));
      add_read(&scheduler, callbacks, b.clone(), &slot).unwrap();
      assert_eq!(scheduler.pending(), 1);

      send_strings(&a, &["one"]);
      send_strings(&a, &["two", "parts"]);
      wait_until(|| log.len() == 2).await;
      assert_eq!(log.entries(), vec!["one", "two,parts"]);

      send_strings(&a, &["three"]);
      wait_until(|| log.len() == 3).await;

      cancel(&slot, Direction::Read);
      assert!(slot.is_empty());
      assert_eq!(scheduler.pending(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn write_direction_resumes_after_peer_consumes() {
  let local = LocalSet::new();
  local
    .run_until(async {
      let scheduler = Rc::new(TokioScheduler::new());
      let (a, b) = pair();
      a.set_option(SNDHWM, &2i32.to_ne_bytes()).unwrap();
      let slot = CallbackSlot::new();

      let sent = Rc::new(Cell::new(0u32));
      let counter = sent.clone();
      let callbacks = Callbacks::new().on_message(move |s: &PairSocket| {
        counter.set(counter.get() + 1);
        s.send(Msg::from_static(b"w"), SendFlags::DONTWAIT).expect("send while writable");
      });
      add_write(&scheduler, callbacks, a.clone(), &slot).unwrap();

      wait_until(|| sent.get() == 2).await;
      assert_eq!(recv_strings(&b), vec!["w"]);
      wait_until(|| sent.get() == 3).await;

      cancel(&slot, Direction::Write);
      assert!(slot.is_empty());
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_wait_never_runs() {
  let local = LocalSet::new();
  local
    .run_until(async {
      let scheduler = Rc::new(TokioScheduler::new());
      let (a, b) = pair();
      let slot = CallbackSlot::new();
      let log = Log::new();

      let cb_log = log.clone();
      let callbacks = Callbacks::new().on_message(move |s: &PairSocket| cb_log.push(recv_strings(s).join(",")));
      add_read(&scheduler, callbacks, b.clone(), &slot).unwrap();
      cancel(&slot, Direction::Read);
      assert_eq!(scheduler.pending(), 0);

      send_strings(&a, &["ignored"]);
      sleep(Duration::from_millis(20)).await;
      assert!(log.entries().is_empty());
      assert_eq!(recv_strings(&b), vec!["ignored"]);
    })
    .await;
}
