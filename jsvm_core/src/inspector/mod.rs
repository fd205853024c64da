//! Inspector transport (component C6, part 5): a Chrome DevTools Protocol
//! endpoint reachable over WebSocket.
//!
//! The teacher has no inspector of its own; this subsystem is grounded in
//! the real inspector-server crate found alongside it in the reference
//! pack (`denoland-deno`'s `libs/inspector_server`), whose `Cargo.toml`
//! pins exactly the stack used here: `fastwebsockets` for the wire
//! protocol, `hyper`/`hyper-util` for the HTTP upgrade handshake, and
//! `uuid` for per-session identifiers. The cross-thread message pump
//! itself mirrors the teacher's own interrupt-driven pattern: just as the
//! teacher wakes the JS thread to drain a pending-ops queue, the
//! inspector wakes it to drain pending CDP requests, via
//! `v8::Isolate::request_interrupt`.

mod channel;
mod io_thread;

pub use channel::CdpMessage;

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::env::Env;
use crate::error::JsvmStatus;

/// Port range scanned for a free listener (spec §4.7: "the embedder does
/// not choose a port; JSVM picks the first free one in a fixed range so
/// multiple envs in one process don't collide").
const PORT_RANGE: std::ops::RangeInclusive<u16> = 9229..=9999;

/// One inspector session attached to an [`Env`] (spec §3 "InspectorAgent").
/// Owns the cross-thread channel the I/O thread uses to hand incoming CDP
/// requests to the JS thread, and the queue of outgoing notifications
/// waiting to be flushed to the connected front-end.
pub struct InspectorAgent {
  session_id: Uuid,
  local_addr: SocketAddr,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  outgoing: tokio::sync::mpsc::UnboundedSender<CdpMessage>,
  _io_thread: io_thread::IoThreadHandle,
}

impl InspectorAgent {
  /// `OpenInspector` (spec §4.7). Scans [`PORT_RANGE`] for a free port,
  /// starts the WebSocket listener on a background thread running its own
  /// tokio runtime (the JS thread itself never blocks on network I/O, per
  /// spec §5's single-JS-thread model), and returns the agent handle the
  /// env stores.
  pub fn open(env: &Rc<Env>) -> Result<Self, JsvmStatus> {
    let session_id = Uuid::new_v4();
    let incoming: Arc<Mutex<Vec<CdpMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let (outgoing_tx, outgoing_rx) = tokio::sync::mpsc::unbounded_channel();

    let waker = env.vm().interrupt_waker();
    let (io_thread, local_addr) =
      io_thread::spawn(PORT_RANGE, session_id, incoming.clone(), outgoing_rx, waker)
        .ok_or(JsvmStatus::GenericFailure)?;

    tracing::info!(
      %session_id,
      %local_addr,
      "inspector listening; connect with ws://{local_addr}/{session_id}"
    );

    Ok(InspectorAgent {
      session_id,
      local_addr,
      incoming,
      outgoing: outgoing_tx,
      _io_thread: io_thread,
    })
  }

  pub fn session_id(&self) -> Uuid {
    self.session_id
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Sends a CDP message (an event or a response) to the connected
  /// front-end. A no-op if nothing is connected yet; messages are not
  /// queued past a missing connection (spec §4.7: "notifications are
  /// best-effort; a front-end that attaches later misses earlier events",
  /// same as the engine's own inspector).
  pub fn send(&self, message: CdpMessage) {
    let _ = self.outgoing.send(message);
  }

  /// Drains CDP requests the I/O thread queued since the last drain.
  /// Called at the same safe points as [`Env::drain_pending_finalizers`]
  /// (spec §4.7: "inspector messages are processed only between turns of
  /// the event loop, never inside a running callback").
  pub fn drain_incoming(&self) -> Vec<CdpMessage> {
    std::mem::take(&mut *self.incoming.lock())
  }
}
