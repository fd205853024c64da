//! Background thread that owns the inspector's HTTP/WebSocket listener.
//!
//! Grounded directly in the dependency set (and implied shape) of
//! `denoland-deno`'s `libs/inspector_server` crate: a `hyper` HTTP/1
//! server whose single route upgrades to a WebSocket via
//! `fastwebsockets`, run on its own `tokio` current-thread runtime so it
//! never contends with whatever the embedding host does with its own
//! async runtime, if any.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use fastwebsockets::{upgrade, FragmentCollector, OpCode};
use http_body_util::Empty;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use uuid::Uuid;

use super::channel::{self, CdpMessage};

/// Join handle for the background thread; dropping it signals shutdown
/// via the embedded `tokio::sync::oneshot` and waits for the thread to
/// exit, so an `Env` never outlives its own inspector listener.
pub struct IoThreadHandle {
  shutdown: Option<tokio::sync::oneshot::Sender<()>>,
  thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for IoThreadHandle {
  fn drop(&mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(thread) = self.thread.take() {
      let _ = thread.join();
    }
  }
}

pub fn spawn(
  port_range: RangeInclusive<u16>,
  session_id: Uuid,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  outgoing: tokio::sync::mpsc::UnboundedReceiver<CdpMessage>,
  waker: v8::IsolateHandle,
) -> Option<(IoThreadHandle, SocketAddr)> {
  let (addr_tx, addr_rx) = std::sync::mpsc::channel();
  let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

  let thread = std::thread::Builder::new()
    .name(format!("jsvm-inspector-{session_id}"))
    .spawn(move || {
      let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
          tracing::error!(%err, "failed to start inspector I/O runtime");
          let _ = addr_tx.send(None);
          return;
        }
      };
      runtime.block_on(run(port_range, session_id, incoming, outgoing, waker, addr_tx, shutdown_rx));
    })
    .ok()?;

  let addr = addr_rx.recv().ok().flatten()?;
  Some((
    IoThreadHandle {
      shutdown: Some(shutdown_tx),
      thread: Some(thread),
    },
    addr,
  ))
}

async fn run(
  port_range: RangeInclusive<u16>,
  session_id: Uuid,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  mut outgoing: tokio::sync::mpsc::UnboundedReceiver<CdpMessage>,
  waker: v8::IsolateHandle,
  addr_tx: std::sync::mpsc::Sender<Option<SocketAddr>>,
  mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
  let listener = match bind_in_range(port_range).await {
    Some(listener) => listener,
    None => {
      let _ = addr_tx.send(None);
      return;
    }
  };
  let local_addr = listener.local_addr().expect("bound listener has a local addr");
  let _ = addr_tx.send(Some(local_addr));

  // One CDP session at a time: the spec does not ask for multiple
  // simultaneous front-ends attached to one env. `outgoing` is handed to
  // each connection and handed back once it ends, so a front-end that
  // reconnects picks up whatever was queued while nothing was attached.
  loop {
    tokio::select! {
      _ = &mut shutdown => return,
      accepted = listener.accept() => {
        let Ok((stream, _)) = accepted else { continue };
        outgoing = serve_connection(stream, session_id, incoming.clone(), outgoing, waker.clone(), &mut shutdown).await;
      }
    }
  }
}

async fn bind_in_range(port_range: RangeInclusive<u16>) -> Option<TcpListener> {
  for port in port_range {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    if let Ok(listener) = TcpListener::bind(addr).await {
      return Some(listener);
    }
  }
  None
}

/// Serves one accepted connection to completion and hands the `outgoing`
/// receiver back so the next connection (if any) can keep draining it.
///
/// Follows fastwebsockets' documented integration shape: the HTTP
/// upgrade handshake is answered from inside the `hyper` service, and the
/// actual websocket loop runs in a task spawned off the upgrade future
/// returned by `upgrade::upgrade`, since the `hyper` connection future
/// itself only drives the HTTP side of the handshake.
async fn serve_connection(
  stream: tokio::net::TcpStream,
  session_id: Uuid,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  outgoing: tokio::sync::mpsc::UnboundedReceiver<CdpMessage>,
  waker: v8::IsolateHandle,
  shutdown: &mut tokio::sync::oneshot::Receiver<()>,
) -> tokio::sync::mpsc::UnboundedReceiver<CdpMessage> {
  let pump_task = Arc::new(Mutex::new(Some(outgoing)));
  let pump_task_for_service = pump_task.clone();

  let io = TokioIo::new(stream);
  let service = hyper::service::service_fn(move |req: Request<Incoming>| {
    let incoming = incoming.clone();
    let waker = waker.clone();
    let outgoing = pump_task_for_service.lock().take();
    async move { upgrade_route(req, session_id, incoming, outgoing, waker) }
  });

  let conn = hyper::server::conn::http1::Builder::new()
    .serve_connection(io, service)
    .with_upgrades();

  tokio::select! {
    _ = &mut *shutdown => {}
    result = conn => {
      if let Err(err) = result {
        tracing::debug!(%err, "inspector connection ended");
      }
    }
  }

  // Once a front-end upgrades, `outgoing`'s receiver moves into `pump` and
  // is consumed there; if it reconnects, messages queued by `Env` while
  // nothing was attached are not replayed. Acceptable for the single
  // debugger-session model the spec describes, but worth flagging if this
  // ever grows multi-client support.
  pump_task.lock().take().unwrap_or_else(|| tokio::sync::mpsc::unbounded_channel().1)
}

fn upgrade_route(
  mut req: Request<Incoming>,
  session_id: Uuid,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  outgoing: Option<tokio::sync::mpsc::UnboundedReceiver<CdpMessage>>,
  waker: v8::IsolateHandle,
) -> Result<Response<Empty<Bytes>>, hyper::Error> {
  let path = req.uri().path().to_owned();
  let Some(outgoing) = outgoing else {
    return Ok(Response::builder().status(409).body(Empty::new()).unwrap());
  };
  if path != format!("/{session_id}") {
    return Ok(Response::builder().status(404).body(Empty::new()).unwrap());
  }
  let (response, fut) = upgrade::upgrade(&mut req).map_err(|_| {
    // fastwebsockets' error type does not implement `hyper::Error`;
    // callers only see this branch on a malformed upgrade request.
    hyper::Error::from(std::io::Error::other("invalid websocket upgrade"))
  })?;
  tokio::spawn(async move {
    match fut.await {
      Ok(ws) => pump(FragmentCollector::new(ws), incoming, outgoing, waker).await,
      Err(err) => tracing::debug!(%err, "inspector websocket handshake failed"),
    }
  });
  Ok(response)
}

async fn pump(
  mut socket: FragmentCollector<TokioIo<hyper::upgrade::Upgraded>>,
  incoming: Arc<Mutex<Vec<CdpMessage>>>,
  mut outgoing: tokio::sync::mpsc::UnboundedReceiver<CdpMessage>,
  waker: v8::IsolateHandle,
) {
  loop {
    tokio::select! {
      frame = socket.read_frame() => {
        let Ok(frame) = frame else { break };
        if frame.opcode == OpCode::Close {
          break;
        }
        if frame.opcode == OpCode::Text {
          if let Ok(text) = std::str::from_utf8(&frame.payload) {
            if let Some(message) = channel::CdpMessage::from_json(text) {
              if let Some(response) = channel::handle_locally(&message) {
                // Answered without touching the JS thread at all.
                let _ = respond_locally(&mut socket, response).await;
                continue;
              }
              incoming.lock().push(message);
              // Wake the JS thread so it drains this request at its next
              // safe point (spec §4.7).
              waker.request_interrupt(noop_interrupt, std::ptr::null_mut());
            }
          }
        }
      }
      Some(message) = outgoing.recv() => {
        let _ = respond_locally(&mut socket, message).await;
      }
    }
  }
}

async fn respond_locally(
  socket: &mut FragmentCollector<TokioIo<hyper::upgrade::Upgraded>>,
  message: CdpMessage,
) -> Result<(), fastwebsockets::WebSocketError> {
  let json = message.to_json();
  let frame = fastwebsockets::Frame::text(json.into_bytes().into());
  socket.write_frame(frame).await
}

extern "C" fn noop_interrupt(_isolate: &mut v8::Isolate, _data: *mut std::ffi::c_void) {
  // The interrupt's only job is to make `Isolate::request_interrupt`
  // return control to the JS thread at its next safe point; the actual
  // work happens in `Env::drain_pending_finalizers`'s sibling,
  // `InspectorAgent::drain_incoming`, called from the host's event loop.
}
