/* src/server/core/rust/src/subscription.rs */

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::WeftError;
use crate::procedure::BoxStream;

/// One event on a subscription stream. `Error` and `Complete` are terminal.
#[derive(Debug, Clone)]
pub enum Frame {
  Data(Value),
  Error(WeftError),
  Complete,
}

impl Frame {
  pub fn event_name(&self) -> &'static str {
    match self {
      Self::Data(_) => "data",
      Self::Error(_) => "error",
      Self::Complete => "complete",
    }
  }

  pub fn is_terminal(&self) -> bool {
    !matches!(self, Self::Data(_))
  }

  /// JSON text carried by the frame.
  pub fn payload(&self) -> String {
    match self {
      Self::Data(value) => serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
      Self::Error(err) => serde_json::to_string(&err.body()).unwrap_or_else(|_| "{}".to_string()),
      Self::Complete => "{}".to_string(),
    }
  }

  /// Server-Sent Events encoding. JSON text is single-line, so one `data:` field suffices.
  pub fn to_sse(&self) -> String {
    format!("event: {}\ndata: {}\n\n", self.event_name(), self.payload())
  }
}

pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Write side handed to a push source. Cheap to clone; every clone shares
/// the same closed flag, so once the subscriber is gone all emits are dropped.
#[derive(Clone)]
pub struct EventSink {
  tx: mpsc::UnboundedSender<Frame>,
  closed: Arc<AtomicBool>,
}

impl EventSink {
  /// Push a data frame. Returns `false` when the subscription is already closed.
  pub fn emit(&self, value: Value) -> bool {
    if self.is_closed() {
      return false;
    }
    self.tx.send(Frame::Data(value)).is_ok()
  }

  /// Terminate the stream with an error frame.
  pub fn error(&self, err: WeftError) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      let _ = self.tx.send(Frame::Error(err));
    }
  }

  pub fn complete(&self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      let _ = self.tx.send(Frame::Complete);
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire) || self.tx.is_closed()
  }
}

/// A push-based data source: started with a sink, returns its teardown action.
pub struct PushSource(Box<dyn FnOnce(EventSink) -> Cleanup + Send>);

impl PushSource {
  pub fn new<F, C>(start: F) -> Self
  where
    F: FnOnce(EventSink) -> C + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    Self(Box::new(move |sink| Box::new(start(sink)) as Cleanup))
  }

  /// Drive a stream of results on a spawned task. Needs a tokio runtime.
  /// The first `Err` becomes a terminal error frame; exhaustion completes.
  pub fn from_stream(stream: BoxStream<Result<Value, WeftError>>) -> Self {
    Self::new(move |sink: EventSink| {
      let task = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
          match item {
            Ok(value) => {
              if !sink.emit(value) {
                return;
              }
            }
            Err(err) => {
              sink.error(err);
              return;
            }
          }
        }
        sink.complete();
      });
      move || task.abort()
    })
  }

  /// [`from_stream`](Self::from_stream) for typed items. A value that fails
  /// to serialize ends the stream with an internal error.
  pub fn from_typed_stream<T, S>(stream: S) -> Self
  where
    T: serde::Serialize,
    S: Stream<Item = Result<T, WeftError>> + Send + 'static,
  {
    let values = stream.map(|item| item.and_then(|v| serde_json::to_value(v).map_err(WeftError::from)));
    Self::from_stream(Box::pin(values))
  }

  fn start(self, sink: EventSink) -> Cleanup {
    (self.0)(sink)
  }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
  fn new(counter: Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, Ordering::AcqRel);
    Self(counter)
  }
}

impl Drop for ConnectionGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::AcqRel);
  }
}

/// Read side of one subscriber's connection.
///
/// Teardown runs the source's cleanup exactly once, on whichever comes first:
/// a terminal frame, an explicit [`Subscription::close`], or drop.
pub struct Subscription {
  rx: mpsc::UnboundedReceiver<Frame>,
  closed: Arc<AtomicBool>,
  cleanup: Option<Cleanup>,
  guard: Option<ConnectionGuard>,
  finished: bool,
}

impl Subscription {
  pub fn open(source: PushSource) -> Self {
    Self::start(source, None)
  }

  pub(crate) fn open_counted(source: PushSource, counter: Arc<AtomicUsize>) -> Self {
    Self::start(source, Some(ConnectionGuard::new(counter)))
  }

  fn start(source: PushSource, guard: Option<ConnectionGuard>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let sink = EventSink { tx, closed: closed.clone() };
    let cleanup = source.start(sink);
    Self { rx, closed, cleanup: Some(cleanup), guard, finished: false }
  }

  /// A stream that yields one error frame and ends. Setup failures use this so
  /// the caller always gets a framed response.
  pub fn failed(err: WeftError) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Frame::Error(err));
    Self { rx, closed: Arc::new(AtomicBool::new(true)), cleanup: None, guard: None, finished: false }
  }

  /// Disconnect. Later emits from the source are dropped.
  pub fn close(&mut self) {
    self.finished = true;
    self.teardown();
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  fn teardown(&mut self) {
    self.closed.store(true, Ordering::Release);
    self.rx.close();
    if let Some(cleanup) = self.cleanup.take() {
      cleanup();
    }
    self.guard.take();
  }

  /// Frames encoded as Server-Sent Events.
  pub fn into_sse(self) -> impl Stream<Item = String> + Send {
    self.map(|frame| frame.to_sse())
  }
}

impl Stream for Subscription {
  type Item = Frame;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
    let this = self.get_mut();
    if this.finished {
      return Poll::Ready(None);
    }
    match this.rx.poll_recv(cx) {
      Poll::Ready(Some(frame)) => {
        if frame.is_terminal() {
          this.finished = true;
          this.teardown();
        }
        Poll::Ready(Some(frame))
      }
      Poll::Ready(None) => {
        this.finished = true;
        this.teardown();
        Poll::Ready(None)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.teardown();
  }
}

/// Topic-keyed fan-out owned by the application.
///
/// Push sources register their sink on start and remove it in their cleanup;
/// publishers reach every live subscriber of a topic through [`publish`](Self::publish).
#[derive(Default)]
pub struct ListenerRegistry {
  topics: Mutex<HashMap<String, Vec<(u64, EventSink)>>>,
  next_id: AtomicU64,
}

impl ListenerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, topic: &str, sink: EventSink) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
    topics.entry(topic.to_string()).or_default().push((id, sink));
    id
  }

  pub fn remove(&self, topic: &str, id: u64) {
    let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(sinks) = topics.get_mut(topic) {
      sinks.retain(|(sid, _)| *sid != id);
      if sinks.is_empty() {
        topics.remove(topic);
      }
    }
  }

  /// Deliver to every open sink of `topic`, pruning closed ones.
  /// Returns the number of sinks that accepted the value.
  pub fn publish(&self, topic: &str, value: &Value) -> usize {
    let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sinks) = topics.get_mut(topic) else { return 0 };
    sinks.retain(|(_, sink)| !sink.is_closed());
    sinks.iter().filter(|(_, sink)| sink.emit(value.clone())).count()
  }

  pub fn listener_count(&self, topic: &str) -> usize {
    let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
    topics.get(topic).map_or(0, Vec::len)
  }

  /// A push source that joins `topic` for the lifetime of the subscription.
  pub fn source(self: &Arc<Self>, topic: impl Into<String>) -> PushSource {
    let registry = self.clone();
    let topic = topic.into();
    PushSource::new(move |sink| {
      let id = registry.add(&topic, sink);
      move || registry.remove(&topic, id)
    })
  }
}
