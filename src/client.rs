//! Client - issues named calls and receives events.
//!
//! The [`Client`] is the dispatcher side of a connection:
//! 1. Encode the arguments and allocate a CallId
//! 2. Store the result sink in the pending table and write a `Call` frame
//! 3. Decode incoming frames and route `Response`s to their sinks by CallId
//! 4. Deliver `Event`s to every registered [`ServiceListener`]
//!
//! When the transport disconnects or fails, every pending call resolves with
//! a connection error in ascending CallId order. No result sink is ever
//! dropped without being called.
//!
//! # Example
//!
//! ```ignore
//! use wirecall::transport::StreamTransport;
//! use wirecall::Client;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let client: Client<ClockEvent> = Client::builder()
//!         .call_timeout(Duration::from_secs(5))
//!         .build(StreamTransport::tcp("127.0.0.1:7000"));
//!
//!     client.add_listener(Rc::new(|event: &ClockEvent| println!("{:?}", event)));
//!     client.connect().await?;
//!
//!     let now: u64 = client.call("get_time", &()).await?;
//! }).await;
//! ```

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{Result, WirecallError};
use crate::pending::{PendingCalls, ResultSink};
use crate::protocol::{build_frame, CallBody, Frame, FrameBuffer, FrameKind, DEFAULT_MAX_FRAME_SIZE};
use crate::status::{CallError, CallResult};
use crate::transport::{read_frames, ConnectionState, Transport, TransportListener};

/// Well-known function name asking a service to shut down.
pub const CLOSE_SERVICE: &str = "close_service";

/// Receives events pushed by the service, plus connection notifications.
///
/// Closures `Fn(&E)` implement this trait, so a plain closure can be
/// registered when only events matter.
pub trait ServiceListener<E> {
    /// An event arrived.
    fn on_event(&self, event: &E);

    /// The connection opened.
    fn on_connected(&self) {}

    /// The connection closed.
    fn on_disconnected(&self) {}

    /// The connection failed.
    fn on_connection_error(&self, _error: &CallError) {}
}

impl<E, F> ServiceListener<E> for F
where
    F: Fn(&E),
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Handle returned by [`Client::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Builder for configuring a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    max_frame_size: u32,
    call_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            call_timeout: None,
        }
    }

    /// Largest accepted frame payload. Bigger frames fail the connection.
    ///
    /// Default: 64 MB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Resolve calls with a timeout error once they have been pending this
    /// long. Requires a [`tokio::task::LocalSet`].
    ///
    /// Default: no timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Build a client over `transport`.
    pub fn build<E, C>(self, transport: impl Transport + 'static) -> Client<E, C>
    where
        E: DeserializeOwned + 'static,
        C: Codec,
    {
        Client::with_config(Box::new(transport), self)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared client state. Also the transport's listener.
struct Dispatcher<E, C> {
    transport: RefCell<Box<dyn Transport>>,
    decoder: RefCell<FrameBuffer>,
    pending: RefCell<PendingCalls>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn ServiceListener<E>>)>>,
    next_listener_id: Cell<u64>,
    call_timeout: Option<Duration>,
    self_ref: Weak<Self>,
    _codec: PhantomData<fn() -> C>,
}

impl<E, C> Dispatcher<E, C>
where
    E: DeserializeOwned + 'static,
    C: Codec,
{
    fn send(&self, name: &str, args: Result<Vec<u8>>, sink: ResultSink) {
        if !self.transport.borrow().is_open() {
            return sink(Err(CallError::not_connected()));
        }
        let body = match args.and_then(|args| CallBody::encode(name, &args)) {
            Ok(body) => body,
            Err(e) => return sink(Err(CallError::encode(e))),
        };

        let id = {
            let mut pending = self.pending.borrow_mut();
            let id = pending.allocate_id();
            pending.insert(id, sink);
            id
        };

        let written = self
            .transport
            .borrow_mut()
            .write(build_frame(FrameKind::Call, id, &body));
        if let Err(e) = written {
            debug!(call_id = id, function = name, error = %e, "call write failed");
            let call = self.pending.borrow_mut().take(id);
            if let Some(call) = call {
                call.resolve(Err(e));
            }
            return;
        }

        debug!(call_id = id, function = name, "call sent");
        if let Some(timeout) = self.call_timeout {
            self.arm_timer(id, timeout);
        }
    }

    fn arm_timer(&self, id: u32, timeout: Duration) {
        let dispatcher = self.self_ref.clone();
        let timer = tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.expire(id);
            }
        });
        self.pending.borrow_mut().set_timer(id, timer);
    }

    fn expire(&self, id: u32) {
        let call = self.pending.borrow_mut().take(id);
        if let Some(call) = call {
            debug!(call_id = id, "call timed out");
            call.resolve(Err(CallError::timeout()));
        }
    }

    fn dispatch_frame(&self, frame: Frame) {
        match frame.kind() {
            FrameKind::Response => {
                let call = self.pending.borrow_mut().take(frame.call_id());
                match call {
                    Some(call) => call.resolve(Ok(frame.body)),
                    None => warn!(call_id = frame.call_id(), "response for unknown call id"),
                }
            }
            FrameKind::Event => match C::decode::<E>(frame.body()) {
                Ok(event) => self.deliver_event(&event),
                Err(e) => warn!(codec = C::NAME, error = %e, "dropping undecodable event"),
            },
            FrameKind::Call => {
                warn!(call_id = frame.call_id(), "client received a call frame, ignoring");
            }
        }
    }

    fn snapshot_listeners(&self) -> Vec<Rc<dyn ServiceListener<E>>> {
        self.listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Run `f` for every listener in registration order. A panicking
    /// listener is logged and skipped.
    fn notify(&self, f: impl Fn(&dyn ServiceListener<E>)) {
        for listener in self.snapshot_listeners() {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                error!("service listener panicked");
            }
        }
    }

    fn deliver_event(&self, event: &E) {
        self.notify(|listener| listener.on_event(event));
    }

    /// Resolve every pending call with `error`, lowest CallId first.
    fn flush(&self, error: &CallError) {
        let calls = self.pending.borrow_mut().drain();
        if !calls.is_empty() {
            debug!(count = calls.len(), error = %error, "flushing pending calls");
        }
        for call in calls {
            call.resolve(Err(error.clone()));
        }
    }

    fn fail_protocol(&self, e: WirecallError) {
        let error = CallError::from(e);
        error!(error = %error, "protocol violation, closing connection");
        self.transport.borrow_mut().close();
        self.decoder.borrow_mut().clear();
        self.flush(&error);
        self.notify(|listener| listener.on_connection_error(&error));
    }
}

impl<E, C> TransportListener for Dispatcher<E, C>
where
    E: DeserializeOwned + 'static,
    C: Codec,
{
    fn on_connected(&self) {
        let wanted = self.decoder.borrow().wanted();
        self.transport.borrow_mut().read(wanted);
        self.notify(|listener| listener.on_connected());
    }

    fn on_disconnected(&self) {
        self.decoder.borrow_mut().clear();
        self.flush(&CallError::connection_lost());
        self.notify(|listener| listener.on_disconnected());
    }

    fn on_incoming_data(&self, _available: usize) {
        let (frames, error) = {
            let mut transport = self.transport.borrow_mut();
            let mut decoder = self.decoder.borrow_mut();
            read_frames(transport.as_mut(), &mut decoder)
        };

        for frame in frames {
            self.dispatch_frame(frame);
        }
        if let Some(e) = error {
            self.fail_protocol(e);
        }
    }

    fn on_connection_error(&self, error: &CallError) {
        self.decoder.borrow_mut().clear();
        self.flush(error);
        self.notify(|listener| listener.on_connection_error(error));
    }
}

impl<E, C> Drop for Dispatcher<E, C> {
    fn drop(&mut self) {
        for call in self.pending.get_mut().drain() {
            call.resolve(Err(CallError::connection_lost()));
        }
    }
}

/// Decode a response body into the caller's result type.
fn decode_response<C: Codec, R: DeserializeOwned>(body: &[u8]) -> CallResult<R> {
    C::decode::<CallResult<R>>(body).unwrap_or_else(|e| Err(CallError::decode(e)))
}

/// A connection to a service.
///
/// `E` is the event type the service broadcasts; `C` the codec both ends
/// agree on. Cloning is cheap and every clone drives the same connection.
/// Must be used from inside a [`tokio::task::LocalSet`].
pub struct Client<E, C = MsgPackCodec> {
    inner: Rc<Dispatcher<E, C>>,
}

impl<E, C> Clone for Client<E, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Client<()> {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<E, C> Client<E, C>
where
    E: DeserializeOwned + 'static,
    C: Codec,
{
    /// Create a client with default settings over `transport`.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(Box::new(transport), ClientBuilder::new())
    }

    fn with_config(transport: Box<dyn Transport>, config: ClientBuilder) -> Self {
        let inner = Rc::new_cyclic(|self_ref| Dispatcher {
            transport: RefCell::new(transport),
            decoder: RefCell::new(FrameBuffer::with_max_frame_size(config.max_frame_size)),
            pending: RefCell::new(PendingCalls::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(1),
            call_timeout: config.call_timeout,
            self_ref: self_ref.clone(),
            _codec: PhantomData,
        });

        let weak: Weak<Dispatcher<E, C>> = Rc::downgrade(&inner);
        let listener: Weak<dyn TransportListener> = weak;
        {
            let mut transport = inner.transport.borrow_mut();
            transport.set_listener(listener);
            // Transports handed over already connected never fire on_connected.
            if transport.is_open() {
                transport.read(inner.decoder.borrow().wanted());
            }
        }

        Self { inner }
    }

    /// Start connecting. `on_done` runs on the event loop with the outcome.
    pub fn open(&self, on_done: impl FnOnce(CallResult<()>) + 'static) {
        self.inner.transport.borrow_mut().open(Box::new(on_done));
    }

    /// Connect and wait for the outcome.
    pub async fn connect(&self) -> CallResult<()> {
        let (tx, rx) = oneshot::channel();
        self.open(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| Err(CallError::connection_lost()))
    }

    /// Close the connection. Pending calls resolve once the transport
    /// reports the disconnect.
    pub fn close(&self) {
        self.inner.transport.borrow_mut().close();
    }

    /// True while the transport is open.
    pub fn is_open(&self) -> bool {
        self.inner.transport.borrow().is_open()
    }

    /// Transport state.
    pub fn state(&self) -> ConnectionState {
        self.inner.transport.borrow().state()
    }

    /// Send a call. `sink` receives the result exactly once.
    ///
    /// When the transport is not open, `sink` runs before this returns with
    /// a not-connected error.
    pub fn send_call<A, R>(
        &self,
        name: &str,
        args: &A,
        sink: impl FnOnce(CallResult<R>) + 'static,
    ) where
        A: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
    {
        let typed: ResultSink =
            Box::new(move |result: CallResult<Bytes>| {
                sink(result.and_then(|body| decode_response::<C, R>(&body)))
            });
        self.inner.send(name, C::encode(args), typed);
    }

    /// Send a call and wait for its result.
    pub async fn call<A, R>(&self, name: &str, args: &A) -> CallResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send_call(name, args, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| Err(CallError::connection_lost()))
    }

    /// Ask the service to shut down through [`CLOSE_SERVICE`].
    pub fn close_service(&self, sink: impl FnOnce(CallResult<i32>) + 'static) {
        self.send_call(CLOSE_SERVICE, &(), sink);
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add_listener(&self, listener: Rc<dyn ServiceListener<E>>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.get());
        self.inner.next_listener_id.set(id.0 + 1);
        self.inner.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.borrow().len()
    }
}
