//! Service - routes calls to registered functions and broadcasts events.
//!
//! The [`Service`] owns an [`Acceptor`]. Every accepted transport gets a
//! connection handler that:
//! 1. Decodes `Call` frames in arrival order
//! 2. Looks the function up by name (unknown names are answered with
//!    `FUNCTION_NOT_FOUND` and the connection stays open)
//! 3. Runs the handler, which answers exactly once through a
//!    [`Responder`](crate::handler::Responder)
//!
//! Events go out through [`Service::broadcast_event`] or a [`Broadcaster`]
//! captured by handlers.
//!
//! # Example
//!
//! ```ignore
//! use wirecall::transport::TcpAcceptor;
//! use wirecall::Service;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let builder = Service::<ClockEvent>::builder(TcpAcceptor::new("127.0.0.1:7000"));
//!     let events = builder.broadcaster();
//!
//!     let service = builder
//!         .function("get_time", |(): ()| Ok(now()))
//!         .function("set_alarm", move |(name, secs): (String, u64)| {
//!             events.broadcast_event(&ClockEvent::AlarmSet { name, secs });
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     service.start()?;
//! }).await;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{Result, WirecallError};
use crate::handler::{FunctionRegistry, Responder, ResponseWriter};
use crate::protocol::{
    build_frame, CallBody, Frame, FrameBuffer, FrameKind, DEFAULT_MAX_FRAME_SIZE, EVENT_CALL_ID,
};
use crate::status::{CallError, CallResult};
use crate::transport::{
    read_frames, Acceptor, AcceptorListener, ConnectionState, Transport, TransportListener,
};

/// One accepted client.
struct Connection<C: Codec> {
    id: u64,
    transport: RefCell<Box<dyn Transport>>,
    decoder: RefCell<FrameBuffer>,
    registry: Rc<FunctionRegistry<C>>,
    set: Weak<ConnectionSet<C>>,
    /// Set once the connection has been deregistered.
    closed: Cell<bool>,
    self_ref: Weak<Self>,
}

impl<C: Codec> Connection<C> {
    fn state(&self) -> ConnectionState {
        self.transport.borrow().state()
    }

    fn write_frame(&self, frame: Bytes) -> CallResult<()> {
        self.transport.borrow_mut().write(frame)
    }

    fn close(&self) {
        self.transport.borrow_mut().close();
        self.deregister();
    }

    /// Remove this connection from the set. Runs at most once.
    fn deregister(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!(connection = self.id, "connection closed");
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }

    fn reply_error(&self, call_id: u32, error: CallError) {
        match C::encode(&Err::<(), _>(error)) {
            Ok(body) => self.write_response(call_id, Bytes::from(body)),
            Err(e) => error!(connection = self.id, call_id, error = %e, "failed to encode error response"),
        }
    }

    fn handle_call(&self, frame: Frame) {
        let call_id = frame.call_id();
        let call = match CallBody::parse(frame.body) {
            Ok(call) => call,
            Err(e) => {
                warn!(connection = self.id, call_id, error = %e, "malformed call");
                return self.reply_error(call_id, CallError::protocol(e.to_string()));
            }
        };

        match self.registry.get(&call.name) {
            Some(function) => {
                debug!(connection = self.id, call_id, function = %call.name, "dispatching call");
                let weak: Weak<Self> = self.self_ref.clone();
                let writer: Weak<dyn ResponseWriter> = weak;
                function.invoke(call_id, &call.args, writer);
            }
            None => {
                debug!(connection = self.id, call_id, function = %call.name, "unknown function");
                self.reply_error(call_id, CallError::not_found(&call.name));
            }
        }
    }

    fn dispatch_frame(&self, frame: Frame) {
        match frame.kind() {
            FrameKind::Call => self.handle_call(frame),
            kind => debug!(connection = self.id, ?kind, "ignoring frame sent to service"),
        }
    }
}

impl<C: Codec> ResponseWriter for Connection<C> {
    fn write_response(&self, call_id: u32, body: Bytes) {
        let frame = build_frame(FrameKind::Response, call_id, &body);
        if let Err(e) = self.write_frame(frame) {
            debug!(connection = self.id, call_id, error = %e, "discarding response");
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.get() && self.state() == ConnectionState::Open
    }
}

impl<C: Codec> TransportListener for Connection<C> {
    fn on_connected(&self) {
        let wanted = self.decoder.borrow().wanted();
        self.transport.borrow_mut().read(wanted);
    }

    fn on_disconnected(&self) {
        self.deregister();
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
            warn!(connection = self.id, error = %e, "protocol violation, closing connection");
            self.close();
        }
    }

    fn on_connection_error(&self, error: &CallError) {
        warn!(connection = self.id, error = %error, "connection failed");
        self.deregister();
    }
}

/// Connections currently tracked by a service.
struct ConnectionSet<C: Codec> {
    connections: RefCell<BTreeMap<u64, Rc<Connection<C>>>>,
    next_id: Cell<u64>,
}

impl<C: Codec> ConnectionSet<C> {
    fn new() -> Self {
        Self {
            connections: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
        }
    }

    fn attach(
        self: &Rc<Self>,
        transport: Box<dyn Transport>,
        registry: Rc<FunctionRegistry<C>>,
        max_frame_size: u32,
    ) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let connection = Rc::new_cyclic(|self_ref| Connection {
            id,
            transport: RefCell::new(transport),
            decoder: RefCell::new(FrameBuffer::with_max_frame_size(max_frame_size)),
            registry,
            set: Rc::downgrade(self),
            closed: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        let weak: Weak<Connection<C>> = Rc::downgrade(&connection);
        let listener: Weak<dyn TransportListener> = weak;
        {
            let mut transport = connection.transport.borrow_mut();
            transport.set_listener(listener);
            if transport.is_open() {
                transport.read(connection.decoder.borrow().wanted());
            }
        }

        debug!(connection = id, "connection attached");
        self.connections.borrow_mut().insert(id, connection);
    }

    fn remove(&self, id: u64) {
        let removed = self.connections.borrow_mut().remove(&id);
        drop(removed);
    }

    fn snapshot(&self) -> Vec<Rc<Connection<C>>> {
        self.connections.borrow().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.connections.borrow().len()
    }

    fn broadcast<E: Serialize + ?Sized>(&self, event: &E) -> usize {
        let body = match C::encode(event) {
            Ok(body) => body,
            Err(e) => {
                error!(codec = C::NAME, error = %e, "failed to encode event");
                return 0;
            }
        };
        let frame = build_frame(FrameKind::Event, EVENT_CALL_ID, &body);

        let mut delivered = 0;
        for connection in self.snapshot() {
            if connection.state() != ConnectionState::Open {
                debug!(connection = connection.id, "skipping connection that is not open");
                continue;
            }
            match connection.write_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = connection.id, error = %e, "event write failed"),
            }
        }
        delivered
    }

    fn close_all(&self) {
        for connection in self.snapshot() {
            connection.close();
        }
    }
}

/// Weak handle for broadcasting events, safe to capture in handlers.
pub struct Broadcaster<E, C: Codec = MsgPackCodec> {
    set: Weak<ConnectionSet<C>>,
    _event: PhantomData<fn(&E)>,
}

impl<E, C: Codec> Clone for Broadcaster<E, C> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
            _event: PhantomData,
        }
    }
}

impl<E: Serialize, C: Codec> Broadcaster<E, C> {
    /// Send `event` to every open connection. Returns how many writes
    /// succeeded; 0 once the service is gone.
    pub fn broadcast_event(&self, event: &E) -> usize {
        self.set.upgrade().map_or(0, |set| set.broadcast(event))
    }
}

struct ServiceInner<C: Codec> {
    acceptor: RefCell<Box<dyn Acceptor>>,
    registry: Rc<FunctionRegistry<C>>,
    connections: Rc<ConnectionSet<C>>,
    max_frame_size: u32,
    max_pending_connections: Option<u32>,
}

impl<C: Codec> AcceptorListener for ServiceInner<C> {
    fn on_client_accepted(&self, transport: Box<dyn Transport>) {
        self.connections
            .attach(transport, self.registry.clone(), self.max_frame_size);
    }

    fn on_accept_error(&self, error: &CallError) {
        warn!(error = %error, "accept failed");
    }
}

/// Builder for configuring a [`Service`].
pub struct ServiceBuilder<E, C: Codec = MsgPackCodec> {
    acceptor: Box<dyn Acceptor>,
    registry: FunctionRegistry<C>,
    first_error: Option<WirecallError>,
    connections: Rc<ConnectionSet<C>>,
    max_frame_size: u32,
    max_pending_connections: Option<u32>,
    _event: PhantomData<fn(&E)>,
}

impl<E, C> ServiceBuilder<E, C>
where
    E: Serialize + 'static,
    C: Codec,
{
    /// Create a new service builder over `acceptor`.
    pub fn new(acceptor: impl Acceptor + 'static) -> Self {
        Self {
            acceptor: Box::new(acceptor),
            registry: FunctionRegistry::new(),
            first_error: None,
            connections: Rc::new(ConnectionSet::new()),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_pending_connections: None,
            _event: PhantomData,
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.first_error.get_or_insert(e);
        }
    }

    /// Register a function that returns its result immediately.
    pub fn function<F, A, R>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(A) -> CallResult<R> + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let result = self.registry.register_fn(name, f);
        self.record(result);
        self
    }

    /// Register a function that answers through a [`Responder`].
    pub fn deferred<F, A, R>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(A, Responder<R, C>) + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let result = self.registry.register_deferred(name, f);
        self.record(result);
        self
    }

    /// Register an async function.
    pub fn function_async<F, A, R, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = CallResult<R>> + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let result = self.registry.register_async(name, f);
        self.record(result);
        self
    }

    /// Largest accepted frame payload.
    ///
    /// Default: 64 MB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Listen backlog passed to the acceptor.
    ///
    /// Default: the acceptor's own default
    pub fn max_pending_connections(mut self, limit: u32) -> Self {
        self.max_pending_connections = Some(limit);
        self
    }

    /// Broadcaster for the service being built, for capture in handlers.
    pub fn broadcaster(&self) -> Broadcaster<E, C> {
        Broadcaster {
            set: Rc::downgrade(&self.connections),
            _event: PhantomData,
        }
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate function registration.
    pub fn build(self) -> Result<Service<E, C>> {
        if let Some(e) = self.first_error {
            return Err(e);
        }

        let inner = Rc::new(ServiceInner {
            acceptor: RefCell::new(self.acceptor),
            registry: Rc::new(self.registry),
            connections: self.connections,
            max_frame_size: self.max_frame_size,
            max_pending_connections: self.max_pending_connections,
        });
        let weak: Weak<ServiceInner<C>> = Rc::downgrade(&inner);
        let listener: Weak<dyn AcceptorListener> = weak;
        inner.acceptor.borrow_mut().set_listener(listener);

        Ok(Service {
            inner,
            _event: PhantomData,
        })
    }
}

/// A service accepting clients and routing their calls.
///
/// `E` is the event type broadcast to clients. Must be used from inside a
/// [`tokio::task::LocalSet`].
pub struct Service<E, C: Codec = MsgPackCodec> {
    inner: Rc<ServiceInner<C>>,
    _event: PhantomData<fn(&E)>,
}

impl<E, C> Service<E, C>
where
    E: Serialize + 'static,
    C: Codec,
{
    /// Create a new service builder.
    pub fn builder(acceptor: impl Acceptor + 'static) -> ServiceBuilder<E, C> {
        ServiceBuilder::new(acceptor)
    }

    /// Open the acceptor and start taking clients.
    pub fn start(&self) -> CallResult<()> {
        self.inner
            .acceptor
            .borrow_mut()
            .open(self.inner.max_pending_connections)
    }

    /// Close the acceptor and every connection.
    pub fn stop(&self) {
        self.inner.acceptor.borrow_mut().close();
        self.inner.connections.close_all();
    }

    /// True while the acceptor is open.
    pub fn is_running(&self) -> bool {
        self.inner.acceptor.borrow().is_open()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Registered functions.
    pub fn registry(&self) -> &FunctionRegistry<C> {
        &self.inner.registry
    }

    /// Send `event` to every open connection. Returns how many writes
    /// succeeded.
    pub fn broadcast_event(&self, event: &E) -> usize {
        self.inner.connections.broadcast(event)
    }

    /// Weak broadcast handle.
    pub fn broadcaster(&self) -> Broadcaster<E, C> {
        Broadcaster {
            set: Rc::downgrade(&self.inner.connections),
            _event: PhantomData,
        }
    }

    /// Adopt an already connected transport, as if the acceptor had
    /// produced it.
    pub fn attach(&self, transport: impl Transport + 'static) {
        self.inner.on_client_accepted(Box::new(transport));
    }
}
