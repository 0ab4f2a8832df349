//! Stream transport - a [`Transport`] over any tokio byte stream.
//!
//! Each open transport owns two tasks:
//! - a reader task (`spawn_local`) that appends socket bytes to a buffer and
//!   fires `on_incoming_data` once the requested length is available;
//! - a writer task (see [`crate::writer`]) fed through an unbounded channel,
//!   which keeps [`Transport::write`] synchronous.
//!
//! Must be used from inside a [`tokio::task::LocalSet`].
//!
//! # Example
//!
//! ```ignore
//! use wirecall::transport::StreamTransport;
//! use wirecall::Client;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let client: Client<MyEvent> = Client::new(StreamTransport::tcp("127.0.0.1:7000"));
//!     client.connect().await?;
//! }).await;
//! ```

use std::cell::{Cell, RefCell};
use std::io;
#[cfg(unix)]
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use super::{ConnectionState, OpenCallback, Transport, TransportListener};
use crate::error::Result;
use crate::status::{CallError, CallResult};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Bytes requested from the socket per read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

type BoxedReader = Box<dyn AsyncRead + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Where a client-side transport connects to.
#[derive(Debug, Clone)]
enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    async fn connect(&self) -> io::Result<(BoxedReader, BoxedWriter)> {
        match self {
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(split_boxed(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(split_boxed(stream))
            }
        }
    }

    fn label(&self) -> String {
        match self {
            Endpoint::Tcp(addr) => format!("tcp://{}", addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => format!("unix://{}", path.display()),
        }
    }
}

fn split_boxed<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}

/// Run `f` on the event loop instead of inside the current call.
fn defer(f: impl FnOnce() + 'static) {
    task::spawn_local(async move { f() });
}

/// State shared between the transport handle and its tasks.
struct Shared {
    label: String,
    state: Cell<ConnectionState>,
    listener: RefCell<Option<Weak<dyn TransportListener>>>,
    inbound: RefCell<BytesMut>,
    requested: Cell<usize>,
    armed: Cell<bool>,
    read_ready: Notify,
    writer: RefCell<Option<WriterHandle>>,
    writer_config: RefCell<WriterConfig>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
    /// Stream handed over before a listener was attached.
    parked: RefCell<Option<(BoxedReader, BoxedWriter)>>,
}

impl Shared {
    fn new(label: String, state: ConnectionState) -> Self {
        Self {
            label,
            state: Cell::new(state),
            listener: RefCell::new(None),
            inbound: RefCell::new(BytesMut::with_capacity(READ_CHUNK_SIZE)),
            requested: Cell::new(0),
            armed: Cell::new(false),
            read_ready: Notify::new(),
            writer: RefCell::new(None),
            writer_config: RefCell::new(WriterConfig::default()),
            tasks: RefCell::new(Vec::new()),
            parked: RefCell::new(None),
        }
    }

    fn listener(&self) -> Option<Rc<dyn TransportListener>> {
        self.listener.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn start_io(self: &Rc<Self>, reader: BoxedReader, writer: BoxedWriter) {
        let config = self.writer_config.borrow().clone();
        let (handle, writer_task) = spawn_writer_task(writer, config);
        *self.writer.borrow_mut() = Some(handle);

        let reader_task = task::spawn_local(read_loop(self.clone(), reader));
        let watcher = task::spawn_local(watch_writer(self.clone(), writer_task));
        self.tasks.borrow_mut().extend([reader_task, watcher]);
    }

    /// Stop both tasks. Queued frames are still flushed by the writer.
    fn shutdown_io(&self) {
        self.writer.borrow_mut().take();
        self.armed.set(false);
        let tasks: Vec<_> = self.tasks.borrow_mut().drain(..).collect();
        for handle in tasks {
            handle.abort();
        }
    }

    /// Move to `Closed` and tell the listener. Runs at most once per
    /// connection.
    fn finish(&self, error: Option<CallError>) {
        if self.state.get() == ConnectionState::Closed {
            return;
        }
        self.shutdown_io();
        self.inbound.borrow_mut().clear();
        self.state.set(ConnectionState::Closed);

        match &error {
            Some(e) => warn!(transport = %self.label, error = %e, "connection failed"),
            None => debug!(transport = %self.label, "disconnected"),
        }

        if let Some(listener) = self.listener() {
            if let Some(e) = &error {
                listener.on_connection_error(e);
            }
            listener.on_disconnected();
        }
    }

    fn complete_open(
        self: &Rc<Self>,
        result: io::Result<(BoxedReader, BoxedWriter)>,
        on_done: OpenCallback,
    ) {
        if self.state.get() != ConnectionState::Connecting {
            on_done(Err(CallError::transport("Transport closed while connecting")));
            return;
        }

        match result {
            Ok((reader, writer)) => {
                self.state.set(ConnectionState::Open);
                self.start_io(reader, writer);
                debug!(transport = %self.label, "connected");
                if let Some(listener) = self.listener() {
                    listener.on_connected();
                }
                on_done(Ok(()));
            }
            Err(e) => {
                self.state.set(ConnectionState::Closed);
                let error = CallError::from(e);
                warn!(transport = %self.label, error = %error, "connect failed");
                if let Some(listener) = self.listener() {
                    listener.on_connection_error(&error);
                }
                on_done(Err(error));
            }
        }
    }

    /// Disarm and return true if the outstanding read is satisfied.
    fn take_ready(&self) -> bool {
        if self.armed.get() && self.inbound.borrow().len() >= self.requested.get() {
            self.armed.set(false);
            return true;
        }
        false
    }
}

/// Reader task: fill the inbound buffer and report satisfied reads.
async fn read_loop(shared: Rc<Shared>, mut reader: BoxedReader) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if shared.take_ready() {
            let available = shared.inbound.borrow().len();
            match shared.listener() {
                Some(listener) => listener.on_incoming_data(available),
                None => return,
            }
            continue;
        }
        if shared.state.get() != ConnectionState::Open {
            return;
        }

        tokio::select! {
            result = reader.read(&mut chunk) => match result {
                Ok(0) => {
                    shared.finish(None);
                    return;
                }
                Ok(n) => shared.inbound.borrow_mut().extend_from_slice(&chunk[..n]),
                Err(e) => {
                    shared.finish(Some(CallError::from(e)));
                    return;
                }
            },
            _ = shared.read_ready.notified() => {}
        }
    }
}

/// Turn a writer failure into a connection failure.
async fn watch_writer(shared: Rc<Shared>, writer_task: JoinHandle<Result<()>>) {
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => shared.finish(Some(CallError::from(e))),
        Err(e) if e.is_cancelled() => {}
        Err(e) => shared.finish(Some(CallError::transport(e.to_string()))),
    }
}

/// A [`Transport`] over a tokio stream.
pub struct StreamTransport {
    shared: Rc<Shared>,
    endpoint: Option<Endpoint>,
}

impl StreamTransport {
    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            shared: Rc::new(Shared::new(endpoint.label(), ConnectionState::Closed)),
            endpoint: Some(endpoint),
        }
    }

    /// Client transport that connects to a TCP address on `open`.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::with_endpoint(Endpoint::Tcp(addr.into()))
    }

    /// Client transport that connects to a Unix Domain Socket on `open`.
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::with_endpoint(Endpoint::Unix(path.into()))
    }

    /// Wrap an already connected stream. The transport starts out `Open`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::accepted(stream, "stream".to_string())
    }

    pub(crate) fn accepted<S>(stream: S, label: String) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Rc::new(Shared::new(label, ConnectionState::Open));
        *shared.parked.borrow_mut() = Some(split_boxed(stream));
        Self {
            shared,
            endpoint: None,
        }
    }

    /// Two connected in-process transports, both already `Open`.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (
            Self::accepted(a, "pair-a".to_string()),
            Self::accepted(b, "pair-b".to_string()),
        )
    }

    /// Override the writer task configuration. Applies from the next connect.
    pub fn with_writer_config(self, config: WriterConfig) -> Self {
        *self.shared.writer_config.borrow_mut() = config;
        self
    }

    /// Name used in log output.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Frames queued on the writer task but not yet on the socket.
    pub fn pending_writes(&self) -> usize {
        self.shared
            .writer
            .borrow()
            .as_ref()
            .map_or(0, WriterHandle::pending_count)
    }
}

impl Transport for StreamTransport {
    fn set_listener(&mut self, listener: Weak<dyn TransportListener>) {
        *self.shared.listener.borrow_mut() = Some(listener);

        if self.shared.state.get() == ConnectionState::Open {
            let parked = self.shared.parked.borrow_mut().take();
            if let Some((reader, writer)) = parked {
                self.shared.start_io(reader, writer);
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn open(&mut self, on_done: OpenCallback) {
        match self.shared.state.get() {
            ConnectionState::Closed => {}
            ConnectionState::Closing => {
                return defer(move || on_done(Err(CallError::transport("Transport is closing"))));
            }
            ConnectionState::Open | ConnectionState::Connecting => {
                return defer(move || on_done(Err(CallError::already_open())));
            }
        }

        let Some(endpoint) = self.endpoint.clone() else {
            return defer(move || {
                on_done(Err(CallError::transport(
                    "Transport has no endpoint to connect to",
                )))
            });
        };

        debug!(transport = %self.shared.label, "connecting");
        self.shared.state.set(ConnectionState::Connecting);
        let shared = self.shared.clone();
        task::spawn_local(async move {
            let result = endpoint.connect().await;
            shared.complete_open(result, on_done);
        });
    }

    fn close(&mut self) {
        match self.shared.state.get() {
            ConnectionState::Closed | ConnectionState::Closing => {}
            // The connect task sees the state change and fails `on_done`.
            ConnectionState::Connecting => self.shared.state.set(ConnectionState::Closed),
            ConnectionState::Open => {
                self.shared.state.set(ConnectionState::Closing);
                self.shared.shutdown_io();
                let shared = self.shared.clone();
                defer(move || shared.finish(None));
            }
        }
    }

    fn write(&mut self, frame: Bytes) -> CallResult<()> {
        if self.shared.state.get() != ConnectionState::Open {
            return Err(CallError::not_connected());
        }
        match self.shared.writer.borrow().as_ref() {
            Some(writer) => writer.enqueue(frame).map_err(CallError::from),
            None => Err(CallError::not_connected()),
        }
    }

    fn read(&mut self, len: usize) {
        if self.shared.state.get() != ConnectionState::Open {
            debug!(transport = %self.shared.label, "read on a transport that is not open");
            return;
        }
        self.shared.requested.set(len.max(1));
        self.shared.armed.set(true);
        self.shared.read_ready.notify_one();
    }

    fn take_read_data(&mut self) -> Bytes {
        self.shared.inbound.borrow_mut().split().freeze()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.shared.shutdown_io();
        self.shared.parked.borrow_mut().take();
        self.shared.state.set(ConnectionState::Closed);
    }
}
