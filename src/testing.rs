//! Test doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::protocol::{Frame, FrameBuffer};
use crate::status::{CallError, CallResult};
use crate::transport::{
    AcceptorListener, ConnectionState, OpenCallback, Transport, TransportListener,
};

/// Poll `cond` on the event loop until it holds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Counts transport callbacks.
#[derive(Default)]
pub struct RecordingListener {
    connects: Cell<usize>,
    disconnects: Cell<usize>,
    data_events: Cell<usize>,
    errors: Cell<usize>,
}

impl RecordingListener {
    pub fn connects(&self) -> usize {
        self.connects.get()
    }
    pub fn disconnects(&self) -> usize {
        self.disconnects.get()
    }
    pub fn data_events(&self) -> usize {
        self.data_events.get()
    }
    pub fn errors(&self) -> usize {
        self.errors.get()
    }
}

impl TransportListener for RecordingListener {
    fn on_connected(&self) {
        self.connects.set(self.connects.get() + 1);
    }
    fn on_disconnected(&self) {
        self.disconnects.set(self.disconnects.get() + 1);
    }
    fn on_incoming_data(&self, _available: usize) {
        self.data_events.set(self.data_events.get() + 1);
    }
    fn on_connection_error(&self, _error: &CallError) {
        self.errors.set(self.errors.get() + 1);
    }
}

/// Keeps accepted transports.
#[derive(Default)]
pub struct AcceptRecorder {
    accepted: RefCell<Vec<Box<dyn Transport>>>,
}

impl AcceptRecorder {
    pub fn accepted_count(&self) -> usize {
        self.accepted.borrow().len()
    }
    pub fn take_accepted(&self) -> Vec<Box<dyn Transport>> {
        self.accepted.borrow_mut().drain(..).collect()
    }
}

impl AcceptorListener for AcceptRecorder {
    fn on_client_accepted(&self, transport: Box<dyn Transport>) {
        self.accepted.borrow_mut().push(transport);
    }
    fn on_accept_error(&self, _error: &CallError) {}
}

struct MockState {
    state: Cell<ConnectionState>,
    listener: RefCell<Option<Weak<dyn TransportListener>>>,
    inbound: RefCell<BytesMut>,
    requested: Cell<usize>,
    armed: Cell<bool>,
    written: RefCell<Vec<Bytes>>,
    write_error: RefCell<Option<CallError>>,
    pending_open: RefCell<Option<OpenCallback>>,
    closes: Cell<usize>,
}

/// Scripted in-memory transport.
///
/// Nothing happens on its own: the test drives every callback through the
/// paired [`MockHandle`], which stands in for the event loop.
pub struct MockTransport {
    inner: Rc<MockState>,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    inner: Rc<MockState>,
}

impl MockTransport {
    pub fn new(state: ConnectionState) -> (Self, MockHandle) {
        let inner = Rc::new(MockState {
            state: Cell::new(state),
            listener: RefCell::new(None),
            inbound: RefCell::new(BytesMut::new()),
            requested: Cell::new(0),
            armed: Cell::new(false),
            written: RefCell::new(Vec::new()),
            write_error: RefCell::new(None),
            pending_open: RefCell::new(None),
            closes: Cell::new(0),
        });
        (
            Self {
                inner: inner.clone(),
            },
            MockHandle { inner },
        )
    }

    pub fn open() -> (Self, MockHandle) {
        Self::new(ConnectionState::Open)
    }
}

impl Transport for MockTransport {
    fn set_listener(&mut self, listener: Weak<dyn TransportListener>) {
        *self.inner.listener.borrow_mut() = Some(listener);
    }

    fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    fn open(&mut self, on_done: OpenCallback) {
        self.inner.state.set(ConnectionState::Connecting);
        *self.inner.pending_open.borrow_mut() = Some(on_done);
    }

    fn close(&mut self) {
        self.inner.closes.set(self.inner.closes.get() + 1);
        self.inner.state.set(ConnectionState::Closed);
        self.inner.armed.set(false);
    }

    fn write(&mut self, frame: Bytes) -> CallResult<()> {
        if self.inner.state.get() != ConnectionState::Open {
            return Err(CallError::not_connected());
        }
        if let Some(err) = self.inner.write_error.borrow().clone() {
            return Err(err);
        }
        self.inner.written.borrow_mut().push(frame);
        Ok(())
    }

    fn read(&mut self, len: usize) {
        self.inner.requested.set(len.max(1));
        self.inner.armed.set(true);
    }

    fn take_read_data(&mut self) -> Bytes {
        self.inner.inbound.borrow_mut().split().freeze()
    }
}

impl MockHandle {
    fn listener(&self) -> Option<Rc<dyn TransportListener>> {
        self.inner.listener.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.inner.state.set(state);
    }

    /// Complete a pending `open`.
    pub fn finish_open(&self, result: CallResult<()>) {
        let on_done = self.inner.pending_open.borrow_mut().take();
        match &result {
            Ok(()) => {
                self.inner.state.set(ConnectionState::Open);
                if let Some(l) = self.listener() {
                    l.on_connected();
                }
            }
            Err(e) => {
                self.inner.state.set(ConnectionState::Closed);
                if let Some(l) = self.listener() {
                    l.on_connection_error(e);
                }
            }
        }
        if let Some(on_done) = on_done {
            on_done(result);
        }
    }

    /// Feed bytes as if they came off the wire.
    pub fn deliver(&self, bytes: &[u8]) {
        self.inner.inbound.borrow_mut().extend_from_slice(bytes);
        while self.inner.armed.get()
            && self.inner.inbound.borrow().len() >= self.inner.requested.get()
        {
            self.inner.armed.set(false);
            let available = self.inner.inbound.borrow().len();
            match self.listener() {
                Some(l) => l.on_incoming_data(available),
                None => return,
            }
        }
    }

    pub fn disconnect(&self) {
        self.inner.state.set(ConnectionState::Closed);
        if let Some(l) = self.listener() {
            l.on_disconnected();
        }
    }

    pub fn fail(&self, error: CallError) {
        self.inner.state.set(ConnectionState::Closed);
        if let Some(l) = self.listener() {
            l.on_connection_error(&error);
            l.on_disconnected();
        }
    }

    pub fn fail_writes(&self, error: Option<CallError>) {
        *self.inner.write_error.borrow_mut() = error;
    }

    pub fn is_read_armed(&self) -> bool {
        self.inner.armed.get()
    }

    pub fn requested(&self) -> usize {
        self.inner.requested.get()
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.get()
    }

    /// Every frame written so far, decoded.
    pub fn written_frames(&self) -> Vec<Frame> {
        let mut buffer = FrameBuffer::new();
        self.inner
            .written
            .borrow()
            .iter()
            .flat_map(|bytes| buffer.push(bytes).unwrap())
            .collect()
    }
}
