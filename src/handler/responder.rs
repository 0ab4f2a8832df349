//! Responder handed to service functions.
//!
//! A [`Responder`] answers exactly one call: [`Responder::respond`] consumes
//! it, and dropping it unanswered sends a `NO_RESPONSE` error so the caller
//! is never left waiting.
//!
//! # Example
//!
//! ```ignore
//! Service::<ClockEvent>::builder(acceptor)
//!     .deferred("wait_alarm", |(secs,): (u64,), responder: Responder<String>| {
//!         tokio::task::spawn_local(async move {
//!             tokio::time::sleep(Duration::from_secs(secs)).await;
//!             responder.respond(Ok("ring".to_string()));
//!         });
//!     })
//! ```

use std::marker::PhantomData;
use std::rc::Weak;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error};

use crate::codec::{Codec, MsgPackCodec};
use crate::status::{CallError, CallResult};

/// Where a responder writes its `Response` frame.
pub(crate) trait ResponseWriter {
    /// Write a response body for `call_id`. Failures are logged, not returned.
    fn write_response(&self, call_id: u32, body: Bytes);

    /// True while the connection can still carry a response.
    fn is_connected(&self) -> bool;
}

/// One-shot reply channel for a single call.
pub struct Responder<R, C: Codec = MsgPackCodec> {
    /// Call id of the request being answered.
    call_id: u32,
    /// Connection the call arrived on; `None` when detached.
    writer: Option<Weak<dyn ResponseWriter>>,
    answered: bool,
    _marker: PhantomData<fn(R) -> C>,
}

impl<R, C: Codec> Responder<R, C> {
    pub(crate) fn new(call_id: u32, writer: Weak<dyn ResponseWriter>) -> Self {
        Self {
            call_id,
            writer: Some(writer),
            answered: false,
            _marker: PhantomData,
        }
    }

    /// Responder that is not attached to any connection (for testing
    /// handlers). Responses are discarded.
    pub fn detached(call_id: u32) -> Self {
        Self {
            call_id,
            writer: None,
            answered: false,
            _marker: PhantomData,
        }
    }

    /// Get the call id.
    #[inline]
    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    /// True while the calling client is still connected.
    pub fn is_connected(&self) -> bool {
        self.writer
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|w| w.is_connected())
    }

    fn send<T: Serialize>(&self, result: &CallResult<T>) {
        let body = match C::encode(result) {
            Ok(body) => body,
            Err(e) => {
                error!(call_id = self.call_id, error = %e, "failed to encode response");
                match C::encode(&Err::<(), _>(CallError::encode(e))) {
                    Ok(body) => body,
                    Err(_) => return,
                }
            }
        };

        match self.writer.as_ref().and_then(Weak::upgrade) {
            Some(writer) => writer.write_response(self.call_id, Bytes::from(body)),
            None => debug!(call_id = self.call_id, "connection gone, discarding response"),
        }
    }
}

impl<R: Serialize, C: Codec> Responder<R, C> {
    /// Send the result. Consumes the responder.
    pub fn respond(mut self, result: CallResult<R>) {
        self.answered = true;
        self.send(&result);
    }
}

impl<R, C: Codec> Drop for Responder<R, C> {
    fn drop(&mut self) {
        if !self.answered {
            debug!(call_id = self.call_id, "responder dropped without an answer");
            self.send::<()>(&Err(CallError::no_response()));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::status::codes;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Keeps every response body written to it.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub(crate) written: RefCell<Vec<(u32, Bytes)>>,
        pub(crate) closed: Cell<bool>,
    }

    impl ResponseWriter for RecordingWriter {
        fn write_response(&self, call_id: u32, body: Bytes) {
            if !self.closed.get() {
                self.written.borrow_mut().push((call_id, body));
            }
        }

        fn is_connected(&self) -> bool {
            !self.closed.get()
        }
    }

    pub(crate) fn attached<R, C: Codec>(
        writer: &Rc<RecordingWriter>,
        call_id: u32,
    ) -> Responder<R, C> {
        let weak = Rc::downgrade(writer);
        Responder::new(call_id, weak)
    }

    fn decoded<T: serde::de::DeserializeOwned>(body: &Bytes) -> CallResult<T> {
        MsgPackCodec::decode(body).unwrap()
    }

    #[test]
    fn test_respond_writes_once_with_call_id() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<u64> = attached(&writer, 7);

        responder.respond(Ok(1234));

        let written = writer.written.borrow();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, 7);
        assert_eq!(decoded::<u64>(&written[0].1), Ok(1234));
    }

    #[test]
    fn test_respond_with_error() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<u64> = attached(&writer, 1);

        responder.respond(Err(CallError::application(120, "busy")));

        let err = decoded::<u64>(&writer.written.borrow()[0].1).unwrap_err();
        assert_eq!(err.code(), 120);
        assert_eq!(err.message(), "busy");
    }

    #[test]
    fn test_drop_sends_no_response() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<u64> = attached(&writer, 3);
        drop(responder);

        let written = writer.written.borrow();
        assert_eq!(written.len(), 1);
        let err = decoded::<u64>(&written[0].1).unwrap_err();
        assert_eq!(err.code(), codes::NO_RESPONSE);
    }

    #[test]
    fn test_connection_gone_is_silent() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<u64> = attached(&writer, 3);
        drop(writer);

        assert!(!responder.is_connected());
        responder.respond(Ok(1));
    }

    #[test]
    fn test_is_connected_tracks_writer() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<()> = attached(&writer, 1);
        assert!(responder.is_connected());

        writer.closed.set(true);
        assert!(!responder.is_connected());
    }

    #[test]
    fn test_detached_responder() {
        let responder: Responder<String> = Responder::detached(11);
        assert_eq!(responder.call_id(), 11);
        assert!(!responder.is_connected());
        responder.respond(Ok("ignored".into()));
    }

    #[test]
    fn test_codec_parameter_is_used() {
        let writer = Rc::new(RecordingWriter::default());
        let responder: Responder<u32, JsonCodec> = attached(&writer, 1);
        responder.respond(Ok(5));

        assert_eq!(&writer.written.borrow()[0].1[..], br#"{"Ok":5}"#);
    }
}
