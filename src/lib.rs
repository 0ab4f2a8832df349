//! # wirecall
//!
//! Asynchronous RPC over any byte transport: named calls with correlated
//! results, plus events pushed from the service to every connected client.
//!
//! ## Architecture
//!
//! - **Client** ([`Client`]): encodes calls, correlates `Response` frames by
//!   CallId and delivers `Event`s to its listeners
//! - **Service** ([`Service`]): accepts connections, routes `Call` frames to
//!   registered functions and broadcasts events
//! - **Transport** ([`transport`]): the byte-moving contract both sides are
//!   written against, with TCP, Unix socket and in-process implementations
//! - **Codec** ([`codec`]): MsgPack by default, JSON available
//!
//! Everything runs on one thread, inside a [`tokio::task::LocalSet`].
//!
//! ## Example
//!
//! ```ignore
//! use wirecall::transport::{StreamTransport, TcpAcceptor};
//! use wirecall::{Client, Service};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let service = Service::<ClockEvent>::builder(TcpAcceptor::new("127.0.0.1:7000"))
//!         .function("get_time", |(): ()| Ok(now()))
//!         .build()?;
//!     service.start()?;
//!
//!     let client: Client<ClockEvent> = Client::new(StreamTransport::tcp("127.0.0.1:7000"));
//!     client.connect().await?;
//!     let time: u64 = client.call("get_time", &()).await?;
//! }).await;
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod status;
pub mod transport;
pub mod writer;

mod client;
mod pending;
mod service;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientBuilder, ListenerId, ServiceListener, CLOSE_SERVICE};
pub use codec::{Codec, JsonCodec, MsgPackCodec};
pub use error::WirecallError;
pub use handler::{FunctionRegistry, Responder};
pub use service::{Broadcaster, Service, ServiceBuilder};
pub use status::{CallError, CallResult};
