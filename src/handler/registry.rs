//! Function registry for dispatching calls by name.
//!
//! The registry maps function names to type-erased handlers. Each handler
//! decodes its argument tuple with the service codec, runs the user function
//! and answers through a [`Responder`].
//!
//! Three handler forms exist:
//! - immediate: `Fn(A) -> CallResult<R>`, answered before dispatch returns
//! - deferred: `Fn(A, Responder<R>)`, the function keeps the responder
//! - async: `Fn(A) -> impl Future<Output = CallResult<R>>`, driven with
//!   `spawn_local`
//!
//! # Example
//!
//! ```ignore
//! use wirecall::handler::FunctionRegistry;
//!
//! let mut registry: FunctionRegistry = FunctionRegistry::new();
//! registry.register_fn("add", |(a, b): (i64, i64)| Ok(a + b))?;
//! assert!(registry.register_fn("add", |(a,): (i64,)| Ok(a)).is_err());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Weak;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::responder::{ResponseWriter, Responder};
use crate::codec::{Codec, MsgPackCodec};
use crate::error::{Result, WirecallError};
use crate::status::{CallError, CallResult};

/// How a function produces its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// The result is returned from the handler.
    Immediate,
    /// The handler answers later through its responder.
    Deferred,
}

/// Type-erased service function.
pub(crate) trait Handler {
    /// Decode `args` and run the function. Exactly one response is written
    /// through `writer` for `call_id`, now or later.
    fn call(&self, call_id: u32, args: &[u8], writer: Weak<dyn ResponseWriter>);
}

/// Decode the argument tuple or answer the call with a decode error.
fn decode_args<A, R, C>(args: &[u8], responder: Responder<R, C>) -> Option<(A, Responder<R, C>)>
where
    A: DeserializeOwned,
    R: Serialize,
    C: Codec,
{
    match C::decode::<A>(args) {
        Ok(args) => Some((args, responder)),
        Err(e) => {
            debug!(call_id = responder.call_id(), error = %e, "bad call arguments");
            responder.respond(Err(CallError::decode(e)));
            None
        }
    }
}

struct ImmediateHandler<F, A, R, C> {
    f: F,
    _marker: PhantomData<fn(A) -> (R, C)>,
}

impl<F, A, R, C> Handler for ImmediateHandler<F, A, R, C>
where
    F: Fn(A) -> CallResult<R>,
    A: DeserializeOwned,
    R: Serialize,
    C: Codec,
{
    fn call(&self, call_id: u32, args: &[u8], writer: Weak<dyn ResponseWriter>) {
        let responder = Responder::<R, C>::new(call_id, writer);
        if let Some((args, responder)) = decode_args(args, responder) {
            responder.respond((self.f)(args));
        }
    }
}

struct DeferredHandler<F, A, R, C> {
    f: F,
    _marker: PhantomData<fn(A) -> (R, C)>,
}

impl<F, A, R, C> Handler for DeferredHandler<F, A, R, C>
where
    F: Fn(A, Responder<R, C>),
    A: DeserializeOwned,
    R: Serialize,
    C: Codec,
{
    fn call(&self, call_id: u32, args: &[u8], writer: Weak<dyn ResponseWriter>) {
        let responder = Responder::<R, C>::new(call_id, writer);
        if let Some((args, responder)) = decode_args(args, responder) {
            (self.f)(args, responder);
        }
    }
}

struct AsyncHandler<F, A, R, C> {
    f: F,
    _marker: PhantomData<fn(A) -> (R, C)>,
}

impl<F, A, R, C, Fut> Handler for AsyncHandler<F, A, R, C>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = CallResult<R>> + 'static,
    A: DeserializeOwned,
    R: Serialize + 'static,
    C: Codec,
{
    fn call(&self, call_id: u32, args: &[u8], writer: Weak<dyn ResponseWriter>) {
        let responder = Responder::<R, C>::new(call_id, writer);
        if let Some((args, responder)) = decode_args(args, responder) {
            let fut = (self.f)(args);
            tokio::task::spawn_local(async move {
                responder.respond(fut.await);
            });
        }
    }
}

/// A registered function.
pub struct ServiceFunction {
    name: String,
    mode: ResponseMode,
    handler: Box<dyn Handler>,
}

impl ServiceFunction {
    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Response mode.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub(crate) fn invoke(&self, call_id: u32, args: &[u8], writer: Weak<dyn ResponseWriter>) {
        self.handler.call(call_id, args, writer);
    }
}

/// Registry mapping function names to handlers.
///
/// Immutable once handed to a service; names are unique.
pub struct FunctionRegistry<C = MsgPackCodec> {
    functions: HashMap<String, ServiceFunction>,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> FunctionRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            _codec: PhantomData,
        }
    }

    fn register(&mut self, name: &str, mode: ResponseMode, handler: Box<dyn Handler>) -> Result<()> {
        if self.functions.contains_key(name) {
            return Err(WirecallError::DuplicateFunction(name.to_string()));
        }
        self.functions.insert(
            name.to_string(),
            ServiceFunction {
                name: name.to_string(),
                mode,
                handler,
            },
        );
        Ok(())
    }

    /// Register a function that returns its result immediately.
    pub fn register_fn<F, A, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A) -> CallResult<R> + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let handler = ImmediateHandler::<F, A, R, C> {
            f,
            _marker: PhantomData,
        };
        self.register(name, ResponseMode::Immediate, Box::new(handler))
    }

    /// Register a function that answers through a [`Responder`].
    pub fn register_deferred<F, A, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A, Responder<R, C>) + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let handler = DeferredHandler::<F, A, R, C> {
            f,
            _marker: PhantomData,
        };
        self.register(name, ResponseMode::Deferred, Box::new(handler))
    }

    /// Register an async function. Its future runs on the local event loop.
    pub fn register_async<F, A, R, Fut>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = CallResult<R>> + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        let handler = AsyncHandler::<F, A, R, C> {
            f,
            _marker: PhantomData,
        };
        self.register(name, ResponseMode::Deferred, Box::new(handler))
    }

    /// Look a function up by name.
    pub fn get(&self, name: &str) -> Option<&ServiceFunction> {
        self.functions.get(name)
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl<C: Codec> Default for FunctionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
