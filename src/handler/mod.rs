//! Handler module - service function registration and responses.
//!
//! Provides:
//! - [`FunctionRegistry`] - maps function names to handlers
//! - [`Responder`] - answers one call, now or later
//!
//! # Example
//!
//! ```ignore
//! use wirecall::handler::{FunctionRegistry, Responder};
//!
//! let mut registry: FunctionRegistry = FunctionRegistry::new();
//!
//! // Answered immediately
//! registry.register_fn("get_time", |(): ()| Ok(now()))?;
//!
//! // Answered when the alarm fires
//! registry.register_deferred("wait_alarm", |(name,): (String,), r: Responder<String>| {
//!     alarms.borrow_mut().insert(name, r);
//! })?;
//! ```

mod registry;
mod responder;

pub use registry::{FunctionRegistry, ResponseMode, ServiceFunction};
pub use responder::Responder;

pub(crate) use responder::ResponseWriter;
