//! # Tollgate
//!
//! In-process action dispatch: components register named actions
//! (callbacks), invoke them by name, and attach interceptors that run before
//! an action fires — each able to allow the call, abort it with a reason, or
//! be timed out by a watchdog.
//!
//! ## Core Types
//!
//! - [`Dispatcher`] — the registry plus the call pipeline; explicitly
//!   constructed and passed by reference, no process-wide instance
//! - [`ActionRegistration`] — what to register: bare callback or full
//!   descriptor payload
//! - [`ActionDescriptor`] — public snapshot of a registered action
//! - [`InvocationContext`] — per-interceptor-run handle carrying
//!   [`resume`](InvocationContext::resume),
//!   [`intercept`](InvocationContext::intercept), and
//!   [`remove_interceptor`](InvocationContext::remove_interceptor)
//! - [`CallContext`] — what the action callback receives
//! - [`DispatchError`] — the failure taxonomy of `call()`
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{ActionRegistration, Dispatcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = Dispatcher::new();
//!
//! dispatcher.register(
//!     "comments.add",
//!     ActionRegistration::callback(|ctx| async move {
//!         Ok(serde_json::json!({ "added": ctx.params }))
//!     }),
//! );
//!
//! // Guard the action: only calls carrying text may proceed.
//! dispatcher.intercept(
//!     "comments.add",
//!     |ctx| async move {
//!         ctx.resume();
//!     },
//!     false,
//! );
//!
//! let out = dispatcher
//!     .call("comments.add", serde_json::json!("hello"))
//!     .await
//!     .unwrap();
//! assert_eq!(out, serde_json::json!({ "added": "hello" }));
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! The chain advances strictly one interceptor at a time, in registration
//! order, over a snapshot taken when `call()` starts; entry N+1 never starts
//! before entry N settles. Each run gets a fresh [`InvocationContext`] and
//! its own watchdog ([`DEFAULT_INTERCEPTOR_TIMEOUT`] unless overridden).
//! The registry lock is never held across an await.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Action data model: callbacks, registrations, descriptors, identity tokens.
pub mod action;
mod chain;
/// Call and invocation contexts.
pub mod context;
/// Dispatcher: the registry and the call pipeline.
pub mod dispatcher;
/// Failure taxonomy for the call pipeline.
pub mod error;
/// Convenience re-exports.
pub mod prelude;

pub use action::{
    ActionCallback, ActionDescriptor, ActionRegistration, ActionResult, InterceptorCallback,
    InterceptorId, InterceptorOptions, InterceptorSpec, action_fn, interceptor_fn,
};
pub use context::{CallContext, InvocationContext};
pub use dispatcher::{DEFAULT_INTERCEPTOR_TIMEOUT, Dispatcher};
pub use error::{ActionError, DispatchError, TIMEOUT_REASON};
