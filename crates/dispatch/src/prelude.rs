//! Convenience re-exports for dispatcher consumers.
//!
//! ```rust
//! use tollgate::prelude::*;
//! ```

pub use crate::action::{
    ActionRegistration, ActionResult, InterceptorId, InterceptorOptions, InterceptorSpec,
    action_fn, interceptor_fn,
};
pub use crate::context::{CallContext, InvocationContext};
pub use crate::dispatcher::{DEFAULT_INTERCEPTOR_TIMEOUT, Dispatcher};
pub use crate::error::{ActionError, DispatchError, TIMEOUT_REASON};
