/// Interception reason reported when an interceptor's watchdog fires before
/// the interceptor reaches a decision.
pub const TIMEOUT_REASON: &str = "InterceptorTimeout";

/// Error type for the `call()` pipeline.
///
/// Every failure of a dispatch surfaces here, through the future returned by
/// [`Dispatcher::call`](crate::Dispatcher::call) — never as a panic and never
/// synchronously. Payloads are plain strings so errors stay `Clone` and
/// comparable in assertions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// `call()` was made against a name with no registered action.
    ///
    /// Looking up a missing action has zero side effects: no descriptor is
    /// created, nothing runs.
    #[error("action `{name}` does not exist")]
    ActionDoesNotExist {
        /// The name that was looked up.
        name: String,
    },

    /// An interceptor failed to decide within its timeout window.
    ///
    /// The watchdog auto-intercepted the call with the reason
    /// [`TIMEOUT_REASON`].
    #[error("interceptor for `{action}` timed out: InterceptorTimeout")]
    InterceptorTimeout {
        /// The action whose chain stalled.
        action: String,
    },

    /// An interceptor explicitly aborted the call.
    ///
    /// The action callback and any remaining interceptors never ran.
    #[error("call to `{action}` intercepted: {reason}")]
    Intercepted {
        /// The action whose call was aborted.
        action: String,
        /// Caller-supplied reason passed to
        /// [`InvocationContext::intercept`](crate::InvocationContext::intercept).
        reason: String,
    },

    /// The action callback itself returned an error.
    #[error("action `{action}` failed: {message}")]
    ActionFailed {
        /// The action that ran and failed.
        action: String,
        /// The failure message reported by the callback.
        message: String,
    },
}

impl DispatchError {
    /// Returns `true` if the failure came from the interceptor chain
    /// (explicit interception or watchdog timeout) rather than from the
    /// action callback or a lookup miss.
    pub fn is_interception(&self) -> bool {
        matches!(
            self,
            Self::Intercepted { .. } | Self::InterceptorTimeout { .. }
        )
    }

    /// The interception reason, if this failure came from the chain.
    ///
    /// Returns [`TIMEOUT_REASON`] for watchdog timeouts.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Intercepted { reason, .. } => Some(reason),
            Self::InterceptorTimeout { .. } => Some(TIMEOUT_REASON),
            _ => None,
        }
    }
}

/// Error returned by action callbacks.
///
/// Deliberately opaque: the dispatcher folds it into
/// [`DispatchError::ActionFailed`] when propagating, so action authors do not
/// need to know about the pipeline's error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(String);

impl ActionError {
    /// Create an action error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}
