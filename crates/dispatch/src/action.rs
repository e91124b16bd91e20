use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::context::{CallContext, InvocationContext};
use crate::error::ActionError;

/// Result produced by an action callback.
pub type ActionResult = Result<serde_json::Value, ActionError>;

/// Type-erased action callback.
///
/// Stored as `Arc` so a callback can be invoked after the registry lock has
/// been released and shared across concurrent calls.
pub type ActionCallback = Arc<dyn Fn(CallContext) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// Type-erased interceptor callback.
///
/// The callback's own return value carries no decision; the chain advances
/// only when the [`InvocationContext`] is resumed, intercepted, or times out.
pub type InterceptorCallback =
    Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a plain async closure as an [`ActionCallback`].
pub fn action_fn<F, Fut>(f: F) -> ActionCallback
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap a plain async closure as an [`InterceptorCallback`].
pub fn interceptor_fn<F, Fut>(f: F) -> InterceptorCallback
where
    F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Opaque identity token for a registered interceptor.
///
/// Returned by [`Dispatcher::intercept`](crate::Dispatcher::intercept) and
/// required for removal. Closures have no reliable reference identity in
/// Rust, so removal goes through this token instead of comparing callbacks.
/// Registering the same closure twice yields two distinct tokens and two
/// independent firings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

impl InterceptorId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interceptor#{}", self.0)
    }
}

/// Options for interceptor registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterceptorOptions {
    /// Remove the interceptor after its first execution, whether it resumed
    /// or intercepted.
    pub once: bool,
    /// Per-interceptor watchdog override. `None` uses the dispatcher-level
    /// default.
    pub timeout: Option<Duration>,
}

/// An interceptor supplied inline through
/// [`ActionRegistration::Descriptor`]. Identity is assigned at registration
/// time; the resulting [`InterceptorId`]s appear in the returned descriptor.
#[derive(Clone)]
pub struct InterceptorSpec {
    /// The guard callback.
    pub callback: InterceptorCallback,
    /// Registration options (once flag, watchdog override).
    pub options: InterceptorOptions,
}

impl InterceptorSpec {
    /// Build a spec from a plain async closure.
    pub fn new<F, Fut>(f: F, once: bool) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            callback: interceptor_fn(f),
            options: InterceptorOptions {
                once,
                timeout: None,
            },
        }
    }
}

impl fmt::Debug for InterceptorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorSpec")
            .field("once", &self.options.once)
            .field("timeout", &self.options.timeout)
            .finish_non_exhaustive()
    }
}

/// What to register under an action name.
///
/// The two forms merge differently with an existing descriptor:
/// [`Callback`](Self::Callback) swaps only the callback, while
/// [`Descriptor`](Self::Descriptor) also sets the interceptable flag and
/// appends its interceptors. See
/// [`Dispatcher::register`](crate::Dispatcher::register).
pub enum ActionRegistration {
    /// Bare callback: update the callback, preserve everything else.
    Callback(ActionCallback),
    /// Full payload: set callback and flag, append interceptors.
    Descriptor {
        /// The action callback.
        callback: ActionCallback,
        /// Whether interceptors may run before this action. `None` means the
        /// default (`true`).
        can_be_intercepted: Option<bool>,
        /// Interceptors appended (never replacing) to the existing list.
        interceptors: Vec<InterceptorSpec>,
    },
}

impl ActionRegistration {
    /// Bare-callback registration from a plain async closure.
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self::Callback(action_fn(f))
    }

    /// Full-descriptor registration from a plain async closure, with the
    /// default flag and no inline interceptors.
    pub fn descriptor<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self::Descriptor {
            callback: action_fn(f),
            can_be_intercepted: None,
            interceptors: Vec::new(),
        }
    }

    /// Set the interceptable flag. Upgrades a bare callback to a full
    /// descriptor.
    pub fn can_be_intercepted(self, flag: bool) -> Self {
        let (callback, interceptors) = self.into_parts();
        Self::Descriptor {
            callback,
            can_be_intercepted: Some(flag),
            interceptors,
        }
    }

    /// Append an inline interceptor. Upgrades a bare callback to a full
    /// descriptor.
    pub fn with_interceptor(self, spec: InterceptorSpec) -> Self {
        let flag = match &self {
            Self::Callback(_) => None,
            Self::Descriptor {
                can_be_intercepted,
                ..
            } => *can_be_intercepted,
        };
        let (callback, mut interceptors) = self.into_parts();
        interceptors.push(spec);
        Self::Descriptor {
            callback,
            can_be_intercepted: flag,
            interceptors,
        }
    }

    fn into_parts(self) -> (ActionCallback, Vec<InterceptorSpec>) {
        match self {
            Self::Callback(callback) => (callback, Vec::new()),
            Self::Descriptor {
                callback,
                interceptors,
                ..
            } => (callback, interceptors),
        }
    }
}

impl fmt::Debug for ActionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.debug_tuple("Callback").finish_non_exhaustive(),
            Self::Descriptor {
                can_be_intercepted,
                interceptors,
                ..
            } => f
                .debug_struct("Descriptor")
                .field("can_be_intercepted", can_be_intercepted)
                .field("interceptors", &interceptors.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Public snapshot of a registered action.
///
/// Returned by [`Dispatcher::register`](crate::Dispatcher::register) and
/// [`Dispatcher::descriptor`](crate::Dispatcher::descriptor). Reflects the
/// state at the moment it was taken; later mutations (interceptor removal,
/// re-registration) do not show through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    /// The action name.
    pub name: String,
    /// Whether interceptors run before the action callback.
    pub can_be_intercepted: bool,
    /// Identity tokens of the registered interceptors, in firing order.
    pub interceptors: Vec<InterceptorId>,
}

/// Internal registry record for one action name.
#[derive(Clone)]
pub(crate) struct ActionRecord {
    pub(crate) name: String,
    pub(crate) can_be_intercepted: bool,
    pub(crate) interceptors: Vec<InterceptorEntry>,
    pub(crate) callback: ActionCallback,
}

impl ActionRecord {
    /// Safe defaults for a record created lazily by `register` or
    /// `intercept`: interceptable, no interceptors, no-op callback.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_be_intercepted: true,
            interceptors: Vec::new(),
            callback: action_fn(|_ctx| async { Ok(serde_json::Value::Null) }),
        }
    }

    pub(crate) fn snapshot(&self) -> ActionDescriptor {
        ActionDescriptor {
            name: self.name.clone(),
            can_be_intercepted: self.can_be_intercepted,
            interceptors: self.interceptors.iter().map(|e| e.id).collect(),
        }
    }
}

/// One registered interceptor on an action.
#[derive(Clone)]
pub(crate) struct InterceptorEntry {
    pub(crate) id: InterceptorId,
    pub(crate) callback: InterceptorCallback,
    pub(crate) once: bool,
    pub(crate) timeout: Option<Duration>,
}

impl InterceptorEntry {
    pub(crate) fn from_spec(spec: InterceptorSpec) -> Self {
        Self {
            id: InterceptorId::next(),
            callback: spec.callback,
            once: spec.options.once,
            timeout: spec.options.timeout,
        }
    }
}

/// The registry's backing store: action name to record, names unique.
pub(crate) type ActionMap = HashMap<String, ActionRecord>;

/// Remove the first entry with `id` from the named action.
///
/// Used both by the dispatcher's public removal and by
/// [`InvocationContext::remove_interceptor`](crate::InvocationContext::remove_interceptor).
/// Absent action or absent entry is a no-op reported as `false`.
pub(crate) fn remove_entry(map: &mut ActionMap, name: &str, id: InterceptorId) -> bool {
    let Some(record) = map.get_mut(name) else {
        return false;
    };
    match record.interceptors.iter().position(|entry| entry.id == id) {
        Some(pos) => {
            record.interceptors.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interceptor_ids_are_unique() {
        let a = InterceptorId::next();
        let b = InterceptorId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn record_defaults() {
        let record = ActionRecord::new("noop");
        assert!(record.can_be_intercepted);
        assert!(record.interceptors.is_empty());
        let snap = record.snapshot();
        assert_eq!(snap.name, "noop");
        assert!(snap.interceptors.is_empty());
    }

    #[test]
    fn registration_builder_upgrades_to_descriptor() {
        let reg = ActionRegistration::callback(|_ctx| async { Ok(serde_json::Value::Null) })
            .can_be_intercepted(false);
        match reg {
            ActionRegistration::Descriptor {
                can_be_intercepted,
                interceptors,
                ..
            } => {
                assert_eq!(can_be_intercepted, Some(false));
                assert!(interceptors.is_empty());
            }
            ActionRegistration::Callback(_) => panic!("expected Descriptor"),
        }
    }

    #[test]
    fn with_interceptor_preserves_flag() {
        let reg = ActionRegistration::descriptor(|_ctx| async { Ok(serde_json::Value::Null) })
            .can_be_intercepted(false)
            .with_interceptor(InterceptorSpec::new(|ctx| async move { ctx.resume() }, true));
        match reg {
            ActionRegistration::Descriptor {
                can_be_intercepted,
                interceptors,
                ..
            } => {
                assert_eq!(can_be_intercepted, Some(false));
                assert_eq!(interceptors.len(), 1);
                assert!(interceptors[0].options.once);
            }
            ActionRegistration::Callback(_) => panic!("expected Descriptor"),
        }
    }

    #[test]
    fn remove_entry_by_id() {
        let mut map = ActionMap::new();
        let mut record = ActionRecord::new("a");
        let entry = InterceptorEntry::from_spec(InterceptorSpec::new(
            |ctx| async move { ctx.resume() },
            false,
        ));
        let id = entry.id;
        record.interceptors.push(entry);
        map.insert("a".into(), record);

        assert!(remove_entry(&mut map, "a", id));
        // Absent entry and absent action are both no-ops.
        assert!(!remove_entry(&mut map, "a", id));
        assert!(!remove_entry(&mut map, "missing", id));
    }

    #[test]
    fn debug_formats_do_not_expose_callbacks() {
        let reg = ActionRegistration::callback(|_ctx| async { Ok(serde_json::Value::Null) });
        assert!(format!("{reg:?}").starts_with("Callback"));

        let spec = InterceptorSpec::new(|ctx| async move { ctx.resume() }, false);
        assert!(format!("{spec:?}").contains("once: false"));
    }
}
