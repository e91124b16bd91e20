use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::action::{
    ActionDescriptor, ActionMap, ActionRecord, ActionRegistration, InterceptorCallback,
    InterceptorEntry, InterceptorId, InterceptorOptions, InterceptorSpec, interceptor_fn,
    remove_entry,
};
use crate::chain;
use crate::context::{CallContext, InvocationContext};
use crate::error::DispatchError;

/// Watchdog delay applied to interceptors that carry no per-entry override.
pub const DEFAULT_INTERCEPTOR_TIMEOUT: Duration = Duration::from_millis(5000);

/// The action registry and call pipeline.
///
/// Holds the name → descriptor map and drives the interceptor chain on every
/// [`call`](Self::call). There is no process-wide instance: construct one and
/// pass it by reference to whoever needs it.
///
/// # Example
///
/// ```rust
/// use tollgate::{ActionRegistration, Dispatcher};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dispatcher = Dispatcher::new();
/// dispatcher.register(
///     "math.double",
///     ActionRegistration::callback(|ctx| async move {
///         let n = ctx.params.as_i64().unwrap_or(0);
///         Ok(serde_json::json!(n * 2))
///     }),
/// );
///
/// let out = dispatcher.call("math.double", serde_json::json!(21)).await.unwrap();
/// assert_eq!(out, serde_json::json!(42));
/// # }
/// ```
pub struct Dispatcher {
    actions: Arc<RwLock<ActionMap>>,
    interceptor_timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher with the default interceptor timeout.
    pub fn new() -> Self {
        Self {
            actions: Arc::new(RwLock::new(ActionMap::new())),
            interceptor_timeout: DEFAULT_INTERCEPTOR_TIMEOUT,
        }
    }

    /// Override the dispatcher-level watchdog delay.
    ///
    /// Individual interceptors may still override this through
    /// [`InterceptorOptions::timeout`].
    pub fn with_interceptor_timeout(mut self, timeout: Duration) -> Self {
        self.interceptor_timeout = timeout;
        self
    }

    /// The watchdog delay applied to interceptors without an override.
    pub fn interceptor_timeout(&self) -> Duration {
        self.interceptor_timeout
    }

    /// Register an action under `name`, merging with any existing descriptor.
    ///
    /// The bare [`Callback`](ActionRegistration::Callback) form updates only
    /// the callback, preserving the existing interceptors and interceptable
    /// flag. The full [`Descriptor`](ActionRegistration::Descriptor) form
    /// sets the callback and the flag (defaulting to `true`), and *appends*
    /// its interceptors to the existing list — repeated registration merges,
    /// never clobbers.
    ///
    /// Returns a snapshot of the resulting descriptor.
    pub fn register(
        &self,
        name: impl Into<String>,
        registration: ActionRegistration,
    ) -> ActionDescriptor {
        let name = name.into();
        let mut actions = self.actions.write();
        let record = actions
            .entry(name.clone())
            .or_insert_with(|| ActionRecord::new(name.clone()));
        match registration {
            ActionRegistration::Callback(callback) => {
                record.callback = callback;
            }
            ActionRegistration::Descriptor {
                callback,
                can_be_intercepted,
                interceptors,
            } => {
                record.callback = callback;
                record.can_be_intercepted = can_be_intercepted.unwrap_or(true);
                record
                    .interceptors
                    .extend(interceptors.into_iter().map(InterceptorEntry::from_spec));
            }
        }
        debug!(action = %name, interceptors = record.interceptors.len(), "action registered");
        record.snapshot()
    }

    /// Delete the descriptor for `name`.
    ///
    /// A later [`call`](Self::call) fails with
    /// [`DispatchError::ActionDoesNotExist`]. Removing an unknown name is a
    /// no-op.
    pub fn remove_action(&self, name: &str) {
        if self.actions.write().remove(name).is_some() {
            debug!(action = %name, "action removed");
        }
    }

    /// Attach an interceptor to `name`, lazily creating the descriptor (with
    /// a no-op callback) if the action has not been registered yet.
    ///
    /// No deduplication happens: attaching the same closure twice yields two
    /// independent firings with distinct ids. With `once` set, the
    /// interceptor is removed after its first execution, whether it resumed
    /// or intercepted.
    ///
    /// Returns the identity token required for
    /// [`remove_interceptor`](Self::remove_interceptor).
    pub fn intercept<F, Fut>(&self, name: impl Into<String>, callback: F, once: bool) -> InterceptorId
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.intercept_with(
            name,
            interceptor_fn(callback),
            InterceptorOptions {
                once,
                timeout: None,
            },
        )
    }

    /// [`intercept`](Self::intercept) with explicit options, including a
    /// per-interceptor watchdog override.
    pub fn intercept_with(
        &self,
        name: impl Into<String>,
        callback: InterceptorCallback,
        options: InterceptorOptions,
    ) -> InterceptorId {
        let name = name.into();
        let entry = InterceptorEntry::from_spec(InterceptorSpec { callback, options });
        let id = entry.id;
        let mut actions = self.actions.write();
        let record = actions
            .entry(name.clone())
            .or_insert_with(|| ActionRecord::new(name.clone()));
        record.interceptors.push(entry);
        debug!(action = %name, entry = %id, once = options.once, "interceptor attached");
        id
    }

    /// Detach the interceptor identified by `id` from `name`.
    ///
    /// Returns `false` when the action name is unknown or no entry carries
    /// that id.
    pub fn remove_interceptor(&self, name: &str, id: InterceptorId) -> bool {
        let removed = remove_entry(&mut self.actions.write(), name, id);
        if removed {
            debug!(action = %name, entry = %id, "interceptor detached");
        }
        removed
    }

    /// Snapshot the descriptor for `name`, if registered.
    pub fn descriptor(&self, name: &str) -> Option<ActionDescriptor> {
        self.actions.read().get(name).map(ActionRecord::snapshot)
    }

    /// Whether an action is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().contains_key(name)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Returns `true` if no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Invoke the action registered under `name`.
    ///
    /// If the action is interceptable and has interceptors, they run first,
    /// strictly in registration order over a snapshot of the current list;
    /// the first interception aborts the call and the action callback never
    /// runs. Otherwise (or once the chain resumes all the way through) the
    /// callback receives a [`CallContext`] with the name and `params`, and
    /// its result is returned.
    ///
    /// Every failure surfaces through the returned future, per the taxonomy
    /// on [`DispatchError`]; nothing is thrown synchronously.
    #[instrument(level = "debug", skip(self, params))]
    pub async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let (callback, entries) = {
            let actions = self.actions.read();
            let Some(record) = actions.get(name) else {
                return Err(DispatchError::ActionDoesNotExist {
                    name: name.to_owned(),
                });
            };
            let entries = if record.can_be_intercepted {
                record.interceptors.clone()
            } else {
                Vec::new()
            };
            (Arc::clone(&record.callback), entries)
            // Lock released here; it is never held across an await.
        };

        if !entries.is_empty() {
            let action_name: Arc<str> = Arc::from(name);
            chain::run_chain(&self.actions, &action_name, entries, self.interceptor_timeout)
                .await?;
        }

        let ctx = CallContext::new(name, params);
        (callback)(ctx)
            .await
            .map_err(|err| DispatchError::ActionFailed {
                action: name.to_owned(),
                message: err.message().to_owned(),
            })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actions = self.actions.read();
        f.debug_struct("Dispatcher")
            .field("count", &actions.len())
            .field("actions", &actions.keys().collect::<Vec<_>>())
            .field("interceptor_timeout", &self.interceptor_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> ActionRegistration {
        ActionRegistration::callback(|_ctx| async { Ok(serde_json::Value::Null) })
    }

    #[test]
    fn empty_dispatcher() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.len(), 0);
        assert!(dispatcher.descriptor("anything").is_none());
    }

    #[test]
    fn register_creates_descriptor_with_defaults() {
        let dispatcher = Dispatcher::new();
        let descriptor = dispatcher.register("feed.refresh", noop());
        assert_eq!(descriptor.name, "feed.refresh");
        assert!(descriptor.can_be_intercepted);
        assert!(descriptor.interceptors.is_empty());
        assert!(dispatcher.contains("feed.refresh"));
    }

    #[test]
    fn bare_callback_reregistration_preserves_flag_and_interceptors() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("a", noop().can_be_intercepted(false));
        let id = dispatcher.intercept("a", |ctx| async move { ctx.resume() }, false);

        let descriptor = dispatcher.register("a", noop());
        assert!(!descriptor.can_be_intercepted);
        assert_eq!(descriptor.interceptors, vec![id]);
    }

    #[test]
    fn descriptor_registration_appends_interceptors() {
        let dispatcher = Dispatcher::new();
        let first = dispatcher.register(
            "a",
            noop().with_interceptor(InterceptorSpec::new(
                |ctx| async move { ctx.resume() },
                false,
            )),
        );
        let second = dispatcher.register(
            "a",
            noop().with_interceptor(InterceptorSpec::new(
                |ctx| async move { ctx.resume() },
                false,
            )),
        );
        assert_eq!(first.interceptors.len(), 1);
        assert_eq!(second.interceptors.len(), 2);
        // Earlier registrations keep their position.
        assert_eq!(second.interceptors[0], first.interceptors[0]);
    }

    #[test]
    fn descriptor_registration_resets_flag_to_default() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("a", noop().can_be_intercepted(false));
        // Full-payload form with no explicit flag restores the default.
        let descriptor = dispatcher.register(
            "a",
            ActionRegistration::descriptor(|_ctx| async { Ok(serde_json::Value::Null) }),
        );
        assert!(descriptor.can_be_intercepted);
    }

    #[test]
    fn intercept_lazily_creates_the_action() {
        let dispatcher = Dispatcher::new();
        let id = dispatcher.intercept("ghost", |ctx| async move { ctx.resume() }, false);
        let descriptor = dispatcher.descriptor("ghost").unwrap();
        assert!(descriptor.can_be_intercepted);
        assert_eq!(descriptor.interceptors, vec![id]);
    }

    #[test]
    fn same_closure_registered_twice_yields_two_entries() {
        let dispatcher = Dispatcher::new();
        let guard = |ctx: InvocationContext| async move { ctx.resume() };
        let a = dispatcher.intercept("a", guard, false);
        let b = dispatcher.intercept("a", guard, false);
        assert_ne!(a, b);
        assert_eq!(dispatcher.descriptor("a").unwrap().interceptors, vec![a, b]);
    }

    #[test]
    fn remove_interceptor_by_id() {
        let dispatcher = Dispatcher::new();
        let id = dispatcher.intercept("a", |ctx| async move { ctx.resume() }, false);
        assert!(dispatcher.remove_interceptor("a", id));
        assert!(!dispatcher.remove_interceptor("a", id));
        assert!(!dispatcher.remove_interceptor("unknown", id));
        // The descriptor itself persists after its last interceptor is gone.
        assert!(dispatcher.contains("a"));
    }

    #[test]
    fn remove_action_deletes_the_descriptor() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("a", noop());
        dispatcher.remove_action("a");
        assert!(!dispatcher.contains("a"));
        // Unknown name is a no-op.
        dispatcher.remove_action("a");
    }

    #[tokio::test]
    async fn call_unknown_action_fails_without_side_effects() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.call("missing", json!(null)).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::ActionDoesNotExist {
                name: "missing".into(),
            }
        );
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn call_invokes_callback_with_context() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(
            "echo.context",
            ActionRegistration::callback(|ctx| async move {
                Ok(json!({ "action": ctx.action_name, "params": ctx.params }))
            }),
        );
        let out = dispatcher
            .call("echo.context", json!({ "k": "v" }))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({ "action": "echo.context", "params": { "k": "v" } })
        );
    }

    #[tokio::test]
    async fn uninterceptable_action_skips_its_interceptors() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("direct", noop().can_be_intercepted(false));
        dispatcher.intercept("direct", |ctx| async move { ctx.intercept("never") }, false);

        let out = dispatcher.call("direct", json!(null)).await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn action_failure_propagates() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(
            "broken",
            ActionRegistration::callback(|_ctx| async { Err("disk on fire".into()) }),
        );
        let err = dispatcher.call("broken", json!(null)).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::ActionFailed {
                action: "broken".into(),
                message: "disk on fire".into(),
            }
        );
    }

    #[tokio::test]
    async fn lazily_created_action_runs_noop_callback() {
        let dispatcher = Dispatcher::new();
        dispatcher.intercept("ghost", |ctx| async move { ctx.resume() }, false);
        let out = dispatcher.call("ghost", json!(null)).await.unwrap();
        assert_eq!(out, serde_json::Value::Null);
    }

    #[test]
    fn debug_format() {
        let dispatcher = Dispatcher::new();
        dispatcher.register("a", noop());
        let debug = format!("{dispatcher:?}");
        assert!(debug.contains("Dispatcher"));
        assert!(debug.contains("count: 1"));
    }
}
