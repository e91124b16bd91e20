use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::action::{ActionMap, InterceptorId, remove_entry};

/// Context handed to an action callback.
///
/// Carries the name under which the action was invoked and the caller's
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    /// The name the action was called under.
    pub action_name: String,
    /// Parameters supplied to [`Dispatcher::call`](crate::Dispatcher::call).
    pub params: serde_json::Value,
}

impl CallContext {
    pub(crate) fn new(action_name: &str, params: serde_json::Value) -> Self {
        Self {
            action_name: action_name.to_owned(),
            params,
        }
    }
}

/// Terminal outcome of one interceptor run.
///
/// The run starts pending; the first settlement wins and every later signal
/// (duplicate `resume`, late watchdog, late `intercept`) is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// The interceptor allowed the call to proceed.
    Continued,
    /// The interceptor aborted the call with a reason. Watchdog timeouts
    /// settle here with [`TIMEOUT_REASON`](crate::error::TIMEOUT_REASON).
    Intercepted(String),
}

struct DecisionSlot {
    tx: Option<oneshot::Sender<Decision>>,
    settled: Option<Decision>,
}

/// Single-settlement cell shared between an [`InvocationContext`] (and its
/// clones) and the chain runner awaiting the decision.
pub(crate) struct DecisionCell {
    slot: Mutex<DecisionSlot>,
}

impl DecisionCell {
    pub(crate) fn new(tx: oneshot::Sender<Decision>) -> Self {
        Self {
            slot: Mutex::new(DecisionSlot {
                tx: Some(tx),
                settled: None,
            }),
        }
    }

    /// Record the first decision and wake the runner. Returns `false` if a
    /// decision had already been made; the new one is discarded.
    pub(crate) fn settle(&self, decision: Decision) -> bool {
        let mut slot = self.slot.lock();
        let Some(tx) = slot.tx.take() else {
            return false;
        };
        slot.settled = Some(decision.clone());
        // The runner may already have stopped listening (it has not — it owns
        // the receiver until the step resolves), so the send result is moot.
        let _ = tx.send(decision);
        true
    }

    pub(crate) fn settled(&self) -> Option<Decision> {
        self.slot.lock().settled.clone()
    }
}

/// Per-run handle through which an interceptor decides the fate of a call.
///
/// A fresh context is created for every interceptor execution and never
/// reused across runs. It is `Clone` so the interceptor body can move a copy
/// into a spawned task and decide from there.
///
/// Exactly one decision counts: the first of [`resume`](Self::resume),
/// [`intercept`](Self::intercept), or the watchdog firing. Everything after
/// that is ignored.
#[derive(Clone)]
pub struct InvocationContext {
    action_name: Arc<str>,
    entry: InterceptorId,
    cell: Arc<DecisionCell>,
    // Weak so an interceptor stashing a context somewhere cannot keep the
    // registry alive past its owner.
    actions: Weak<RwLock<ActionMap>>,
}

impl InvocationContext {
    pub(crate) fn new(
        action_name: Arc<str>,
        entry: InterceptorId,
        cell: Arc<DecisionCell>,
        actions: Weak<RwLock<ActionMap>>,
    ) -> Self {
        Self {
            action_name,
            entry,
            cell,
            actions,
        }
    }

    /// The action this interceptor is guarding.
    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Allow the call to proceed to the next interceptor (or the action
    /// callback). Idempotent: once any decision has been made, this is a
    /// no-op.
    pub fn resume(&self) {
        if self.cell.settle(Decision::Continued) {
            trace!(action = %self.action_name, entry = %self.entry, "interceptor resumed");
        } else {
            trace!(action = %self.action_name, entry = %self.entry, "duplicate decision ignored");
        }
    }

    /// Abort the whole call with `reason`. The action callback and any
    /// remaining interceptors will not run. Idempotent like
    /// [`resume`](Self::resume).
    pub fn intercept(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.cell.settle(Decision::Intercepted(reason.clone())) {
            debug!(action = %self.action_name, entry = %self.entry, %reason, "call intercepted");
        } else {
            trace!(action = %self.action_name, entry = %self.entry, "duplicate decision ignored");
        }
    }

    /// Remove this interceptor from its action immediately.
    ///
    /// Returns `false` if the entry (or the whole action, or the registry
    /// itself) is already gone; removal of an absent entry is a no-op.
    pub fn remove_interceptor(&self) -> bool {
        match self.actions.upgrade() {
            Some(actions) => remove_entry(&mut actions.write(), &self.action_name, self.entry),
            None => false,
        }
    }

    /// The interception reason, if this run has been intercepted.
    ///
    /// `None` while pending and after [`resume`](Self::resume).
    pub fn error(&self) -> Option<String> {
        match self.cell.settled() {
            Some(Decision::Intercepted(reason)) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("action_name", &self.action_name)
            .field("entry", &self.entry)
            .field("settled", &self.cell.settled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_pair() -> (Arc<DecisionCell>, oneshot::Receiver<Decision>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(DecisionCell::new(tx)), rx)
    }

    fn context(cell: &Arc<DecisionCell>) -> InvocationContext {
        InvocationContext::new(
            Arc::from("test.action"),
            InterceptorId::next(),
            Arc::clone(cell),
            Weak::new(),
        )
    }

    #[test]
    fn first_settlement_wins() {
        let (cell, mut rx) = cell_pair();
        assert!(cell.settle(Decision::Continued));
        assert!(!cell.settle(Decision::Intercepted("late".into())));
        assert_eq!(cell.settled(), Some(Decision::Continued));
        assert_eq!(rx.try_recv().unwrap(), Decision::Continued);
    }

    #[test]
    fn resume_is_idempotent() {
        let (cell, mut rx) = cell_pair();
        let ctx = context(&cell);
        ctx.resume();
        ctx.resume();
        assert_eq!(rx.try_recv().unwrap(), Decision::Continued);
        // Channel delivered exactly one decision; a second try_recv fails.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn intercept_after_resume_is_ignored() {
        let (cell, _rx) = cell_pair();
        let ctx = context(&cell);
        ctx.resume();
        ctx.intercept("too late");
        assert_eq!(cell.settled(), Some(Decision::Continued));
        assert_eq!(ctx.error(), None);
    }

    #[test]
    fn error_reports_interception_reason() {
        let (cell, _rx) = cell_pair();
        let ctx = context(&cell);
        assert_eq!(ctx.error(), None);
        ctx.intercept("blocked");
        assert_eq!(ctx.error(), Some("blocked".to_owned()));
    }

    #[test]
    fn clones_share_the_decision() {
        let (cell, mut rx) = cell_pair();
        let ctx = context(&cell);
        let clone = ctx.clone();
        clone.intercept("from clone");
        assert_eq!(
            rx.try_recv().unwrap(),
            Decision::Intercepted("from clone".into())
        );
        assert_eq!(ctx.error(), Some("from clone".to_owned()));
    }

    #[test]
    fn remove_interceptor_with_dead_registry_is_noop() {
        let (cell, _rx) = cell_pair();
        let ctx = context(&cell);
        assert!(!ctx.remove_interceptor());
    }
}
