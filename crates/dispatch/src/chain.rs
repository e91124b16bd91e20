//! Interceptor chain execution.
//!
//! Entries run strictly in registration order over a snapshot taken at
//! `call()` time, so removals performed mid-chain (by `once` entries or by
//! [`InvocationContext::remove_interceptor`]) never skip or double-fire a
//! later entry. Entry N+1 never starts before entry N settles.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::action::{ActionMap, InterceptorEntry, remove_entry};
use crate::context::{Decision, DecisionCell, InvocationContext};
use crate::error::{DispatchError, TIMEOUT_REASON};

/// Run the snapshot of a call's interceptors in order.
///
/// The first interception (explicit or watchdog) aborts the chain and the
/// error propagates to fail the whole call.
pub(crate) async fn run_chain(
    actions: &Arc<RwLock<ActionMap>>,
    action_name: &Arc<str>,
    entries: Vec<InterceptorEntry>,
    default_timeout: Duration,
) -> Result<(), DispatchError> {
    for entry in entries {
        let timeout = entry.timeout.unwrap_or(default_timeout);
        run_entry(actions, action_name, &entry, timeout).await?;
    }
    Ok(())
}

/// Execute one interceptor under a fresh invocation context and a watchdog.
///
/// The interceptor body, the decision channel, and the watchdog are raced in
/// a biased select. Bias order encodes the tie-break: a decision already
/// made always wins, and when the body and the watchdog become ready at the
/// same instant the body is polled first, so a decision it makes on that
/// poll beats the timeout.
async fn run_entry(
    actions: &Arc<RwLock<ActionMap>>,
    action_name: &Arc<str>,
    entry: &InterceptorEntry,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let (tx, mut rx) = oneshot::channel();
    let cell = Arc::new(DecisionCell::new(tx));
    let ctx = InvocationContext::new(
        Arc::clone(action_name),
        entry.id,
        Arc::clone(&cell),
        Arc::downgrade(actions),
    );

    trace!(action = %action_name, entry = %entry.id, ?timeout, "running interceptor");

    let watchdog = tokio::time::sleep(timeout);
    tokio::pin!(watchdog);
    let mut body = (entry.callback)(ctx);
    let mut body_done = false;
    let mut timed_out = false;

    let decision = loop {
        tokio::select! {
            biased;
            decided = &mut rx => {
                // The sender lives in `cell`, which we hold until this point,
                // so the channel cannot close unsettled.
                break decided.unwrap_or_else(|_| Decision::Intercepted(TIMEOUT_REASON.into()));
            }
            () = &mut body, if !body_done => {
                body_done = true;
            }
            () = &mut watchdog, if !timed_out => {
                timed_out = true;
                if cell.settle(Decision::Intercepted(TIMEOUT_REASON.into())) {
                    warn!(
                        action = %action_name,
                        entry = %entry.id,
                        ?timeout,
                        "interceptor made no decision before the watchdog fired"
                    );
                }
            }
        }
    };

    // A body still running after the decision keeps executing on its own; it
    // can no longer affect this call.
    if !body_done {
        let _ = tokio::spawn(body);
    }

    // Once entries leave the descriptor after settling, win or lose. The
    // entry may already be gone if the interceptor removed itself.
    if entry.once {
        remove_entry(&mut actions.write(), action_name, entry.id);
    }

    match decision {
        Decision::Continued => Ok(()),
        Decision::Intercepted(reason) if reason == TIMEOUT_REASON => {
            Err(DispatchError::InterceptorTimeout {
                action: action_name.to_string(),
            })
        }
        Decision::Intercepted(reason) => Err(DispatchError::Intercepted {
            action: action_name.to_string(),
            reason,
        }),
    }
}
