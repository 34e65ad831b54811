//! A cancellable handle to a method call that is still awaiting its reply.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::call_state::CallState;
use crate::error::Error;
use crate::message::OwnedMessage;

type Outcome = Result<OwnedMessage, Error>;

struct Inner {
    serial: NonZeroU32,
    cancelled: AtomicBool,
    outcome: Mutex<Option<Outcome>>,
    notify: Notify,
}

/// A method call that has been submitted to the dispatcher and is waiting
/// for a reply.
///
/// Cloning a `PendingCall` shares the same underlying call: cancelling
/// through any clone cancels all of them. Only one clone should ultimately
/// consume the reply via [`wait`](Self::wait)/[`wait_state`](Self::wait_state);
/// the crate's own typed front-end and blocking call paths never clone a
/// call they intend to wait on themselves.
#[derive(Clone)]
pub struct PendingCall {
    inner: Arc<Inner>,
}

impl PendingCall {
    /// The serial of the method call this handle is waiting on.
    pub fn serial(&self) -> NonZeroU32 {
        self.inner.serial
    }

    /// Whether a reply has neither arrived nor been cancelled yet.
    pub fn is_pending(&self) -> bool {
        !self.inner.cancelled.load(Ordering::Acquire) && self.inner.outcome.lock().unwrap().is_none()
    }

    /// Cancel this call. A reply that arrives afterwards is discarded
    /// rather than delivered, and no completion is ever produced for it: an
    /// in-flight or later [`wait`](Self::wait) simply never resolves, and
    /// [`is_pending`](Self::is_pending) reports the call as no longer
    /// pending without a synthesized error.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Wait for the reply to arrive and return the raw method-return body
    /// (or the translated error). Never resolves for a cancelled call.
    pub async fn wait(&self) -> Outcome {
        loop {
            // Register for the next notification before checking state, so a
            // `resolve` racing with this check is never missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.take_outcome() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Wait for the reply, discarding its body and exposing only the
    /// success/failure summary. Used by generic, untyped completion
    /// callbacks that only care whether the call succeeded.
    pub async fn wait_state(&self) -> CallState {
        match self.wait().await {
            Ok(_) => CallState::success(self.serial()),
            Err(error) => CallState::failure(self.serial(), error),
        }
    }

    fn take_outcome(&self) -> Option<Outcome> {
        self.inner.outcome.lock().unwrap().take()
    }
}

/// The dispatcher-side half of a [`PendingCall`], used to resolve it once a
/// reply is decoded (or to check whether resolving is still worthwhile).
pub(crate) struct PendingCallResolver {
    inner: Arc<Inner>,
}

impl PendingCallResolver {
    pub(crate) fn serial(&self) -> NonZeroU32 {
        self.inner.serial
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Deliver `outcome` to the call, waking anyone awaiting it. A no-op if
    /// the call was cancelled in the meantime.
    pub(crate) fn resolve(self, outcome: Outcome) {
        if self.is_cancelled() {
            return;
        }

        *self.inner.outcome.lock().unwrap() = Some(outcome);
        self.inner.notify.notify_waiters();
    }
}

/// Create a new pending call for `serial`, returning the handle given to the
/// caller and the resolver kept by the dispatcher.
pub(crate) fn new(serial: NonZeroU32) -> (PendingCall, PendingCallResolver) {
    let inner = Arc::new(Inner {
        serial,
        cancelled: AtomicBool::new(false),
        outcome: Mutex::new(None),
        notify: Notify::new(),
    });

    (
        PendingCall {
            inner: inner.clone(),
        },
        PendingCallResolver { inner },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::BodyBuf;
    use crate::message::{Message, MessageKind};
    use crate::protocol::Flags;

    fn dummy_reply(reply_serial: NonZeroU32) -> OwnedMessage {
        let body = BodyBuf::new();
        Message {
            kind: MessageKind::MethodReturn { reply_serial },
            serial: Some(NonZeroU32::new(99).unwrap()),
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: body.signature(),
            body: body.read_buf(),
        }
        .to_owned()
    }

    #[tokio::test]
    async fn resolves_once_and_delivers_to_clone() {
        let (call, resolver) = new(NonZeroU32::new(7).unwrap());
        let other = call.clone();

        assert!(call.is_pending());
        resolver.resolve(Ok(dummy_reply(NonZeroU32::new(7).unwrap())));

        let outcome = other.wait().await;
        assert!(outcome.is_ok());
        assert!(!call.is_pending());
    }

    #[tokio::test]
    async fn cancel_discards_late_reply_without_error() {
        let (call, resolver) = new(NonZeroU32::new(3).unwrap());
        call.cancel();
        resolver.resolve(Ok(dummy_reply(NonZeroU32::new(3).unwrap())));

        assert!(!call.is_pending());
    }

    #[tokio::test]
    async fn cancel_leaves_wait_unresolved() {
        let (call, _resolver) = new(NonZeroU32::new(4).unwrap());
        call.cancel();

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), call.wait()).await;
        assert!(outcome.is_err(), "cancelled call must not produce a completion");
    }
}
