//! Outcome, callback and handle types shared by every bridged call.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};

// ---------------------------------------------------------------------------
// Outcome & Callback
// ---------------------------------------------------------------------------

/// Result of one blocking computation, as delivered to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(fault) => Err(fault),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(fault) => Outcome::Failure(fault),
        }
    }
}

/// Receives the outcome of one invocation.
///
/// Consumes itself, so a handler can observe at most one outcome.
pub trait OutcomeHandler<T, E>: Send + 'static {
    fn on_outcome(self: Box<Self>, outcome: Outcome<T, E>);
}

impl<T, E, F> OutcomeHandler<T, E> for F
where
    F: FnOnce(Outcome<T, E>) + Send + 'static,
{
    fn on_outcome(self: Box<Self>, outcome: Outcome<T, E>) {
        (*self)(outcome)
    }
}

pub type Callback<T, E> = Box<dyn OutcomeHandler<T, E>>;

/// Box a closure as a [`Callback`].
pub fn callback<T, E, F>(f: F) -> Callback<T, E>
where
    F: FnOnce(Outcome<T, E>) + Send + 'static,
{
    Box::new(f)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Why a handle did not settle with a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleError<E> {
    /// The computation returned this fault, unmodified.
    Failed(E),
    /// The handle was cancelled before it settled.
    Cancelled,
    /// The computation panicked.
    Panicked(String),
    /// No outcome will arrive: the task was dropped unrun, or the outcome
    /// was already taken from this handle.
    Abandoned,
}

impl<E> HandleError<E> {
    pub fn failure(&self) -> Option<&E> {
        match self {
            HandleError::Failed(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            HandleError::Failed(fault) => Some(fault),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for HandleError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Failed(fault) => write!(f, "operation failed: {fault}"),
            HandleError::Cancelled => f.write_str("operation cancelled"),
            HandleError::Panicked(message) => write!(f, "operation panicked: {message}"),
            HandleError::Abandoned => f.write_str("operation abandoned"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for HandleError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandleError::Failed(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type Settlement<T, E> = Result<T, HandleError<E>>;

enum HandleState<T, E> {
    Pending(oneshot::Receiver<Settlement<T, E>>),
    Settled(Settlement<T, E>),
    Taken,
}

/// The eventual outcome of one bridged computation.
///
/// Settles exactly once, whether or not a callback was registered. Can be
/// polled with [`is_finished`](Self::is_finished), blocked on with
/// [`wait`](Self::wait), or awaited (and chained with any future
/// combinator).
///
/// Cancelling only detaches this handle: the computation keeps running and
/// any registered callback still fires.
pub struct OperationHandle<T, E> {
    operation: &'static str,
    state: HandleState<T, E>,
}

/// Write side of an [`OperationHandle`].
pub(crate) struct Settler<T, E> {
    tx: oneshot::Sender<Settlement<T, E>>,
}

impl<T, E> Settler<T, E> {
    /// Returns false if the handle was dropped or cancelled first.
    pub(crate) fn settle(self, settlement: Settlement<T, E>) -> bool {
        self.tx.send(settlement).is_ok()
    }
}

pub(crate) fn pending<T, E>(operation: &'static str) -> (Settler<T, E>, OperationHandle<T, E>) {
    let (tx, rx) = oneshot::channel();
    (
        Settler { tx },
        OperationHandle {
            operation,
            state: HandleState::Pending(rx),
        },
    )
}

impl<T, E> OperationHandle<T, E> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Non-blocking completion check.
    pub fn is_finished(&mut self) -> bool {
        let settlement = match &mut self.state {
            HandleState::Pending(rx) => match rx.try_recv() {
                Ok(settlement) => settlement,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Closed) => Err(HandleError::Abandoned),
            },
            _ => return true,
        };
        self.state = HandleState::Settled(settlement);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.state, HandleState::Settled(Err(HandleError::Cancelled)))
    }

    /// Mark the handle cancelled. Returns false if it had already settled.
    pub fn cancel(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = HandleState::Settled(Err(HandleError::Cancelled));
        true
    }

    /// Take the outcome if the handle has settled.
    pub fn try_take(&mut self) -> Option<Settlement<T, E>> {
        if !self.is_finished() {
            return None;
        }
        match std::mem::replace(&mut self.state, HandleState::Taken) {
            HandleState::Settled(settlement) => Some(settlement),
            _ => Some(Err(HandleError::Abandoned)),
        }
    }

    /// Block the current thread until the handle settles.
    ///
    /// Panics if called from within an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Settlement<T, E> {
        match self.state {
            HandleState::Pending(rx) => rx.blocking_recv().unwrap_or(Err(HandleError::Abandoned)),
            HandleState::Settled(settlement) => settlement,
            HandleState::Taken => Err(HandleError::Abandoned),
        }
    }
}

impl<T, E> Future for OperationHandle<T, E> {
    type Output = Settlement<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match std::mem::replace(&mut this.state, HandleState::Taken) {
            HandleState::Pending(mut rx) => match Pin::new(&mut rx).poll(cx) {
                Poll::Ready(received) => Poll::Ready(received.unwrap_or(Err(HandleError::Abandoned))),
                Poll::Pending => {
                    this.state = HandleState::Pending(rx);
                    Poll::Pending
                }
            },
            HandleState::Settled(settlement) => Poll::Ready(settlement),
            HandleState::Taken => Poll::Ready(Err(HandleError::Abandoned)),
        }
    }
}

// The settled value is never pinned in place.
impl<T, E> Unpin for OperationHandle<T, E> {}

impl<T, E> fmt::Debug for OperationHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            HandleState::Pending(_) => "pending",
            HandleState::Settled(Ok(_)) => "succeeded",
            HandleState::Settled(Err(HandleError::Cancelled)) => "cancelled",
            HandleState::Settled(Err(_)) => "failed",
            HandleState::Taken => "taken",
        };
        f.debug_struct("OperationHandle")
            .field("operation", &self.operation)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn test_settled_handle_reports_value() {
        let (settler, mut handle) = pending::<u32, String>("probe");
        assert!(!handle.is_finished());
        assert!(settler.settle(Ok(7)));
        assert!(handle.is_finished());
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn test_cancel_pending_handle() {
        let (settler, mut handle) = pending::<u32, String>("probe");
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        assert!(handle.is_finished());
        // The computation side still completes; its outcome goes nowhere.
        assert!(!settler.settle(Ok(1)));
        assert_eq!(handle.wait(), Err(HandleError::Cancelled));
    }

    #[test]
    fn test_cancel_after_settle_is_noop() {
        let (settler, mut handle) = pending::<u32, String>("probe");
        settler.settle(Err(HandleError::Failed("boom".to_string())));
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
        assert_eq!(handle.wait(), Err(HandleError::Failed("boom".to_string())));
    }

    #[test]
    fn test_dropped_settler_abandons() {
        let (settler, handle) = pending::<u32, String>("probe");
        drop(settler);
        assert_eq!(handle.wait(), Err(HandleError::Abandoned));
    }

    #[test]
    fn test_try_take_once() {
        let (settler, mut handle) = pending::<u32, String>("probe");
        assert!(handle.try_take().is_none());
        settler.settle(Ok(3));
        assert_eq!(handle.try_take(), Some(Ok(3)));
        assert_eq!(handle.try_take(), Some(Err(HandleError::Abandoned)));
    }

    #[tokio::test]
    async fn test_await_and_chain() {
        let (settler, handle) = pending::<u32, String>("probe");
        std::thread::spawn(move || {
            settler.settle(Ok(20));
        });
        let doubled = handle.map(|settled| settled.map(|v| v * 2)).await;
        assert_eq!(doubled, Ok(40));
    }

    #[test]
    fn test_outcome_conversions() {
        let ok: Outcome<u8, &str> = Ok(1).into();
        assert!(ok.is_success());
        let err: Outcome<u8, &str> = Err("no").into();
        assert_eq!(err.into_result(), Err("no"));
    }

    #[test]
    fn test_handle_error_display() {
        let err: HandleError<String> = HandleError::Failed("bad symbol".to_string());
        assert_eq!(err.to_string(), "operation failed: bad symbol");
        assert_eq!(err.failure().map(String::as_str), Some("bad symbol"));
    }
}
