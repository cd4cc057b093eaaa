use crate::handle::{self, Callback, HandleError, OperationHandle, Outcome};
use crate::pool::{Executor, Rejected};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Errors surfaced synchronously by [`Bridge::invoke`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("request pool rejected `{operation}`: {source}")]
    RequestRejected {
        operation: &'static str,
        #[source]
        source: Rejected,
    },
}

#[derive(Debug, Default)]
struct BridgeStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub notifications_delivered: u64,
    /// Notifications the response pool refused; their callbacks never ran.
    pub notifications_dropped: u64,
}

/// Runs blocking computations on a request pool and delivers their outcomes
/// to callbacks on a separate response pool.
///
/// Both pools are owned by the caller. Cloning a bridge shares its pools and
/// counters.
#[derive(Clone)]
pub struct Bridge {
    request: Arc<dyn Executor>,
    response: Arc<dyn Executor>,
    stats: Arc<BridgeStats>,
}

impl Bridge {
    pub fn new(request: Arc<dyn Executor>, response: Arc<dyn Executor>) -> Self {
        Self {
            request,
            response,
            stats: Arc::new(BridgeStats::default()),
        }
    }

    pub fn request_pool(&self) -> &Arc<dyn Executor> {
        &self.request
    }

    pub fn response_pool(&self) -> &Arc<dyn Executor> {
        &self.response
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        let s = &self.stats;
        BridgeStatsSnapshot {
            submitted: s.submitted.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            panicked: s.panicked.load(Ordering::Relaxed),
            notifications_delivered: s.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: s.notifications_dropped.load(Ordering::Relaxed),
        }
    }

    /// Run `computation` on the request pool and return a handle to its outcome.
    ///
    /// Once the computation returns, a notification carrying the outcome is
    /// submitted to the response pool (when `callback` is set) and then the
    /// handle settles. The handle never waits on the response pool. If the
    /// response pool refuses the notification, the callback is dropped
    /// uncalled and the drop is logged and counted.
    ///
    /// Returns immediately. Fails only if the request pool refuses the task,
    /// in which case the callback is dropped uncalled.
    pub fn invoke<T, E, F>(
        &self,
        operation: &'static str,
        computation: F,
        callback: Option<Callback<T, E>>,
    ) -> Result<OperationHandle<T, E>, BridgeError>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (settler, handle) = handle::pending(operation);
        let response = Arc::clone(&self.response);
        let stats = Arc::clone(&self.stats);

        let task = Box::new(move || {
            let settlement = match panic::catch_unwind(AssertUnwindSafe(computation)) {
                Ok(result) => {
                    let counter = if result.is_ok() {
                        &stats.succeeded
                    } else {
                        &stats.failed
                    };
                    counter.fetch_add(1, Ordering::Relaxed);

                    if let Some(callback) = callback {
                        notify(&response, &stats, operation, callback, Outcome::from(result.clone()));
                    }
                    result.map_err(HandleError::Failed)
                }
                Err(payload) => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    let message = panic_message(payload.as_ref());
                    error!(operation, panic = %message, "Blocking computation panicked");
                    Err(HandleError::Panicked(message))
                }
            };

            let ok = settlement.is_ok();
            if !settler.settle(settlement) {
                debug!(operation, "Handle dropped before settlement");
            } else {
                debug!(operation, ok, "Handle settled");
            }
        });

        self.request
            .execute(task)
            .map_err(|source| BridgeError::RequestRejected { operation, source })?;

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(operation, pool = self.request.name(), "Computation submitted");
        Ok(handle)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("request", &self.request.name())
            .field("response", &self.response.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Hand `outcome` to `callback` on the response pool.
fn notify<T, E>(
    response: &Arc<dyn Executor>,
    stats: &Arc<BridgeStats>,
    operation: &'static str,
    callback: Callback<T, E>,
    outcome: Outcome<T, E>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    let delivered = Arc::clone(stats);
    let task = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(move || callback.on_outcome(outcome)));
        delivered
            .notifications_delivered
            .fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = result {
            error!(
                operation,
                panic = %panic_message(payload.as_ref()),
                "Callback panicked"
            );
        }
    });

    if let Err(rejected) = response.execute(task) {
        stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            operation,
            pool = response.name(),
            reason = %rejected,
            "Response pool rejected notification; callback dropped"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::callback;
    use crate::pool::{InlineExecutor, WorkerPool};
    use crate::PoolConfig;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Fault {
        SymbolNotFound(String),
    }

    fn pools(request: usize, response: usize) -> (Arc<WorkerPool>, Arc<WorkerPool>, Bridge) {
        let req = Arc::new(WorkerPool::with_workers("req", request).unwrap());
        let resp = Arc::new(WorkerPool::with_workers("resp", response).unwrap());
        let bridge = Bridge::new(req.clone(), resp.clone());
        (req, resp, bridge)
    }

    fn current_thread_name() -> String {
        thread::current().name().unwrap_or("").to_string()
    }

    #[test]
    fn test_success_reaches_callback_on_response_pool() {
        let (_req, _resp, bridge) = pools(2, 1);
        let (tx, rx) = mpsc::channel();

        let handle = bridge
            .invoke(
                "ping",
                || Ok::<_, Fault>(current_thread_name()),
                Some(callback(move |outcome: Outcome<String, Fault>| {
                    tx.send((outcome, current_thread_name())).unwrap();
                })),
            )
            .unwrap();

        let (outcome, callback_thread) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(callback_thread, "resp-worker");
        assert_eq!(outcome, Outcome::Success("req-worker".to_string()));
        assert_eq!(handle.wait(), Ok("req-worker".to_string()));
    }

    #[test]
    fn test_fault_is_delivered_unmodified() {
        let (_req, _resp, bridge) = pools(1, 1);
        let fault = Fault::SymbolNotFound("NOPE".to_string());
        let expected = fault.clone();
        let (tx, rx) = mpsc::channel();

        let handle = bridge
            .invoke(
                "price",
                move || Err::<u64, _>(fault),
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Outcome::Failure(expected.clone()));
        assert_eq!(handle.wait(), Err(HandleError::Failed(expected)));
    }

    #[test]
    fn test_handle_settles_without_callback() {
        let (_req, _resp, bridge) = pools(1, 1);
        let handle = bridge.invoke("time", || Ok::<_, Fault>(42u64), None).unwrap();
        assert_eq!(handle.wait(), Ok(42));

        let stats = bridge.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.notifications_delivered, 0);
    }

    #[test]
    fn test_invoke_does_not_block_caller() {
        let (_req, _resp, bridge) = pools(1, 1);
        let delay = Duration::from_millis(300);

        let started = Instant::now();
        let handle = bridge
            .invoke(
                "slow",
                move || {
                    thread::sleep(delay);
                    Ok::<_, Fault>(())
                },
                None,
            )
            .unwrap();
        assert!(started.elapsed() < delay);

        assert_eq!(handle.wait(), Ok(()));
        assert!(started.elapsed() >= delay);
    }

    #[test]
    fn test_concurrent_invocations_each_delivered_once() {
        for (request, response) in [(1, 1), (1, 4), (4, 1), (3, 2)] {
            let (_req, _resp, bridge) = pools(request, response);
            let count = 40;
            let (tx, rx) = mpsc::channel();

            let handles: Vec<_> = (0..count)
                .map(|i| {
                    let tx = tx.clone();
                    bridge
                        .invoke(
                            "stress",
                            move || {
                                thread::sleep(Duration::from_millis(2));
                                Ok::<_, Fault>(i)
                            },
                            Some(callback(move |outcome: Outcome<usize, Fault>| {
                                tx.send((outcome, current_thread_name())).unwrap();
                            })),
                        )
                        .unwrap()
                })
                .collect();
            drop(tx);

            let mut seen = HashSet::new();
            for _ in 0..count {
                let (outcome, thread_name) = rx.recv_timeout(TIMEOUT).unwrap();
                assert_eq!(thread_name, "resp-worker");
                match outcome {
                    Outcome::Success(i) => assert!(seen.insert(i), "duplicate delivery of {i}"),
                    Outcome::Failure(f) => panic!("unexpected failure {f:?}"),
                }
            }
            assert_eq!(seen.len(), count);

            for (i, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.wait(), Ok(i));
            }

            // Every sender is gone once all callbacks ran: nothing else can arrive.
            assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        }
    }

    #[test]
    fn test_rejected_notification_is_dropped_and_counted() {
        let req = Arc::new(WorkerPool::with_workers("req", 1).unwrap());
        let resp = Arc::new(
            WorkerPool::new(&PoolConfig {
                name: "resp".to_string(),
                workers: 1,
                queue_capacity: Some(1),
            })
            .unwrap(),
        );
        let bridge = Bridge::new(req.clone(), resp.clone());

        // Occupy the only response slot.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        resp.execute(Box::new(move || {
            release_rx.recv().ok();
        }))
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = bridge
            .invoke(
                "account",
                || Ok::<_, Fault>("snapshot"),
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap();

        // Settlement does not depend on the saturated response pool.
        assert_eq!(handle.wait(), Ok("snapshot"));
        assert_eq!(bridge.stats().notifications_dropped, 1);

        release_tx.send(()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_shut_down_request_pool_rejects_invoke() {
        let (req, _resp, bridge) = pools(1, 1);
        req.shutdown();

        let (tx, rx) = mpsc::channel::<Outcome<(), Fault>>();
        let err = bridge
            .invoke(
                "ping",
                || Ok::<_, Fault>(()),
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::RequestRejected {
                operation: "ping",
                source: Rejected::Shutdown { .. }
            }
        ));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(bridge.stats().submitted, 0);
    }

    #[test]
    fn test_cancelled_handle_still_notifies() {
        let (_req, _resp, bridge) = pools(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();

        let mut handle = bridge
            .invoke(
                "order",
                move || {
                    gate_rx.recv().ok();
                    Ok::<_, Fault>(5)
                },
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap();

        assert!(handle.cancel());
        gate_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Outcome::Success(5));
        assert_eq!(handle.wait(), Err(HandleError::Cancelled));
    }

    #[test]
    fn test_panicking_computation_settles_panicked() {
        let (_req, _resp, bridge) = pools(1, 1);
        let (tx, rx) = mpsc::channel::<Outcome<u8, Fault>>();

        let handle = bridge
            .invoke(
                "broken",
                || -> Result<u8, Fault> { panic!("decoder exploded") },
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap();

        assert_eq!(
            handle.wait(),
            Err(HandleError::Panicked("decoder exploded".to_string()))
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(bridge.stats().panicked, 1);
    }

    #[test]
    fn test_inline_pools_are_deterministic() {
        let bridge = Bridge::new(
            Arc::new(InlineExecutor::new("req")),
            Arc::new(InlineExecutor::new("resp")),
        );
        let (tx, rx) = mpsc::channel();
        let mut handle = bridge
            .invoke(
                "ping",
                || Ok::<_, Fault>(()),
                Some(callback(move |outcome| tx.send(outcome).unwrap())),
            )
            .unwrap();

        // Everything already ran on this thread.
        assert!(handle.is_finished());
        assert_eq!(rx.try_recv().unwrap(), Outcome::Success(()));
        assert_eq!(bridge.stats().notifications_delivered, 1);
    }

    #[tokio::test]
    async fn test_handle_can_be_awaited() {
        let (_req, _resp, bridge) = pools(2, 1);
        let a = bridge.invoke("a", || Ok::<_, Fault>(1), None).unwrap();
        let b = bridge.invoke("b", || Ok::<_, Fault>(2), None).unwrap();
        assert_eq!(a.await.unwrap() + b.await.unwrap(), 3);
    }
}
