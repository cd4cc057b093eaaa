//! Dual-pool execution bridge.
//!
//! A [`Bridge`] turns a blocking computation into an [`OperationHandle`]
//! plus an optional [`Callback`]: the computation runs on a caller-owned
//! request pool, the callback runs on a caller-owned response pool, and the
//! handle settles without waiting for the callback.

pub mod bridge;
pub mod config;
pub mod handle;
pub mod pool;

pub use bridge::{Bridge, BridgeError, BridgeStatsSnapshot};
pub use config::{BridgeConfig, ConfigError, PoolConfig};
pub use handle::{
    callback, Callback, HandleError, OperationHandle, Outcome, OutcomeHandler, Settlement,
};
pub use pool::{Executor, InlineExecutor, PoolError, Rejected, Task, WorkerPool};
