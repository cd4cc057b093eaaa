//! Non-blocking exchange clients built on the dual-pool bridge.
//!
//! [`AsyncRestClient`] returns a handle per call and takes an optional
//! callback; [`CallbackRestClient`] requires the callback and returns
//! nothing to wait on. Both wrap any blocking [`RestClient`].
//!
//! [`RestClient`]: execbridge_core::RestClient

pub mod async_client;
pub mod callback_client;
pub mod factory;
pub mod simulated;

pub use async_client::{ApiCallback, ApiHandle, ApiResult, AsyncRestClient};
pub use callback_client::{ApiOutcome, CallbackRestClient};
pub use factory::ClientFactory;
pub use simulated::{RecordedCall, SimulatedClientConfig, SimulatedRestClient};
