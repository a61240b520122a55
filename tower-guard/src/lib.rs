//! # Tower Guard
//!
//! `tower-guard` puts the [`shot_guard`] flow control and circuit breaking
//! engine in front of any [Tower](https://github.com/tower-rs/tower) service.
//!
//! Every request becomes an entry of one resource, inside its own context.
//! The entry is held by the response future, so the response time, thread
//! count and any inner error are recorded when the inner service answers
//! (or when the future is dropped).
//!
//! ## The Managed Stack
//! [`ManagedGuardLayer`] is a pre-composed stack for production use:
//!
//! 1. **Blocking**: Requests rejected by a flow, degrade or system rule fail
//!    immediately with `ServiceError::Blocked`, without reaching the inner service.
//! 2. **Timeouts**: The whole call is bounded by a deadline, failing with
//!    `ServiceError::Timeout` when it is exceeded.
//! 3. **Error Mapping**: Internal Tower errors (like `tower::timeout::error::Elapsed`)
//!    and inner service errors are converted into a unified, cloneable [`ServiceError`].
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ServiceError`], allowing automatic conversion
//!   to HTTP status codes (429, 503, 408, 500).

mod error;
mod layer;
mod managed_layer;
mod service;
mod utils;


pub use error::ServiceError;
pub use layer::GuardLayer;
pub use managed_layer::ManagedGuardLayer;
pub use service::GuardService;
pub use service::NoOrigin;
pub use service::OriginParser;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
pub use utils::make_guarded_svc;
