//! Transport-agnostic core: contracts, contexts, ports and use-cases.
//!
//! Nothing in this module knows which ingress delivered an event or which
//! driver backs a capability. Inbound adapters build a context and call a
//! contract; use-cases reach infrastructure only through [`ports`].
//!
//! Public surface:
//! - [`Error`] / [`ErrorCode`]: failure taxonomy with HTTP status mapping.
//! - [`Response`], [`MiddlewareOutcome`], [`AsyncResult`]: result shapes.
//! - [`RequestContext`], [`MessageContext`], [`JobContext`]: per-event
//!   envelopes sharing the [`Envelope`] boundary.
//! - [`UseCase`], [`Consumer`], [`JobHandler`]: the three contracts.

pub mod context;
pub mod error;
pub mod ports;
pub mod response;
pub mod usecase;
pub mod usecases;

pub use self::context::{
    CallContext, Envelope, InboundRequest, Interrupted, JobContext, MessageContext,
    RequestContext,
};
pub use self::error::{Error, ErrorCode, INTERNAL_ERROR_MESSAGE};
pub use self::response::{AsyncResult, MiddlewareOutcome, Response};
pub use self::usecase::{Consumer, JobError, JobHandler, UseCase};

/// Convenient result alias for domain operations.
///
/// # Examples
/// ```
/// use skeleton::domain::{Error, DomainResult};
///
/// fn lookup() -> DomainResult<u32> {
///     Err(Error::not_found("nope"))
/// }
/// assert!(lookup().is_err());
/// ```
pub type DomainResult<T> = Result<T, Error>;
