//! Admission stages installed on every served namespace
//!
//! - [`token_stage`]: HS256 token from the `token` query parameter, `sub`
//!   becomes the connection's user ID
//! - [`rate_limit_stage`]: per-IP GCRA limit on new connections

mod rate_limit;
mod token;

pub use rate_limit::{rate_limit_stage, IpRateLimiter};
pub use token::{token_stage, TOKEN_QUERY_PARAM};

use futures_util::future::BoxFuture;
use roomcast_core::{AdmissionContext, AdmissionResult, Next};

/// Stage closure accepted by [`AdmissionPipeline::use_stage`](roomcast_core::AdmissionPipeline::use_stage)
pub trait Stage:
    Fn(AdmissionContext, Next) -> BoxFuture<'static, AdmissionResult> + Send + Sync + 'static
{
}

impl<F> Stage for F where
    F: Fn(AdmissionContext, Next) -> BoxFuture<'static, AdmissionResult> + Send + Sync + 'static
{
}
