//! Access point to a remote job dispatcher.

mod client;
pub mod error;

pub use client::RestGateway;

use crate::gateway::error::GatewayError;
use crate::job::{JobHandle, ParamSet, ResultTypeDescriptor};

/// The four calls the job lifecycle needs from a dispatcher.
///
/// Implementations are not assumed to be shareable between concurrent
/// lifecycles; each lifecycle owns its own gateway.
#[async_trait::async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Submits a job and returns the identifier the service assigned to it.
    async fn submit(
        &self,
        email: Option<&str>,
        title: &str,
        params: &ParamSet,
    ) -> Result<JobHandle, GatewayError>;

    /// Raw status string for a job, e.g. `RUNNING`.
    async fn status(&self, handle: &JobHandle) -> Result<String, GatewayError>;

    async fn result_types(
        &self,
        handle: &JobHandle,
    ) -> Result<Vec<ResultTypeDescriptor>, GatewayError>;

    async fn fetch_result(&self, handle: &JobHandle, type_id: &str)
    -> Result<Vec<u8>, GatewayError>;
}
