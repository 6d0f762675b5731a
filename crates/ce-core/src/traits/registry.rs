//! Request persistence

use async_trait::async_trait;

use ce_protocol::{ConsultationRequest, RequestId};

use crate::error::RegistryError;

/// Authoritative store of consultation requests.
///
/// Only the coordinator writes to it. `save` is an upsert; a request is
/// considered durably recorded once `save` returns.
#[async_trait]
pub trait RequestRegistry: Send + Sync {
    /// Insert or replace a request
    async fn save(&self, request: &ConsultationRequest) -> Result<(), RegistryError>;

    /// Look up a request by id
    async fn load(&self, id: &RequestId) -> Result<Option<ConsultationRequest>, RegistryError>;

    /// Every request still in `Pending`
    async fn list_pending(&self) -> Result<Vec<ConsultationRequest>, RegistryError>;
}
