//! In-memory request registry

use async_trait::async_trait;
use dashmap::DashMap;

use ce_core::error::RegistryError;
use ce_core::traits::RequestRegistry;
use ce_protocol::{ConsultationRequest, RequestId, RequestStatus};

/// Registry kept in process memory; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    requests: DashMap<RequestId, ConsultationRequest>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `requests`
    pub fn with_requests(requests: impl IntoIterator<Item = ConsultationRequest>) -> Self {
        let registry = Self::new();
        for request in requests {
            registry.requests.insert(request.id, request);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl RequestRegistry for MemoryRegistry {
    async fn save(&self, request: &ConsultationRequest) -> Result<(), RegistryError> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn load(&self, id: &RequestId) -> Result<Option<ConsultationRequest>, RegistryError> {
        Ok(self.requests.get(id).map(|r| r.value().clone()))
    }

    async fn list_pending(&self) -> Result<Vec<ConsultationRequest>, RegistryError> {
        let mut pending: Vec<ConsultationRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}
