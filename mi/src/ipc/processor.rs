//! Request-processing capability consumed by session workers

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::endpoint::EndpointName;

/// Connection handle passed to the processor alongside each request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Unique per accepted connection
    pub id: Uuid,
    /// Endpoint the connection arrived on
    pub endpoint: EndpointName,
}

impl SessionInfo {
    pub fn new(endpoint: EndpointName) -> Self {
        Self {
            id: Uuid::now_v7(),
            endpoint,
        }
    }
}

/// Turns one raw request into one reply payload
///
/// Implementations must be total: application errors are encoded inside the
/// returned payload. The processor is shared by every concurrent session
/// worker and owns its own synchronization.
#[async_trait]
pub trait RequestProcessor: Send + Sync + 'static {
    async fn process(&self, session: &SessionInfo, request: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let name = EndpointName::new("TestPipe");
        let a = SessionInfo::new(name.clone());
        let b = SessionInfo::new(name);
        assert_ne!(a.id, b.id);
        assert_eq!(a.endpoint, b.endpoint);
    }
}
