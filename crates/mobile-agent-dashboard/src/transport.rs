use async_trait::async_trait;
use mobile_agent_client::{ClientError, MobileAgentClient, StopTaskResponse, TaskEventStream};

/// The backend calls the dashboard controller depends on.
#[async_trait]
pub trait DashboardTransport: Send + Sync {
    async fn ping(&self) -> Result<(), ClientError>;

    async fn execute_task(&self, instruction: &str) -> Result<TaskEventStream, ClientError>;

    async fn stop_task(&self) -> Result<StopTaskResponse, ClientError>;

    async fn latest_screenshot(&self) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl DashboardTransport for MobileAgentClient {
    async fn ping(&self) -> Result<(), ClientError> {
        MobileAgentClient::ping(self).await
    }

    async fn execute_task(&self, instruction: &str) -> Result<TaskEventStream, ClientError> {
        MobileAgentClient::execute_task(self, instruction).await
    }

    async fn stop_task(&self) -> Result<StopTaskResponse, ClientError> {
        MobileAgentClient::stop_task(self).await
    }

    async fn latest_screenshot(&self) -> Result<Vec<u8>, ClientError> {
        MobileAgentClient::latest_screenshot(self).await
    }
}
