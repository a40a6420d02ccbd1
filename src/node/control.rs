// SPDX-License-Identifier: GPL-3.0-only

//! Control service
//!
//! Requests arrive on a tokio channel and each one is handled on a blocking
//! worker, so a stop can be served while a start is still blocked inside
//! its session.

use super::{NodeStatus, PublishReport, ReconstructionNode, RunSummary};
use crate::constants::topics::CONTROL_QUEUE_DEPTH;
use crate::errors::{NodeError, NodeResult, TransportError};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// `true` runs a session, `false` stops the running one
    Start { enable: bool },
    PublishMesh,
    Status,
}

#[derive(Debug, Clone)]
pub enum ControlResponse {
    RunFinished(RunSummary),
    StopAcknowledged,
    Published(PublishReport),
    Status(NodeStatus),
    Failed(NodeError),
}

type Envelope = (ControlRequest, oneshot::Sender<ControlResponse>);

/// Serves requests for one node
pub struct ControlServer {
    node: Arc<ReconstructionNode>,
    receiver: mpsc::Receiver<Envelope>,
}

impl ControlServer {
    pub fn new(node: Arc<ReconstructionNode>) -> (Self, ControlClient) {
        let (sender, receiver) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        (Self { node, receiver }, ControlClient { sender })
    }

    /// Run the server on the current runtime until every client is dropped
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }

    pub async fn serve(mut self) {
        info!("Control server ready");
        while let Some((request, reply)) = self.receiver.recv().await {
            debug!(request = ?request, "Control request");
            let node = Arc::clone(&self.node);
            tokio::spawn(async move {
                let response = tokio::task::spawn_blocking(move || handle(&node, request))
                    .await
                    .unwrap_or_else(|e| {
                        ControlResponse::Failed(NodeError::Internal(format!(
                            "Task join error: {}",
                            e
                        )))
                    });
                if reply.send(response).is_err() {
                    debug!(request = ?request, "Caller went away before the reply");
                }
            });
        }
        info!("Control server stopped");
    }
}

fn handle(node: &ReconstructionNode, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::Start { enable } => node.start(enable).map(|summary| match summary {
            Some(summary) => ControlResponse::RunFinished(summary),
            None => ControlResponse::StopAcknowledged,
        }),
        ControlRequest::PublishMesh => node.publish_mesh().map(ControlResponse::Published),
        ControlRequest::Status => Ok(ControlResponse::Status(node.status())),
    };
    result.unwrap_or_else(|e| {
        warn!(request = ?request, error = %e, "Control request failed");
        ControlResponse::Failed(e)
    })
}

/// Handle for issuing control requests
#[derive(Debug, Clone)]
pub struct ControlClient {
    sender: mpsc::Sender<Envelope>,
}

impl ControlClient {
    /// Send a request and wait for its reply; failures come back as `Err`
    pub async fn request(&self, request: ControlRequest) -> NodeResult<ControlResponse> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| TransportError::ServiceUnavailable)?;
        match response
            .await
            .map_err(|_| TransportError::ServiceUnavailable)?
        {
            ControlResponse::Failed(e) => Err(e),
            other => Ok(other),
        }
    }

    pub async fn start(&self, enable: bool) -> NodeResult<ControlResponse> {
        self.request(ControlRequest::Start { enable }).await
    }

    pub async fn publish_mesh(&self) -> NodeResult<ControlResponse> {
        self.request(ControlRequest::PublishMesh).await
    }

    pub async fn status(&self) -> NodeResult<NodeStatus> {
        status_from(self.request(ControlRequest::Status).await?)
    }
}

fn status_from(response: ControlResponse) -> NodeResult<NodeStatus> {
    match response {
        ControlResponse::Status(status) => Ok(status),
        other => Err(NodeError::Internal(format!(
            "Unexpected reply to status: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::source::{SourceRequest, SourceResolver};
    use crate::config::NodeConfig;
    use crate::engine::DepthGridFactory;
    use crate::node::LifecycleState;

    fn client() -> ControlClient {
        let node = ReconstructionNode::new(
            NodeConfig::default(),
            SourceRequest::default(),
            Arc::new(DepthGridFactory),
        )
        .with_resolver(SourceResolver::new(Vec::new()));
        let (server, client) = ControlServer::new(Arc::new(node));
        server.spawn();
        client
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let status = client().status().await.unwrap();
        assert_eq!(status.state, LifecycleState::Idle);
        assert!(!status.engine_present);
    }

    #[tokio::test]
    async fn test_stop_while_idle_acknowledged() {
        let response = client().start(false).await.unwrap();
        assert!(matches!(response, ControlResponse::StopAcknowledged));
    }

    #[tokio::test]
    async fn test_publish_error_reaches_caller() {
        let result = client().publish_mesh().await;
        assert!(matches!(result, Err(NodeError::NoActiveReconstruction)));
    }

    #[test]
    fn test_mismatched_status_reply_is_internal() {
        let result = status_from(ControlResponse::StopAcknowledged);
        assert!(matches!(result, Err(NodeError::Internal(_))));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .starts_with("Internal error: Unexpected reply to status")
        );
    }

    #[tokio::test]
    async fn test_closed_server_is_unavailable() {
        let node = ReconstructionNode::new(
            NodeConfig::default(),
            SourceRequest::default(),
            Arc::new(DepthGridFactory),
        );
        let (server, client) = ControlServer::new(Arc::new(node));
        drop(server);
        assert!(matches!(
            client.status().await,
            Err(NodeError::Transport(TransportError::ServiceUnavailable))
        ));
    }
}
