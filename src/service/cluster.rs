//! ClusterService gRPC implementation for joining nodes and operators.

use super::{MembershipReply, StatusReply};
use crate::membership::MembershipController;
use crate::proto::Payload;
use crate::proto::cluster_service_server::ClusterService;
use crate::types::NodeMeta;
use serde::Serialize;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// gRPC service implementation for membership requests.
///
/// This service handles:
/// - Join requests from starting nodes (add voter)
/// - Leave requests (remove server)
/// - Status queries
///
/// Guard rejections travel inside the reply rather than as a gRPC status, so
/// the caller can follow a leader hint.
pub struct ClusterServiceImpl {
    controller: Arc<MembershipController>,
}

impl ClusterServiceImpl {
    /// Create a new cluster service.
    pub fn new(controller: Arc<MembershipController>) -> Self {
        Self { controller }
    }
}

fn decode_node(request: Request<Payload>) -> Result<NodeMeta, Status> {
    let node: NodeMeta = request
        .into_inner()
        .decode_json()
        .map_err(|e| Status::invalid_argument(format!("Invalid node: {}", e)))?;

    if node.server_id.as_str().is_empty() || node.raft_addr.as_str().is_empty() {
        return Err(Status::invalid_argument("ServerID and RaftAddr are required"));
    }
    Ok(node)
}

fn encode<T: Serialize>(value: &T) -> Result<Response<Payload>, Status> {
    Payload::json(value)
        .map(Response::new)
        .map_err(|e| Status::internal(format!("Serialization error: {}", e)))
}

#[tonic::async_trait]
impl ClusterService for ClusterServiceImpl {
    async fn join(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let node = decode_node(request)?;
        tracing::info!(server_id = %node.server_id, addr = %node.raft_addr, "join request");

        let reply = MembershipReply::from(self.controller.add_voter(&node).await);
        encode(&reply)
    }

    async fn leave(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let node = decode_node(request)?;
        tracing::info!(server_id = %node.server_id, "leave request");

        let reply = MembershipReply::from(self.controller.remove_server(&node).await);
        encode(&reply)
    }

    async fn status(&self, _request: Request<Payload>) -> Result<Response<Payload>, Status> {
        encode(&StatusReply {
            node: self.controller.local().clone(),
            is_leader: self.controller.is_leader(),
            leader: self.controller.leader(),
            configuration: self.controller.configuration().ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::testing::FakeGroup;
    use crate::membership::{BroadcastQueue, ClusterEvent};

    fn service(group: &Arc<FakeGroup>) -> (ClusterServiceImpl, Arc<BroadcastQueue>) {
        let events = Arc::new(BroadcastQueue::new(16));
        let controller = MembershipController::new(
            NodeMeta::new("n1", "10.0.0.1:8300"),
            group.clone(),
            events.clone(),
        );
        (ClusterServiceImpl::new(Arc::new(controller)), events)
    }

    fn request(node: &NodeMeta) -> Request<Payload> {
        Request::new(Payload::json(node).expect("encode"))
    }

    async fn join(service: &ClusterServiceImpl, node: &NodeMeta) -> MembershipReply {
        service
            .join(request(node))
            .await
            .expect("join rpc")
            .into_inner()
            .decode_json()
            .expect("decode reply")
    }

    #[tokio::test]
    async fn test_join_then_repeat() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        let (service, events) = service(&group);
        let n2 = NodeMeta::new("n2", "10.0.0.2:8300");

        assert_eq!(join(&service, &n2).await, MembershipReply::Accepted);
        assert_eq!(join(&service, &n2).await, MembershipReply::AlreadyMember);

        assert_eq!(group.add_voter_calls(), 1);
        assert_eq!(
            events.drain(),
            vec![ClusterEvent::joined(n2.clone()), ClusterEvent::joined(n2)]
        );
    }

    #[tokio::test]
    async fn test_join_on_follower_returns_leader_hint() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        group.set_leader(false);
        let leader = NodeMeta::new("n3", "10.0.0.3:8300");
        group.set_leader_hint(Some(leader.clone()));
        let (service, events) = service(&group);

        let reply = join(&service, &NodeMeta::new("n2", "10.0.0.2:8300")).await;
        assert_eq!(
            reply,
            MembershipReply::NotLeader {
                leader: Some(leader)
            }
        );
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let group = Arc::new(FakeGroup::new());
        let (service, _) = service(&group);

        let status = service
            .join(Request::new(Payload {
                data: b"not json".to_vec(),
            }))
            .await
            .expect_err("invalid payload");
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = service
            .leave(request(&NodeMeta::new("", "10.0.0.2:8300")))
            .await
            .expect_err("missing id");
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_leave_and_status() {
        let group = Arc::new(
            FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300"), ("n2", "10.0.0.2:8300")]),
        );
        group.set_leader_hint(Some(NodeMeta::new("n1", "10.0.0.1:8300")));
        let (service, _) = service(&group);

        let reply: MembershipReply = service
            .leave(request(&NodeMeta::new("n2", "10.0.0.2:8300")))
            .await
            .expect("leave rpc")
            .into_inner()
            .decode_json()
            .expect("decode reply");
        assert_eq!(reply, MembershipReply::Accepted);

        let status: StatusReply = service
            .status(Request::new(Payload::default()))
            .await
            .expect("status rpc")
            .into_inner()
            .decode_json()
            .expect("decode status");
        assert!(status.is_leader);
        assert_eq!(status.node.server_id.as_str(), "n1");
        let configuration = status.configuration.expect("configuration");
        assert_eq!(configuration.voters().count(), 1);
    }
}
