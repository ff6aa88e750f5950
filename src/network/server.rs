//! gRPC server for handling Raft RPC requests.

use super::{TimeoutNowRequest, TimeoutNowResponse};
use crate::proto::Payload;
use crate::proto::raft_service_server::RaftService;
use crate::types::{ClusterNodeId, ClusterRaft, TypeConfig};
use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use serde::Serialize;
use tonic::{Request, Response, Status};

/// gRPC server implementation for Raft RPC.
///
/// Engine results, including engine errors, are returned JSON-encoded so the
/// caller can tell a remote rejection from a transport failure.
pub struct RaftServer {
    node_id: ClusterNodeId,
    raft: ClusterRaft,
}

impl RaftServer {
    /// Create a new Raft server.
    pub fn new(node_id: ClusterNodeId, raft: ClusterRaft) -> Self {
        Self { node_id, raft }
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: Request<Payload>) -> Result<T, Status> {
    request
        .into_inner()
        .decode_json()
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Response<Payload>, Status> {
    Payload::json(value)
        .map(Response::new)
        .map_err(|e| Status::internal(e.to_string()))
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn append_entries(
        &self,
        request: Request<Payload>,
    ) -> Result<Response<Payload>, Status> {
        let req: AppendEntriesRequest<TypeConfig> = decode(request)?;
        encode(&self.raft.append_entries(req).await)
    }

    async fn request_vote(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let req: VoteRequest<ClusterNodeId> = decode(request)?;
        encode(&self.raft.vote(req).await)
    }

    async fn install_snapshot(
        &self,
        request: Request<Payload>,
    ) -> Result<Response<Payload>, Status> {
        let req: InstallSnapshotRequest<TypeConfig> = decode(request)?;
        encode(&self.raft.install_snapshot(req).await)
    }

    async fn timeout_now(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let req: TimeoutNowRequest = decode(request)?;

        let is_voter = self
            .raft
            .metrics()
            .borrow()
            .membership_config
            .membership()
            .voter_ids()
            .any(|id| id == self.node_id);

        if !is_voter {
            tracing::warn!(leader = %req.leader, "ignoring timeout-now, not a voter");
            return encode(&TimeoutNowResponse { accepted: false });
        }

        tracing::info!(leader = %req.leader, term = req.term, "timeout-now received, starting election");
        self.raft
            .trigger()
            .elect()
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        encode(&TimeoutNowResponse { accepted: true })
    }
}
