//! Network client implementing OpenRaft's RaftNetwork trait.

use super::{TimeoutNowRequest, TimeoutNowResponse};
use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult, RPCError, RaftError};
use crate::proto::Payload;
use crate::proto::cluster_service_client::ClusterServiceClient;
use crate::proto::raft_service_client::RaftServiceClient;
use crate::types::{ClusterNodeId, NodeMeta, ServerAddress, TypeConfig};
use lru::LruCache;
use openraft::error::{InstallSnapshotError, NetworkError, RemoteError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tonic::Code;
use tonic::transport::{Channel, Endpoint};

/// Engine RPCs served by the peer's `RaftService`.
#[derive(Debug, Clone, Copy)]
enum RaftRpc {
    AppendEntries,
    Vote,
    InstallSnapshot,
    TimeoutNow,
}

/// Factory for connections to other members.
///
/// Channels are pooled per address. The pool is bounded and evicts the
/// least recently used channel; a channel is also dropped after any failed
/// call so the next call dials afresh.
#[derive(Clone)]
pub struct NetworkFactory {
    pool: Arc<Mutex<LruCache<ServerAddress, Channel>>>,
    timeout: Duration,
}

impl NetworkFactory {
    /// Create a factory pooling up to `max_pool` channels.
    pub fn new(max_pool: usize, timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_pool).unwrap_or(NonZeroUsize::MIN);
        Self {
            pool: Arc::new(Mutex::new(LruCache::new(capacity))),
            timeout,
        }
    }

    /// Create a factory from the transport section of the node configuration.
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.transport.max_pool, config.transport_timeout())
    }

    /// Number of pooled channels.
    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }

    async fn channel(&self, addr: &ServerAddress) -> ClusterResult<Channel> {
        if let Some(channel) = self.pool.lock().get(addr) {
            return Ok(channel.clone());
        }

        let channel = Endpoint::from_shared(format!("http://{}", addr))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await?;

        if let Some((evicted, _)) = self.pool.lock().push(addr.clone(), channel.clone()) {
            if &evicted != addr {
                tracing::trace!(addr = %evicted, "evicted pooled connection");
            }
        }
        Ok(channel)
    }

    fn evict(&self, addr: &ServerAddress) {
        self.pool.lock().pop(addr);
    }

    async fn call_raft(
        &self,
        addr: &ServerAddress,
        rpc: RaftRpc,
        payload: Payload,
    ) -> ClusterResult<Payload> {
        let mut client = RaftServiceClient::new(self.channel(addr).await?);

        let result = match rpc {
            RaftRpc::AppendEntries => client.append_entries(payload).await,
            RaftRpc::Vote => client.request_vote(payload).await,
            RaftRpc::InstallSnapshot => client.install_snapshot(payload).await,
            RaftRpc::TimeoutNow => client.timeout_now(payload).await,
        };

        match result {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                tracing::debug!(%addr, ?rpc, code = ?status.code(), "raft rpc failed");
                self.evict(addr);
                Err(ClusterError::Network(status))
            }
        }
    }

    /// Ask `target` to start an election immediately.
    pub async fn timeout_now(
        &self,
        target: &NodeMeta,
        request: &TimeoutNowRequest,
    ) -> ClusterResult<TimeoutNowResponse> {
        let reply = self
            .call_raft(&target.raft_addr, RaftRpc::TimeoutNow, Payload::json(request)?)
            .await?;
        Ok(reply.decode_json()?)
    }

    /// Client for the cluster service of the member at `addr`.
    ///
    /// Membership calls block until the change commits, so they get their
    /// own channel bounded by `call_timeout` instead of a pooled one.
    pub async fn cluster_client(
        &self,
        addr: &ServerAddress,
        call_timeout: Duration,
    ) -> ClusterResult<ClusterServiceClient<Channel>> {
        let channel = Endpoint::from_shared(format!("http://{}", addr))?
            .connect_timeout(self.timeout)
            .timeout(call_timeout)
            .connect()
            .await?;
        Ok(ClusterServiceClient::new(channel))
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: ClusterNodeId, node: &NodeMeta) -> Self::Network {
        NetworkConnection {
            target,
            node: node.clone(),
            factory: self.clone(),
        }
    }
}

/// A connection to a specific member.
pub struct NetworkConnection {
    target: ClusterNodeId,
    node: NodeMeta,
    factory: NetworkFactory,
}

impl NetworkConnection {
    async fn send<Req, Resp, E>(&self, rpc: RaftRpc, req: &Req) -> Result<Resp, RPCError<E>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        E: std::error::Error + Serialize + DeserializeOwned,
    {
        let payload = Payload::json(req).map_err(|e| to_network_error(&e))?;

        let reply = self
            .factory
            .call_raft(&self.node.raft_addr, rpc, payload)
            .await
            .map_err(|e| to_rpc_error(&e))?;

        let result: Result<Resp, RaftError<E>> =
            reply.decode_json().map_err(|e| to_network_error(&e))?;

        result.map_err(|e| {
            openraft::error::RPCError::RemoteError(RemoteError::new_with_node(
                self.target,
                self.node.clone(),
                e,
            ))
        })
    }
}

impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<ClusterNodeId>, RPCError> {
        self.send(RaftRpc::AppendEntries, &req).await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<ClusterNodeId>, RPCError<InstallSnapshotError>> {
        self.send(RaftRpc::InstallSnapshot, &req).await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<ClusterNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<ClusterNodeId>, RPCError> {
        self.send(RaftRpc::Vote, &req).await
    }
}

fn to_network_error<E: std::error::Error>(err: &(impl std::error::Error + 'static)) -> RPCError<E> {
    openraft::error::RPCError::Network(NetworkError::new(err))
}

/// Connection failures make the peer unreachable (the engine backs off);
/// anything else is a plain network error.
fn to_rpc_error<E: std::error::Error>(err: &ClusterError) -> RPCError<E> {
    let unreachable = match err {
        ClusterError::Transport(_) => true,
        ClusterError::Network(status) => {
            matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
        }
        _ => false,
    };

    if unreachable {
        openraft::error::RPCError::Unreachable(Unreachable::new(err))
    } else {
        openraft::error::RPCError::Network(NetworkError::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_peer() {
        let factory = NetworkFactory::new(2, Duration::from_millis(200));
        // Port 1 on localhost is not listening.
        let target = NodeMeta::new("ghost", "127.0.0.1:1");

        let result = factory
            .timeout_now(
                &target,
                &TimeoutNowRequest {
                    leader: NodeMeta::new("n1", "127.0.0.1:2"),
                    term: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(ClusterError::Transport(_))));
        assert_eq!(factory.pooled(), 0);

        let err: RPCError = to_rpc_error(&result.expect_err("unreachable"));
        assert!(matches!(err, openraft::error::RPCError::Unreachable(_)));
    }

    #[test]
    fn test_zero_pool_clamped() {
        let factory = NetworkFactory::new(0, Duration::from_millis(500));
        assert_eq!(factory.pool.lock().cap().get(), 1);
    }
}
