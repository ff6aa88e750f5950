//! ClusterNode - the main entry point for running a member.

use super::group::RaftGroup;
use crate::command::{Command, CommandResponse};
use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::membership::{BroadcastQueue, ConsensusGroup, MembershipController};
use crate::network::{NetworkFactory, RaftServer, Transport};
use crate::proto::Payload;
use crate::proto::cluster_service_server::ClusterServiceServer;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::service::{ClusterServiceImpl, MembershipReply};
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::state::StateMachine;
use crate::store::Stores;
use crate::types::{ClusterConfiguration, NodeMeta, ServerAddress};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Server;

/// A running member of a raftkeeper cluster.
///
/// Starting a node opens its stores, binds the transport, starts the engine
/// and the gRPC server, then either bootstraps a new cluster or joins an
/// existing one through `join_addr`.
pub struct ClusterNode {
    local: NodeMeta,
    listen_addr: SocketAddr,
    group: Arc<RaftGroup>,
    controller: Arc<MembershipController>,
    events: Arc<BroadcastQueue>,
    network: NetworkFactory,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl ClusterNode {
    /// Start a node driving `machine`.
    ///
    /// Every failure here is fatal: the node is torn down and the error
    /// returned without retry.
    pub async fn start(config: NodeConfig, machine: Box<dyn StateMachine>) -> ClusterResult<Self> {
        config.validate().map_err(ClusterError::Config)?;

        let stores = Stores::open(&config)?;
        let existing_state = stores.has_existing_state()?;

        let transport = Transport::bind(&config).await?;
        let listen_addr = transport.local_addr();
        let local = config.node_meta(transport.advertise_address().clone());

        let network = NetworkFactory::from_config(&config);
        let group = Arc::new(
            RaftGroup::start(&config, local.clone(), stores, machine, network.clone()).await?,
        );

        let events = Arc::new(BroadcastQueue::new(config.membership.event_queue_capacity));
        let controller = Arc::new(
            MembershipController::new(local.clone(), group.clone(), events.clone())
                .with_timeouts(config.add_voter_timeout(), config.remove_server_timeout()),
        );

        // Serve both services before bootstrap or join: a joining node must
        // already accept replication when the leader adds it.
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let raft_server = RaftServer::new(local.node_id(), group.raft().clone());
        let cluster_server = ClusterServiceImpl::new(controller.clone());

        let server = tokio::spawn(async move {
            Server::builder()
                .add_service(RaftServiceServer::new(raft_server))
                .add_service(ClusterServiceServer::new(cluster_server))
                .serve_with_incoming_shutdown(transport.into_incoming(), async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(
            server_id = %local.server_id,
            addr = %local.raft_addr,
            listen = %listen_addr,
            "cluster node started"
        );

        let mut node = Self {
            local,
            listen_addr,
            group,
            controller,
            events,
            network,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        };

        if let Err(e) = node.enter_cluster(&config, existing_state).await {
            tracing::error!(error = %e, "failed to enter cluster, stopping node");
            node.stop().await;
            return Err(e);
        }

        Ok(node)
    }

    async fn enter_cluster(&self, config: &NodeConfig, existing_state: bool) -> ClusterResult<()> {
        match config.join_target() {
            Some(target) => {
                self.join_cluster(ServerAddress::from(target), config).await?;
                self.controller.mark_active();
            }
            None if existing_state => {
                tracing::info!("existing raft state found, skipping bootstrap");
                self.controller.mark_active();
            }
            None => self.controller.bootstrap().await?,
        }
        Ok(())
    }

    /// Ask the member at `target` to add this node as a voter.
    ///
    /// Follows leader hints and retries transport failures up to the
    /// configured number of attempts.
    async fn join_cluster(&self, mut target: ServerAddress, config: &NodeConfig) -> ClusterResult<()> {
        let attempts = config.membership.join_attempts.max(1);
        let call_timeout = config.add_voter_timeout() + config.transport_timeout();
        let request = Payload::json(&self.local)?;
        let mut last_error = ClusterError::NotInitialized;

        for attempt in 1..=attempts {
            tracing::info!(%target, attempt, "requesting to join cluster");

            match self.send_join(&target, request.clone(), call_timeout).await {
                Ok(MembershipReply::Accepted) => {
                    tracing::info!(%target, "joined cluster");
                    return Ok(());
                }
                Ok(MembershipReply::AlreadyMember) => {
                    tracing::info!(%target, "already a member of the cluster");
                    return Ok(());
                }
                Ok(MembershipReply::NotLeader { leader }) => {
                    last_error = ClusterError::NotLeader {
                        leader: leader.clone(),
                    };
                    if let Some(leader) = leader {
                        if leader.raft_addr != target {
                            tracing::debug!(leader = %leader, "redirected to leader");
                            target = leader.raft_addr;
                            continue;
                        }
                    }
                }
                Ok(MembershipReply::Failed { error, .. }) => {
                    tracing::warn!(%target, %error, "join rejected");
                    last_error = ClusterError::Membership(error);
                }
                Err(e) => {
                    tracing::warn!(%target, error = %e, "join request failed");
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(config.join_retry_interval()).await;
            }
        }

        Err(last_error)
    }

    async fn send_join(
        &self,
        target: &ServerAddress,
        request: Payload,
        call_timeout: Duration,
    ) -> ClusterResult<MembershipReply> {
        let mut client = self.network.cluster_client(target, call_timeout).await?;
        let reply = client.join(request).await?.into_inner();
        Ok(reply.decode_json()?)
    }

    /// This node's identity as advertised to peers.
    pub fn local(&self) -> &NodeMeta {
        &self.local
    }

    /// The socket the transport is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The membership controller.
    pub fn controller(&self) -> &Arc<MembershipController> {
        &self.controller
    }

    /// The consensus group handle.
    pub fn group(&self) -> &Arc<RaftGroup> {
        &self.group
    }

    /// Membership events published by this node.
    pub fn events(&self) -> &Arc<BroadcastQueue> {
        &self.events
    }

    /// Check if this node is the leader.
    pub fn is_leader(&self) -> bool {
        self.group.is_leader()
    }

    /// The current leader, if known.
    pub fn leader(&self) -> Option<NodeMeta> {
        self.group.leader()
    }

    /// The latest membership configuration.
    pub fn configuration(&self) -> ClusterResult<ClusterConfiguration> {
        self.group.current_configuration()
    }

    /// Propose an application command; must be called on the leader.
    pub async fn apply(&self, command: Command, timeout: Duration) -> ClusterResult<CommandResponse> {
        self.group.apply(command, timeout).await
    }

    /// Shutdown the node gracefully.
    ///
    /// A leader first hands leadership to another voter. If that fails the
    /// error is returned and the node keeps running.
    pub async fn shutdown(&mut self) -> ClusterResult<ShutdownOutcome> {
        let outcome = ShutdownCoordinator::new(self.group.clone()).run().await?;
        self.stop().await;
        tracing::info!(server_id = %self.local.server_id, ?outcome, "cluster node shutdown");
        Ok(outcome)
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            match server.await {
                Ok(Err(e)) => tracing::warn!(error = %e, "raft server exited with error"),
                Err(e) => tracing::warn!(error = %e, "raft server task failed"),
                Ok(Ok(())) => {}
            }
        }
        if let Err(e) = self.group.shutdown().await {
            tracing::warn!(error = %e, "engine shutdown failed");
        }
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
