//! In-memory consensus group for unit tests.

use super::ConsensusGroup;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{ClusterConfiguration, ClusterServer, NodeMeta, ServerAddress, ServerId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Records calls and applies membership changes to a plain configuration.
pub(crate) struct FakeGroup {
    leader: AtomicBool,
    leader_hint: Mutex<Option<NodeMeta>>,
    configuration: Mutex<Option<ClusterConfiguration>>,
    fail_next: Mutex<Option<ClusterError>>,
    transfer_failure: Mutex<Option<ClusterError>>,
    add_voter_calls: AtomicUsize,
    bootstrap_calls: AtomicUsize,
    transfer_calls: AtomicUsize,
}

impl FakeGroup {
    pub(crate) fn new() -> Self {
        Self {
            leader: AtomicBool::new(true),
            leader_hint: Mutex::new(None),
            configuration: Mutex::new(None),
            fail_next: Mutex::new(None),
            transfer_failure: Mutex::new(None),
            add_voter_calls: AtomicUsize::new(0),
            bootstrap_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_voters(self, voters: &[(&str, &str)]) -> Self {
        *self.configuration.lock() = Some(ClusterConfiguration {
            index: 1,
            servers: voters
                .iter()
                .map(|(id, addr)| ClusterServer::voter(*id, *addr))
                .collect(),
        });
        self
    }

    pub(crate) fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    pub(crate) fn set_leader_hint(&self, hint: Option<NodeMeta>) {
        *self.leader_hint.lock() = hint;
    }

    pub(crate) fn fail_next(&self, err: ClusterError) {
        *self.fail_next.lock() = Some(err);
    }

    pub(crate) fn fail_transfers(&self) {
        self.fail_next_transfer(ClusterError::LeadershipTransfer(
            "target did not take over".into(),
        ));
    }

    pub(crate) fn fail_next_transfer(&self, err: ClusterError) {
        *self.transfer_failure.lock() = Some(err);
    }

    pub(crate) fn add_voter_calls(&self) -> usize {
        self.add_voter_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn bootstrap_calls(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn transfer_calls(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> ClusterResult<()> {
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_prev_index(config: &ClusterConfiguration, prev_index: u64) -> ClusterResult<()> {
        if prev_index != 0 && prev_index != config.index {
            return Err(ClusterError::StaleConfiguration {
                expected: prev_index,
                current: config.index,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConsensusGroup for FakeGroup {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn leader(&self) -> Option<NodeMeta> {
        self.leader_hint.lock().clone()
    }

    fn current_configuration(&self) -> ClusterResult<ClusterConfiguration> {
        self.configuration
            .lock()
            .clone()
            .ok_or(ClusterError::NotInitialized)
    }

    async fn add_voter(
        &self,
        id: &ServerId,
        address: &ServerAddress,
        prev_index: u64,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        self.take_failure()?;
        self.add_voter_calls.fetch_add(1, Ordering::SeqCst);

        let mut guard = self.configuration.lock();
        let config = guard.as_mut().ok_or(ClusterError::NotInitialized)?;
        Self::check_prev_index(config, prev_index)?;

        config.servers.retain(|s| &s.id != id);
        config
            .servers
            .push(ClusterServer::voter(id.clone(), address.clone()));
        config.index += 1;
        Ok(())
    }

    async fn remove_server(
        &self,
        id: &ServerId,
        prev_index: u64,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        self.take_failure()?;

        let mut guard = self.configuration.lock();
        let config = guard.as_mut().ok_or(ClusterError::NotInitialized)?;
        Self::check_prev_index(config, prev_index)?;

        config.servers.retain(|s| &s.id != id);
        config.index += 1;
        Ok(())
    }

    async fn leadership_transfer(&self) -> ClusterResult<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_leader() {
            return Err(ClusterError::NotLeader { leader: self.leader() });
        }
        if let Some(err) = self.transfer_failure.lock().take() {
            return Err(err);
        }

        let config = self.current_configuration()?;
        let target = config
            .voters()
            .nth(1)
            .cloned()
            .ok_or(ClusterError::NoTransferTarget)?;

        self.set_leader(false);
        self.set_leader_hint(Some(NodeMeta::new(target.id, target.address)));
        Ok(())
    }

    async fn bootstrap(&self, configuration: ClusterConfiguration) -> ClusterResult<()> {
        let mut guard = self.configuration.lock();
        if guard.is_some() {
            return Err(ClusterError::AlreadyBootstrapped);
        }

        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        *guard = Some(ClusterConfiguration {
            index: 1,
            ..configuration
        });
        Ok(())
    }
}
