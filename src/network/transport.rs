//! Listener binding and advertised address selection.

use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::types::ServerAddress;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

/// A bound Raft transport endpoint.
///
/// The listener is bound eagerly so that a configured port of 0 resolves to
/// the real port before the address is advertised to peers.
#[derive(Debug)]
pub struct Transport {
    listener: TcpListener,
    local_addr: SocketAddr,
    advertise: ServerAddress,
}

impl Transport {
    /// Resolve the bind address, bind it and compute the advertised address.
    pub async fn bind(config: &NodeConfig) -> ClusterResult<Self> {
        let bind_addr = resolve(&config.bind_addr, config.raft_bind_port).await?;

        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            tracing::error!(addr = %bind_addr, error = %e, "failed to bind raft transport");
            ClusterError::Io(e)
        })?;
        let local_addr = listener.local_addr()?;
        let advertise = advertise_address(config.advertise_host(), local_addr)?;

        tracing::info!(
            bind = %local_addr,
            advertise = %advertise,
            "raft transport bound"
        );

        Ok(Self {
            listener,
            local_addr,
            advertise,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The address peers should use to reach this node.
    pub fn advertise_address(&self) -> &ServerAddress {
        &self.advertise
    }

    /// Turn the listener into a stream of incoming connections for the server.
    pub fn into_incoming(self) -> TcpListenerStream {
        TcpListenerStream::new(self.listener)
    }
}

async fn resolve(host: &str, port: u16) -> ClusterResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addr = format!("{}:{}", host, port);
    let mut candidates = tokio::net::lookup_host(addr.clone())
        .await
        .map_err(|e| ClusterError::AddressResolution {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    candidates
        .next()
        .ok_or_else(|| ClusterError::AddressResolution {
            addr,
            reason: "no addresses found".to_string(),
        })
}

/// Address advertised for `host` once the listener is bound to `bound`.
fn advertise_address(host: &str, bound: SocketAddr) -> ClusterResult<ServerAddress> {
    let host = host.trim();
    let port = bound.port();

    match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => Err(ClusterError::AddressResolution {
            addr: SocketAddr::new(ip, port).to_string(),
            reason: "unspecified address is not advertisable, set advertise_addr".to_string(),
        }),
        Ok(ip) => Ok(ServerAddress::new(SocketAddr::new(ip, port).to_string())),
        Err(_) if host.is_empty() => Err(ClusterError::AddressResolution {
            addr: bound.to_string(),
            reason: "no advertise host configured".to_string(),
        }),
        Err(_) => Ok(ServerAddress::new(format!("{}:{}", host, port))),
    }
}
