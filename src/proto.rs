//! gRPC wire types and generated service stubs.
//!
//! Every RPC carries a single [`Payload`] whose bytes are the JSON encoding of
//! the engine request or response, so the protobuf layer stays independent
//! of openraft's message shapes.

/// Opaque request or response body.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    /// JSON-encoded message.
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
}

impl Payload {
    /// Encode `value` as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::to_vec(value)?,
        })
    }

    /// Decode the JSON body.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

include!(concat!(env!("OUT_DIR"), "/raftkeeper.RaftService.rs"));
include!(concat!(env!("OUT_DIR"), "/raftkeeper.ClusterService.rs"));
