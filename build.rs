//! Generates the gRPC client and server stubs.
//!
//! Messages are hand-written prost types in `src/proto.rs`, so the services
//! are described with tonic-build's manual builder and no protoc is needed.

use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type("crate::proto::Payload")
        .output_type("crate::proto::Payload")
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let raft_service = Service::builder()
        .name("RaftService")
        .package("raftkeeper")
        .method(unary("append_entries", "AppendEntries"))
        .method(unary("request_vote", "RequestVote"))
        .method(unary("install_snapshot", "InstallSnapshot"))
        .method(unary("timeout_now", "TimeoutNow"))
        .build();

    let cluster_service = Service::builder()
        .name("ClusterService")
        .package("raftkeeper")
        .method(unary("join", "Join"))
        .method(unary("leave", "Leave"))
        .method(unary("status", "Status"))
        .build();

    Builder::new().compile(&[raft_service, cluster_service]);

    println!("cargo:rerun-if-changed=build.rs");
}
