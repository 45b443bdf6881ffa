// crates/tessel-rpc/src/lib.rs
//
// tessel-rpc: JSON-RPC server and handlers for Tessel.
//
// Provides a tonic-based server exposing the local storage engine
// (`node/*`), the quorum coordinator (`farm/*`), gossip delivery
// (`gossip/event`) and peer announcements (`peer/announce`). Requests use the
// JSON envelope shared with `tessel_cluster::transport` rather than protobuf
// codegen.

pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export the main server type for ergonomic access.
pub use server::{AnnounceCallback, NodeInfo, RpcConfig, TesselRpcServer};
