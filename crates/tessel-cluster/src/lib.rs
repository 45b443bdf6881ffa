// crates/tessel-cluster/src/lib.rs
//
// tessel-cluster: Cluster view and node plumbing for Tessel.
//
// Provides the node registry (ring membership, per-peer Bloom hints, hint
// gossip, quorum-aware replica selection with deferred hint commit), the two
// interchangeable `Node` adapters (in-process virtual node and remote
// JSON-RPC node), an in-process membership bus, the JSON-RPC envelope and
// client shared with the server, and the scatter/gather fan-out used by the
// coordinator and repair.

pub mod members;
pub mod nodes;
pub mod registry;
pub mod scatter;
pub mod transport;

// Re-export key types for ergonomic access from downstream crates.
pub use members::{LocalBus, LocalMembers};
pub use nodes::{ClusterNodeFactory, RemoteNode, VirtualNode};
pub use registry::{NodeFactory, NodeRegistry, RegistryConfig, WriteCommit};
pub use scatter::{scatter, Gathered};
pub use transport::{JsonRpcRequest, JsonRpcResponse, RpcClient};
