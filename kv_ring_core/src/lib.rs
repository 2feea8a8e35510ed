pub mod config;
pub mod error;
pub mod log;
pub mod membership;
pub mod node;
pub mod quorum;
pub mod replication;
pub mod ring;
pub mod rpc;
pub mod shutdown;
pub mod store;

pub use config::RingConfig;
pub use error::{RemoteError, Result, RingError, TransportError};
pub use membership::{LeaveOutcome, MembershipCoordinator};
pub use node::{NodeSettings, NodeStatus, RingNode};
pub use quorum::{QuorumClient, QuorumRead};
pub use replication::ReplicationCoordinator;
pub use ring::{Item, Key, NodeId, NodeState, Peer, ReplicaMerge, RingView};
pub use rpc::{LocalNetwork, PeerClient, RpcHandler, RpcRequest, RpcResponse, TcpTransport, Transport};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{FileNodeStore, MemoryNodeStore, NodeStore, RecordKind};
