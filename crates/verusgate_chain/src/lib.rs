//! Chain access for the Verus file gateway: a retrying JSON-RPC client,
//! the `decryptdata` adapter and the multi-chain registry.

pub mod client;
pub mod decrypt;
pub mod registry;

pub use client::{ChainInfo, NodeRpc, RpcClient, RpcClientConfig, RpcError, RpcStats};
pub use decrypt::Decryptor;
pub use registry::{ChainDefinition, ChainEntry, ChainRegistry, RegistryConfig};
