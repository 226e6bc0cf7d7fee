//! Registry of configured chains and their RPC clients.
//!
//! Built once at startup; every client lives for the process lifetime and
//! is handed out as a shared reference. All normal operations are reads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tracing::info;
use verusgate_core::error::GatewayError;

use crate::client::{ChainInfo, NodeRpc, RpcClient, RpcClientConfig};

/// Static definition of one chain from configuration.
#[derive(Debug, Clone)]
pub struct ChainDefinition {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub rpc: RpcClientConfig,
}

/// Registry construction input.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Default chain id; empty selects the first enabled chain.
    pub default_chain: String,
    pub chains: Vec<ChainDefinition>,
}

/// Identity of a configured chain, for listing routes.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug)]
pub struct ChainRegistry {
    chains: RwLock<HashMap<String, Arc<dyn NodeRpc>>>,
    entries: Vec<ChainEntry>,
    default_chain: String,
}

impl ChainRegistry {
    /// Build the registry from configuration, skipping disabled chains.
    ///
    /// Fails when no chain remains enabled or the configured default does
    /// not exist.
    pub fn new(config: RegistryConfig) -> Result<Self, GatewayError> {
        let mut chains: HashMap<String, Arc<dyn NodeRpc>> = HashMap::new();
        let mut entries = Vec::new();

        for def in &config.chains {
            if !def.enabled {
                info!(chain = %def.id, "skipping disabled chain");
                continue;
            }
            let client = RpcClient::new(def.rpc.clone())
                .map_err(|e| GatewayError::Internal(format!("chain {}: {e}", def.id)))?;
            chains.insert(def.id.clone(), Arc::new(client));
            entries.push(ChainEntry {
                id: def.id.clone(),
                name: def.name.clone(),
            });
        }

        Self::with_clients(chains, entries, config.default_chain)
    }

    /// Assemble a registry from pre-built clients. Used by `new` and by
    /// tests that wire in mock nodes.
    pub fn with_clients(
        chains: HashMap<String, Arc<dyn NodeRpc>>,
        entries: Vec<ChainEntry>,
        default_chain: String,
    ) -> Result<Self, GatewayError> {
        if chains.is_empty() {
            return Err(GatewayError::Internal("no chains configured".into()));
        }

        let default_chain = if default_chain.is_empty() {
            entries
                .first()
                .map(|e| e.id.clone())
                .unwrap_or_else(|| chains.keys().next().cloned().unwrap_or_default())
        } else {
            default_chain
        };

        if !chains.contains_key(&default_chain) {
            return Err(GatewayError::Internal(format!(
                "default chain {default_chain} not found"
            )));
        }

        Ok(Self {
            chains: RwLock::new(chains),
            entries,
            default_chain,
        })
    }

    /// Look up the RPC client for a chain.
    pub fn get(&self, chain_id: &str) -> Result<Arc<dyn NodeRpc>, GatewayError> {
        let chains = self.chains.read().expect("registry lock poisoned");
        chains
            .get(chain_id)
            .cloned()
            .ok_or_else(|| GatewayError::chain_error(chain_id, "chain not found"))
    }

    /// Look up the RPC client for the default chain.
    pub fn get_default(&self) -> Result<Arc<dyn NodeRpc>, GatewayError> {
        self.get(&self.default_chain)
    }

    /// Look up a chain's client, falling back to the default chain when no
    /// id is given.
    pub fn resolve(&self, chain_id: Option<&str>) -> Result<Arc<dyn NodeRpc>, GatewayError> {
        match chain_id {
            Some(id) => self.get(id),
            None => self.get_default(),
        }
    }

    pub fn default_chain_id(&self) -> &str {
        &self.default_chain
    }

    /// All configured chain ids. Order is not significant.
    pub fn list(&self) -> Vec<String> {
        let chains = self.chains.read().expect("registry lock poisoned");
        chains.keys().cloned().collect()
    }

    /// `{id, name}` pairs for every enabled chain.
    pub fn chain_entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Probe one chain with `getinfo`.
    pub async fn health_check(&self, chain_id: &str) -> Result<ChainInfo, GatewayError> {
        let client = self.get(chain_id)?;
        client
            .get_info()
            .await
            .map_err(|e| GatewayError::chain_error(chain_id, format!("health check failed: {e}")))
    }

    /// Probe every chain in parallel.
    ///
    /// Each probe is bounded by its client's RPC timeout; callers wanting a
    /// tighter overall deadline wrap this in `tokio::time::timeout`.
    pub async fn health_check_all(&self) -> HashMap<String, Result<ChainInfo, GatewayError>> {
        let clients: Vec<(String, Arc<dyn NodeRpc>)> = {
            let chains = self.chains.read().expect("registry lock poisoned");
            chains
                .iter()
                .map(|(id, client)| (id.clone(), client.clone()))
                .collect()
        };

        let probes = clients.into_iter().map(|(id, client)| async move {
            let result = client.get_info().await.map_err(|e| {
                GatewayError::chain_error(&id, format!("health check failed: {e}"))
            });
            (id, result)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Aggregate RPC client statistics per chain.
    pub fn client_stats(&self) -> HashMap<String, crate::client::RpcStats> {
        let chains = self.chains.read().expect("registry lock poisoned");
        chains
            .iter()
            .map(|(id, client)| (id.clone(), client.stats()))
            .collect()
    }
}
