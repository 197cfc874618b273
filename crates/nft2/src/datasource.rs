//! Datasource registry: which addresses are watched, under which template/ABI, from which block.
//!
//! Static sources (factory, marketplace) are added at config time. Factory handlers call
//! [DatasourceRegistry::instantiate] at runtime; the new source is effective from the block
//! that created it, and the processor picks it up before dispatching that block.

use crate::abi::AbiId;
use crate::entities::{addr, DatasourceRecord};
use crate::error::RegistryError;
use alloy::primitives::Address;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, RwLock};

pub const FACTORY: &str = "Factory";
pub const MARKETPLACE: &str = "Marketplace";
pub const DATA_REGISTRY: &str = "DataRegistry";
pub const DATA_REGISTRY_V2: &str = "DataRegistryV2";
pub const COLLECTION: &str = "Collection";
pub const DERIVED_ACCOUNT: &str = "DerivedAccount";

/// One watched (address, template) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datasource {
    pub address: Address,
    pub template: String,
    pub abi: AbiId,
    /// First block at which logs from this source are dispatched.
    pub start_block: u64,
}

impl Datasource {
    pub fn is_active_at(&self, block: u64) -> bool {
        block >= self.start_block
    }
}

/// Registry of watched datasources for one chain.
pub struct DatasourceRegistry {
    chain_id: u64,
    templates: RwLock<HashMap<String, AbiId>>,
    sources: RwLock<BTreeMap<Address, Vec<Datasource>>>,
    /// Instantiated since the last [DatasourceRegistry::take_fresh].
    fresh: Mutex<Vec<Datasource>>,
}

impl DatasourceRegistry {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            templates: RwLock::new(HashMap::new()),
            sources: RwLock::new(BTreeMap::new()),
            fresh: Mutex::new(Vec::new()),
        }
    }

    /// Registry with the protocol's four runtime templates registered.
    pub fn with_protocol_templates(chain_id: u64) -> Self {
        let templates = [
            (DATA_REGISTRY, AbiId::DataRegistry),
            (DATA_REGISTRY_V2, AbiId::DataRegistryV2),
            (COLLECTION, AbiId::Erc721),
            (DERIVED_ACCOUNT, AbiId::DerivedAccount),
        ]
        .into_iter()
        .map(|(name, abi)| (name.to_string(), abi))
        .collect();
        Self {
            templates: RwLock::new(templates),
            ..Self::new(chain_id)
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Config-time: make `name` instantiable with `abi`.
    pub async fn register_template(&self, name: &str, abi: AbiId) {
        self.templates.write().await.insert(name.to_string(), abi);
    }

    /// Config-time: watch a fixed address (factory, marketplace).
    pub async fn add_static(&self, name: &str, abi: AbiId, address: Address, start_block: u64) {
        let ds = Datasource {
            address,
            template: name.to_string(),
            abi,
            start_block,
        };
        let mut sources = self.sources.write().await;
        let entry = sources.entry(address).or_default();
        if !entry.iter().any(|d| d.template == ds.template) {
            entry.push(ds);
        }
    }

    /// Runtime: watch `address` under `template` from `start_block` on.
    ///
    /// Returns `Ok(false)` (and logs) when the pair is already registered.
    pub async fn instantiate(
        &self,
        template: &str,
        address: Address,
        start_block: u64,
    ) -> Result<bool, RegistryError> {
        let abi = *self
            .templates
            .read()
            .await
            .get(template)
            .ok_or_else(|| RegistryError::UnknownTemplate(template.to_string()))?;
        let mut sources = self.sources.write().await;
        let entry = sources.entry(address).or_default();
        if entry.iter().any(|d| d.template == template) {
            tracing::debug!(
                chain_id = self.chain_id,
                template,
                address = %addr(&address),
                "datasource already registered"
            );
            return Ok(false);
        }
        let ds = Datasource {
            address,
            template: template.to_string(),
            abi,
            start_block,
        };
        tracing::info!(
            chain_id = self.chain_id,
            template,
            address = %addr(&address),
            start_block,
            "datasource instantiated"
        );
        entry.push(ds.clone());
        self.fresh.lock().await.push(ds);
        Ok(true)
    }

    /// Reload sources persisted by earlier runs. Unknown templates are an error.
    pub async fn restore(&self, records: &[DatasourceRecord]) -> Result<usize, RegistryError> {
        let mut restored = 0;
        for r in records.iter().filter(|r| r.chain_id == self.chain_id) {
            let address: Address = match r.address.parse() {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(address = %r.address, reason = %e, "skipping unparsable datasource record");
                    continue;
                }
            };
            if self.instantiate(&r.template, address, r.start_block).await? {
                restored += 1;
            }
        }
        self.fresh.lock().await.clear();
        Ok(restored)
    }

    /// `(address, abi)` pairs active at `block`, sorted by address.
    pub async fn active_filters(&self, block: u64) -> Vec<(Address, AbiId)> {
        self.sources
            .read()
            .await
            .values()
            .flatten()
            .filter(|d| d.is_active_at(block))
            .map(|d| (d.address, d.abi))
            .collect()
    }

    /// Distinct addresses with at least one source active at or before `block`.
    pub async fn addresses_up_to(&self, block: u64) -> Vec<Address> {
        self.sources
            .read()
            .await
            .iter()
            .filter(|(_, ds)| ds.iter().any(|d| d.is_active_at(block)))
            .map(|(a, _)| *a)
            .collect()
    }

    /// Sources for `address` active at `block`, in registration order.
    pub async fn sources_for(&self, address: &Address, block: u64) -> Vec<Datasource> {
        self.sources
            .read()
            .await
            .get(address)
            .map(|ds| ds.iter().filter(|d| d.is_active_at(block)).cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any source active at `block` has call handlers.
    pub async fn has_call_sources(&self, block: u64) -> bool {
        self.sources
            .read()
            .await
            .values()
            .flatten()
            .any(|d| d.is_active_at(block) && d.abi.has_call_handlers())
    }

    /// Drain sources instantiated since the last call, for persistence.
    pub async fn take_fresh(&self) -> Vec<Datasource> {
        std::mem::take(&mut *self.fresh.lock().await)
    }

    pub fn to_record(&self, ds: &Datasource) -> DatasourceRecord {
        DatasourceRecord {
            id: format!("{}-{}-{}", self.chain_id, ds.template, addr(&ds.address)),
            chain_id: self.chain_id,
            template: ds.template.clone(),
            address: addr(&ds.address),
            start_block: ds.start_block,
        }
    }
}
