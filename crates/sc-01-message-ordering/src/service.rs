//! # Chain Multiplexer
//!
//! Routes every message of one stream partition to the chain of its
//! `(publisher, msg chain id)`, creating chains on first use.
//!
//! ## Lock Order
//!
//! chain registry (released) → chain lock. The registry lock is only held to
//! look up or insert a chain and is released before the chain is locked, so
//! chains process messages fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shared_scheduler::Scheduler;
use shared_types::{ChainId, MessageRef, StreamMessage};
use tracing::debug;

use crate::chain::{ChainContext, MessageChain};
use crate::domain::{AddOutcome, OrderingConfig};
use crate::events::OrderingError;
use crate::ports::inbound::MessageOrderingApi;
use crate::ports::outbound::{GapHandler, MessageDeliverer};

/// All chains of one stream partition.
///
/// Chains share the deliverer, the gap handler and the configuration.
pub struct ChainMultiplexer {
    ctx: Arc<ChainContext>,
    chains: RwLock<HashMap<ChainId, Arc<MessageChain>>>,
    /// Progress recorded for chains that have not seen a message yet.
    seeds: RwLock<HashMap<ChainId, MessageRef>>,
}

impl ChainMultiplexer {
    pub fn new(
        stream_id: impl Into<String>,
        partition: u32,
        config: OrderingConfig,
        deliverer: Arc<dyn MessageDeliverer>,
        gap_handler: Arc<dyn GapHandler>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            ctx: Arc::new(ChainContext {
                stream_id: stream_id.into(),
                partition,
                config,
                deliverer,
                gap_handler,
                scheduler,
            }),
            chains: RwLock::new(HashMap::new()),
            seeds: RwLock::new(HashMap::new()),
        }
    }

    /// Start from the progress of a previous multiplexer (reconnect).
    pub fn with_prior_state(self, snapshot: &HashMap<ChainId, MessageRef>) -> Self {
        self.seed(snapshot);
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.ctx.stream_id
    }

    pub fn partition(&self) -> u32 {
        self.ctx.partition
    }

    pub fn config(&self) -> &OrderingConfig {
        &self.ctx.config
    }

    pub fn chain_count(&self) -> usize {
        self.chains.read().len()
    }

    /// Messages waiting for a predecessor, over all chains.
    pub fn queued_messages(&self) -> usize {
        self.all_chains().iter().map(|c| c.queue_len()).sum()
    }

    /// The chain `chain_id`, if it exists.
    pub fn chain(&self, chain_id: &ChainId) -> Option<Arc<MessageChain>> {
        self.chains.read().get(chain_id).cloned()
    }

    fn chain_for(&self, chain_id: ChainId) -> Arc<MessageChain> {
        if let Some(chain) = self.chains.read().get(&chain_id) {
            return Arc::clone(chain);
        }

        let mut chains = self.chains.write();
        let chain = chains.entry(chain_id.clone()).or_insert_with(|| {
            let seed = self.seeds.read().get(&chain_id).copied();
            debug!(
                stream_id = %self.ctx.stream_id,
                chain = %chain_id,
                seed = ?seed,
                "Creating message chain"
            );
            Arc::new(MessageChain::new(Arc::clone(&self.ctx), chain_id.clone(), seed))
        });
        Arc::clone(chain)
    }

    fn all_chains(&self) -> Vec<Arc<MessageChain>> {
        self.chains.read().values().cloned().collect()
    }
}

impl MessageOrderingApi for ChainMultiplexer {
    fn route(&self, msg: StreamMessage) -> Result<AddOutcome, OrderingError> {
        let chain = self.chain_for(msg.chain_id());
        chain.add(msg)
    }

    fn snapshot(&self) -> HashMap<ChainId, MessageRef> {
        let mut snapshot = self.seeds.read().clone();
        for chain in self.all_chains() {
            if let Some(last) = chain.last_delivered() {
                snapshot.insert(chain.chain_id(), last);
            }
        }
        snapshot
    }

    fn seed(&self, snapshot: &HashMap<ChainId, MessageRef>) {
        {
            let mut seeds = self.seeds.write();
            for (chain_id, last) in snapshot {
                let entry = seeds.entry(chain_id.clone()).or_insert(*last);
                if *last > *entry {
                    *entry = *last;
                }
            }
        }

        for (chain_id, last) in snapshot {
            if let Some(chain) = self.chain(chain_id) {
                chain.seed(*last);
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.all_chains().iter().all(|c| c.queue_len() == 0)
    }

    fn stop(&self) {
        for chain in self.all_chains() {
            chain.stop();
        }
        debug!(stream_id = %self.ctx.stream_id, partition = self.ctx.partition, "Stopped all chains");
    }
}
