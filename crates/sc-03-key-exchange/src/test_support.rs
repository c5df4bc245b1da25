//! Test doubles for the key exchange ports.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use shared_types::{Address, StreamMessage};

use crate::domain::GroupKeyErrorResponse;
use crate::events::KeyExchangeError;
use crate::ports::outbound::{NewKeysListener, PermissionOracle, ProtocolPublisher};

/// Fixed permission table.
#[derive(Default)]
pub struct StaticOracle {
    publishers: RwLock<HashMap<String, HashSet<Address>>>,
    subscribers: RwLock<HashMap<String, HashSet<Address>>>,
    pub refreshes: Mutex<Vec<String>>,
}

impl StaticOracle {
    pub fn add_publisher(&self, stream_id: &str, address: Address) {
        self.publishers
            .write()
            .entry(stream_id.to_string())
            .or_default()
            .insert(address);
    }

    pub fn add_subscriber(&self, stream_id: &str, address: Address) {
        self.subscribers
            .write()
            .entry(stream_id.to_string())
            .or_default()
            .insert(address);
    }

    pub fn remove_subscriber(&self, stream_id: &str, address: &Address) {
        if let Some(set) = self.subscribers.write().get_mut(stream_id) {
            set.remove(address);
        }
    }
}

impl PermissionOracle for StaticOracle {
    fn is_valid_publisher(&self, stream_id: &str, address: &Address) -> bool {
        self.publishers
            .read()
            .get(stream_id)
            .is_some_and(|set| set.contains(address))
    }

    fn is_valid_subscriber(&self, stream_id: &str, address: &Address) -> bool {
        self.subscribers
            .read()
            .get(stream_id)
            .is_some_and(|set| set.contains(address))
    }

    fn refresh_subscribers(&self, stream_id: &str) {
        self.refreshes.lock().push(stream_id.to_string());
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<StreamMessage>>,
}

impl RecordingPublisher {
    pub fn take(&self) -> Vec<StreamMessage> {
        std::mem::take(&mut *self.published.lock())
    }
}

impl ProtocolPublisher for RecordingPublisher {
    fn publish(&self, msg: StreamMessage) -> Result<(), KeyExchangeError> {
        self.published.lock().push(msg);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub added: Mutex<Vec<(String, Address, Vec<String>)>>,
    pub failures: Mutex<Vec<GroupKeyErrorResponse>>,
}

impl NewKeysListener for RecordingListener {
    fn on_new_keys_added(&self, stream_id: &str, publisher_id: Address, key_ids: &[String]) {
        self.added
            .lock()
            .push((stream_id.to_string(), publisher_id, key_ids.to_vec()));
    }

    fn on_key_exchange_failed(&self, _stream_id: &str, _publisher_id: Address, failure: &GroupKeyErrorResponse) {
        self.failures.lock().push(failure.clone());
    }
}
