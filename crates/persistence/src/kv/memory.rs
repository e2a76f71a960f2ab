//! In-memory KV engine.
//!
//! The default engine for tests and embedded use. A single ordered map
//! holds every `(storageId, vid)` item; every successful mutation appends a
//! [`ChangeRecord`] to an ordered feed log that tests and the propagator
//! harness drain explicitly.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{ItemKey, StoredItem};

use super::{
    ChangeEvent, ChangeRecord, DeleteDescriptor, GetDescriptor, KvApi, KvError, PutDescriptor,
    QueryLatestDescriptor, TransitionDescriptor, WriteDescriptor, MAX_TRANSACT_ITEMS,
};

#[derive(Default)]
struct KvState {
    items: BTreeMap<(String, u64), StoredItem>,
    feed: Vec<ChangeRecord>,
}

/// In-memory implementation of [`KvApi`].
#[derive(Default)]
pub struct InMemoryKv {
    state: Mutex<KvState>,
}

impl InMemoryKv {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns every change-feed record emitted so far, in order.
    pub fn drain_feed(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.state.lock().feed)
    }

    /// Returns a specific stored item, bypassing any read policy. Test hook.
    pub fn raw_item(&self, key: &ItemKey) -> Option<StoredItem> {
        self.state
            .lock()
            .items
            .get(&(key.storage_id.clone(), key.vid))
            .cloned()
    }

    /// Returns the number of stored items. Test hook.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if no items are stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    fn check(state: &KvState, descriptor: &WriteDescriptor) -> Result<(), KvError> {
        match descriptor {
            WriteDescriptor::Put(put) => {
                let key = put.item.key();
                if put.if_absent && state.items.contains_key(&(key.storage_id.clone(), key.vid)) {
                    return Err(KvError::ConditionFailed { key });
                }
                Ok(())
            }
            WriteDescriptor::Transition(transition) => {
                let key = &transition.key;
                let current = state
                    .items
                    .get(&(key.storage_id.clone(), key.vid))
                    .ok_or_else(|| KvError::ConditionFailed { key: key.clone() })?;
                let guard_holds = current.resource_type == transition.resource_type
                    && (current.document_status == transition.from
                        || (current.lock_end_ts < transition.reclaim_before
                            && current.document_status.is_reclaimable()));
                if guard_holds {
                    Ok(())
                } else {
                    Err(KvError::ConditionFailed { key: key.clone() })
                }
            }
            WriteDescriptor::Delete(_) => Ok(()),
        }
    }

    fn apply(state: &mut KvState, descriptor: WriteDescriptor) {
        match descriptor {
            WriteDescriptor::Put(put) => {
                let key = put.item.key();
                let old = state
                    .items
                    .insert((key.storage_id.clone(), key.vid), put.item.clone());
                let event = if old.is_some() {
                    ChangeEvent::Modify
                } else {
                    ChangeEvent::Insert
                };
                state.feed.push(ChangeRecord {
                    event,
                    key,
                    old_image: old,
                    new_image: Some(put.item),
                });
            }
            WriteDescriptor::Transition(transition) => {
                let map_key = (transition.key.storage_id.clone(), transition.key.vid);
                // check() verified existence under the same lock
                let item = state.items.get_mut(&map_key).expect("checked transition");
                let old = item.clone();
                item.document_status = transition.to;
                item.lock_end_ts = transition.lock_end_ts;
                let new = item.clone();
                state.feed.push(ChangeRecord {
                    event: ChangeEvent::Modify,
                    key: transition.key,
                    old_image: Some(old),
                    new_image: Some(new),
                });
            }
            WriteDescriptor::Delete(delete) => {
                let map_key = (delete.key.storage_id.clone(), delete.key.vid);
                if let Some(old) = state.items.remove(&map_key) {
                    state.feed.push(ChangeRecord {
                        event: ChangeEvent::Remove,
                        key: delete.key,
                        old_image: Some(old),
                        new_image: None,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl KvApi for InMemoryKv {
    async fn put(&self, descriptor: PutDescriptor) -> Result<(), KvError> {
        let mut state = self.state.lock();
        let write = WriteDescriptor::Put(descriptor);
        Self::check(&state, &write)?;
        Self::apply(&mut state, write);
        Ok(())
    }

    async fn transition(&self, descriptor: TransitionDescriptor) -> Result<StoredItem, KvError> {
        let mut state = self.state.lock();
        let key = descriptor.key.clone();
        let write = WriteDescriptor::Transition(descriptor);
        Self::check(&state, &write)?;
        Self::apply(&mut state, write);
        Ok(state
            .items
            .get(&(key.storage_id.clone(), key.vid))
            .cloned()
            .expect("transitioned item present"))
    }

    async fn delete(&self, descriptor: DeleteDescriptor) -> Result<(), KvError> {
        let mut state = self.state.lock();
        Self::apply(&mut state, WriteDescriptor::Delete(descriptor));
        Ok(())
    }

    async fn get(&self, descriptor: GetDescriptor) -> Result<Option<StoredItem>, KvError> {
        let state = self.state.lock();
        let key = (descriptor.key.storage_id, descriptor.key.vid);
        Ok(state.items.get(&key).cloned())
    }

    async fn query_latest(
        &self,
        descriptor: QueryLatestDescriptor,
    ) -> Result<Vec<StoredItem>, KvError> {
        let state = self.state.lock();
        let from = (descriptor.storage_id.clone(), 0);
        let to = (descriptor.storage_id.clone(), u64::MAX);
        Ok(state
            .items
            .range(from..=to)
            .rev()
            .take(descriptor.limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn transact_write(&self, descriptors: Vec<WriteDescriptor>) -> Result<(), KvError> {
        if descriptors.len() > MAX_TRANSACT_ITEMS {
            return Err(KvError::Internal(format!(
                "transaction of {} writes exceeds the {} item bound",
                descriptors.len(),
                MAX_TRANSACT_ITEMS
            )));
        }

        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            let key = descriptor.key();
            if !seen.insert((key.storage_id.clone(), key.vid)) {
                return Err(KvError::Internal(format!(
                    "transaction addresses {} more than once",
                    key
                )));
            }
        }

        let mut state = self.state.lock();

        // All conditions are evaluated against the pre-transaction state;
        // nothing is applied unless every one holds.
        for (index, descriptor) in descriptors.iter().enumerate() {
            if let Err(err) = Self::check(&state, descriptor) {
                return Err(KvError::TransactionCancelled {
                    index: Some(index),
                    reason: err.to_string(),
                });
            }
        }

        for descriptor in descriptors {
            Self::apply(&mut state, descriptor);
        }
        Ok(())
    }
}
