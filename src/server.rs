// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `ServerRegistry`, the server wide state shared by every session's
//! subscription manager - the cross-session subscription index that makes transfers
//! possible, the registry of namespaces, the subscription id allocator and the configured
//! limits.
//!
//! The registry is also the ingress for sampled values and events. Namespaces push data in
//! by monitored item handle; the registry finds the owning subscription wherever it
//! currently lives and queues the data on the item.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;

use crate::{
    config::SubscriptionLimits,
    namespace::{Event, Namespace},
    subscriptions::{MonitoredItemHandle, Subscription, SubscriptionManager},
    sync::{Mutex, RwLock},
    types::{DataValue, NodeId},
    AtomicHandle,
};

struct SubscriptionEntry {
    subscription: Arc<Mutex<Subscription>>,
    /// The manager of the session that currently owns the subscription. A dead weak ref
    /// means the owning session closed without deleting its subscriptions, leaving them
    /// available for transfer.
    owner: Weak<SubscriptionManager>,
}

pub struct ServerRegistry {
    limits: SubscriptionLimits,
    subscription_ids: AtomicHandle,
    namespaces: RwLock<HashMap<u16, Arc<dyn Namespace>>>,
    subscriptions: RwLock<HashMap<u32, SubscriptionEntry>>,
}

impl ServerRegistry {
    pub fn new(limits: SubscriptionLimits) -> ServerRegistry {
        ServerRegistry {
            limits,
            subscription_ids: AtomicHandle::new(1),
            namespaces: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &SubscriptionLimits {
        &self.limits
    }

    /// Allocates the next process-wide unique subscription id. Ids are never 0.
    pub(crate) fn next_subscription_id(&self) -> u32 {
        self.subscription_ids.next()
    }

    /// Registers the namespace serving the supplied namespace index, replacing any previous
    /// registration.
    pub fn register_namespace(&self, namespace_index: u16, namespace: Arc<dyn Namespace>) {
        let mut namespaces = trace_write_lock!(self.namespaces);
        namespaces.insert(namespace_index, namespace);
    }

    /// The namespace serving the node, if any is registered for its namespace index.
    pub fn namespace(&self, node_id: &NodeId) -> Option<Arc<dyn Namespace>> {
        let namespaces = trace_read_lock!(self.namespaces);
        namespaces.get(&node_id.namespace).cloned()
    }

    pub fn namespace_by_index(&self, namespace_index: u16) -> Option<Arc<dyn Namespace>> {
        let namespaces = trace_read_lock!(self.namespaces);
        namespaces.get(&namespace_index).cloned()
    }

    /// The number of subscriptions registered server-wide.
    pub fn subscription_count(&self) -> usize {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions.len()
    }

    pub(crate) fn insert_subscription(
        &self,
        subscription_id: u32,
        subscription: Arc<Mutex<Subscription>>,
        owner: Weak<SubscriptionManager>,
    ) {
        let mut subscriptions = trace_write_lock!(self.subscriptions);
        subscriptions.insert(
            subscription_id,
            SubscriptionEntry {
                subscription,
                owner,
            },
        );
    }

    pub(crate) fn remove_subscription(&self, subscription_id: u32) {
        let mut subscriptions = trace_write_lock!(self.subscriptions);
        subscriptions.remove(&subscription_id);
    }

    pub(crate) fn get_subscription(&self, subscription_id: u32) -> Option<Arc<Mutex<Subscription>>> {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions
            .get(&subscription_id)
            .map(|e| e.subscription.clone())
    }

    /// The manager currently owning the subscription, if both exist.
    pub(crate) fn subscription_owner(&self, subscription_id: u32) -> Option<Arc<SubscriptionManager>> {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions
            .get(&subscription_id)
            .and_then(|e| e.owner.upgrade())
    }

    /// Re-homes the subscription onto another session's manager. Returns the subscription
    /// so the new owner can take it into its own map.
    pub(crate) fn set_subscription_owner(
        &self,
        subscription_id: u32,
        owner: Weak<SubscriptionManager>,
    ) -> Option<Arc<Mutex<Subscription>>> {
        let mut subscriptions = trace_write_lock!(self.subscriptions);
        subscriptions.get_mut(&subscription_id).map(|e| {
            e.owner = owner;
            e.subscription.clone()
        })
    }

    /// Queues sampled values onto their monitored items. Values are grouped by subscription
    /// so each subscription is locked once per batch.
    pub fn notify_data_values(
        &self,
        values: impl IntoIterator<Item = (MonitoredItemHandle, DataValue)>,
    ) {
        let mut by_subscription: HashMap<u32, Vec<(u32, DataValue)>> = HashMap::new();
        for (handle, value) in values {
            by_subscription
                .entry(handle.subscription_id)
                .or_default()
                .push((handle.monitored_item_id, value));
        }
        let subscriptions = trace_read_lock!(self.subscriptions);
        for (subscription_id, values) in by_subscription {
            let Some(entry) = subscriptions.get(&subscription_id) else {
                continue;
            };
            let mut subscription = trace_lock!(entry.subscription);
            for (monitored_item_id, value) in values {
                subscription.notify_data_value(monitored_item_id, value);
            }
        }
    }

    /// Queues events onto their monitored items, grouped by subscription like
    /// [`Self::notify_data_values`].
    pub fn notify_events<'a>(
        &self,
        events: impl IntoIterator<Item = (MonitoredItemHandle, &'a dyn Event)>,
    ) {
        let mut by_subscription: HashMap<u32, Vec<(u32, &dyn Event)>> = HashMap::new();
        for (handle, event) in events {
            by_subscription
                .entry(handle.subscription_id)
                .or_default()
                .push((handle.monitored_item_id, event));
        }
        let subscriptions = trace_read_lock!(self.subscriptions);
        for (subscription_id, events) in by_subscription {
            let Some(entry) = subscriptions.get(&subscription_id) else {
                continue;
            };
            let mut subscription = trace_lock!(entry.subscription);
            for (monitored_item_id, event) in events {
                subscription.notify_event(monitored_item_id, event);
            }
        }
    }
}
