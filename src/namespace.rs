// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `Namespace` trait, the seam between the subscription machinery and the
//! address space. A namespace owns the nodes in one namespace index. It revises the sampling
//! interval when monitored items are created or modified, it is told which items exist so it
//! can start and stop sampling, and it pushes sampled values and events back in through
//! [`crate::server::ServerRegistry`].

use async_trait::async_trait;

use crate::{
    subscriptions::MonitoredItemHandle,
    types::{MonitoringMode, NodeId, SimpleAttributeOperand, StatusCode, Variant},
};

/// An event raised against a notifier node, as seen by event filter evaluation. The
/// subscription machinery never interprets events beyond their type and their selected
/// fields.
pub trait Event {
    /// The type definition id of the event, tested by `OfType` where clauses
    fn type_id(&self) -> &NodeId;
    /// The value of the addressed field, or `Variant::Empty` if the event has no such field
    fn field(&self, operand: &SimpleAttributeOperand) -> Variant;
}

/// What a namespace needs to know about a data change monitored item it will sample for.
#[derive(Debug, Clone)]
pub struct DataItemInfo {
    pub handle: MonitoredItemHandle,
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub sampling_interval: f64,
    pub queue_size: usize,
    pub monitoring_mode: MonitoringMode,
}

/// What a namespace needs to know about an event monitored item.
#[derive(Debug, Clone)]
pub struct EventItemInfo {
    pub handle: MonitoredItemHandle,
    pub node_id: NodeId,
    pub monitoring_mode: MonitoringMode,
}

/// Implemented by the address space layer, one per namespace index. The two async methods
/// are the only suspension points in the monitored item create / modify paths - everything
/// that happens after them runs when all per-item futures have completed.
///
/// The notification methods have empty default implementations so a namespace only
/// implements the ones it cares about. They are always invoked outside subscription locks.
#[async_trait]
pub trait Namespace: Send + Sync {
    /// Revise the sampling interval for an item about to be created on `node_id`, or refuse
    /// the item with a status code, e.g. `BadNodeIdUnknown`.
    async fn on_create_monitored_item(
        &self,
        node_id: &NodeId,
        attribute_id: u32,
        requested_sampling_interval: f64,
    ) -> Result<f64, StatusCode>;

    /// Revise the sampling interval for an item being modified.
    async fn on_modify_monitored_item(
        &self,
        requested_sampling_interval: f64,
    ) -> Result<f64, StatusCode>;

    /// The engineering unit range of the node, required to accept a percent deadband filter
    /// against it.
    fn eu_range(&self, _node_id: &NodeId) -> Option<(f64, f64)> {
        None
    }

    fn on_data_items_created(&self, _items: Vec<DataItemInfo>) {}

    fn on_data_items_modified(&self, _items: Vec<DataItemInfo>) {}

    fn on_data_items_deleted(&self, _items: Vec<DataItemInfo>) {}

    fn on_event_items_created(&self, _items: Vec<EventItemInfo>) {}

    fn on_event_items_modified(&self, _items: Vec<EventItemInfo>) {}

    fn on_event_items_deleted(&self, _items: Vec<EventItemInfo>) {}

    fn on_monitoring_mode_changed(&self, _items: Vec<(MonitoredItemHandle, NodeId, MonitoringMode)>) {
    }
}
