// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The subscription machinery proper - the per-session [`SubscriptionManager`], the
//! [`Subscription`] publishing state machine, the [`MonitoredItem`] sampling queues and the
//! [`PublishQueue`] of in-flight publish requests.
//!
//! The flow through the module is always the same: a service request arrives at the manager,
//! which validates it and dispatches to a subscription, which talks to its monitored items.
//! Periodically a publishing tick runs over the session, pairs subscriptions that have
//! something to say with queued publish requests, and completes those requests with
//! notification messages.

mod manager;
mod monitored_item;
mod publish_queue;
mod subscription;

pub use manager::SubscriptionManager;
pub use monitored_item::{CreateMonitoredItem, MonitoredItem, Notification, ParsedEventFilter};
pub use publish_queue::{PendingPublish, PublishQueue};
pub use subscription::{Subscription, SubscriptionState};

pub(crate) use subscription::{
    HandledState, SubscriptionStateParams, TickReason, UpdateStateAction,
};

/// Identifies a monitored item process-wide by the subscription owning it and its id within
/// that subscription. This is what namespaces hold on to; back references are always resolved
/// by id lookup, never by pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MonitoredItemHandle {
    pub subscription_id: u32,
    pub monitored_item_id: u32,
}
