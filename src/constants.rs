// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Provides constants that govern the internal workings of the subscription implementation.
//! Most of these are the defaults behind [`crate::config::SubscriptionLimits`].

/// The polling interval in millis on subscriptions and monitored items. The more fine-grained
/// this is, the more often subscriptions will be checked for changes. The minimum publish
/// interval cannot be less than this.
pub const SUBSCRIPTION_TIMER_RATE_MS: u64 = 100;
/// Minimum publishing interval for subscriptions
pub const MIN_PUBLISHING_INTERVAL_MS: f64 = SUBSCRIPTION_TIMER_RATE_MS as f64;
/// Minimum sampling interval on monitored items
pub const MIN_SAMPLING_INTERVAL_MS: f64 = SUBSCRIPTION_TIMER_RATE_MS as f64;
/// Maximum sampling interval on monitored items. Requested rates above this are clamped down.
pub const MAX_SAMPLING_INTERVAL_MS: f64 = 60_000f64;
/// Default keep alive count
pub const DEFAULT_KEEP_ALIVE_COUNT: u32 = 10;
/// Maximum keep alive count
pub const MAX_KEEP_ALIVE_COUNT: u32 = 30000;
/// Maximum lifetime count (3 times as large as max keep alive)
pub const MAX_LIFETIME_COUNT: u32 = MAX_KEEP_ALIVE_COUNT * 3;
/// Maximum data change queue allowed by clients on monitored items
pub const MAX_DATA_CHANGE_QUEUE_SIZE: usize = 10;
/// Queue size given to a monitored item that requests 0, i.e. leaves the choice to the
/// server. Distinct from a requested size of 1, which keeps single-slot overwrite semantics.
pub const DEFAULT_DATA_CHANGE_QUEUE_SIZE: usize = 2;
/// Maximum number of subscriptions in a session
pub const MAX_SUBSCRIPTIONS_PER_SESSION: usize = 100;
/// Maximum number of monitored items per subscription
pub const MAX_MONITORED_ITEMS_PER_SUB: usize = 1000;
/// Maximum number of publish requests awaiting a response in a session
pub const MAX_PENDING_PUBLISH_REQUESTS: usize = 20;
/// Cap on pending publish requests expressed per subscription in the session
pub const MAX_PUBLISH_REQUESTS_PER_SUBSCRIPTION: usize = 4;
/// Maximum number of notifications per publish message. Can be 0 for unlimited.
pub const MAX_NOTIFICATIONS_PER_PUBLISH: usize = 0;
/// Number of notification messages retained per subscription for the Republish service.
/// The oldest message is evicted when the cap is reached.
pub const MAX_RETAINED_MESSAGES: usize = 1024;
/// Maximum time in millis a publish request will be held before it is expired with a
/// `BadTimeout` fault. Request timeout hints above this value are clamped to it.
pub const MAX_PUBLISH_TIMEOUT_MS: u64 = 30000;
