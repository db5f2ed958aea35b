// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the configured limits on subscriptions, usually deserialized from a server
//! configuration file. Every field has a default from [`crate::constants`] so a partial
//! configuration works.

use crate::constants;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionLimits {
    #[serde(default = "defaults::max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,
    #[serde(default = "defaults::max_pending_publish_requests")]
    pub max_pending_publish_requests: usize,
    #[serde(default = "defaults::max_publish_requests_per_subscription")]
    pub max_publish_requests_per_subscription: usize,
    /// Specifies the minimum sampling interval for this server in milliseconds.
    #[serde(default = "defaults::min_sampling_interval_ms")]
    pub min_sampling_interval_ms: f64,
    /// Specifies the maximum sampling interval for this server in milliseconds.
    #[serde(default = "defaults::max_sampling_interval_ms")]
    pub max_sampling_interval_ms: f64,
    /// Specifies the minimum publishing interval for this server in milliseconds.
    #[serde(default = "defaults::min_publishing_interval_ms")]
    pub min_publishing_interval_ms: f64,
    #[serde(default = "defaults::max_keep_alive_count")]
    pub max_keep_alive_count: u32,
    #[serde(default = "defaults::default_keep_alive_count")]
    pub default_keep_alive_count: u32,
    /// Maximum lifetime count (3 times as large as max keep alive)
    #[serde(default = "defaults::max_lifetime_count")]
    pub max_lifetime_count: u32,
    /// Maximum number of monitored items per subscription, 0 for no limit
    #[serde(default = "defaults::max_monitored_items_per_sub")]
    pub max_monitored_items_per_sub: usize,
    /// Maximum number of values in a monitored item queue
    #[serde(default = "defaults::max_monitored_item_queue_size")]
    pub max_monitored_item_queue_size: usize,
    /// Queue size for monitored items that request 0 and leave the choice to the server
    #[serde(default = "defaults::default_monitored_item_queue_size")]
    pub default_monitored_item_queue_size: usize,
    /// Maximum number of notifications per publish message. Can be 0 for unlimited.
    #[serde(default = "defaults::max_notifications_per_publish")]
    pub max_notifications_per_publish: usize,
    /// Number of sent notification messages retained per subscription for republishing.
    #[serde(default = "defaults::max_retained_messages")]
    pub max_retained_messages: usize,
}

mod defaults {
    use crate::constants;

    pub fn max_subscriptions_per_session() -> usize {
        constants::MAX_SUBSCRIPTIONS_PER_SESSION
    }
    pub fn max_pending_publish_requests() -> usize {
        constants::MAX_PENDING_PUBLISH_REQUESTS
    }
    pub fn max_publish_requests_per_subscription() -> usize {
        constants::MAX_PUBLISH_REQUESTS_PER_SUBSCRIPTION
    }
    pub fn min_sampling_interval_ms() -> f64 {
        constants::MIN_SAMPLING_INTERVAL_MS
    }
    pub fn max_sampling_interval_ms() -> f64 {
        constants::MAX_SAMPLING_INTERVAL_MS
    }
    pub fn min_publishing_interval_ms() -> f64 {
        constants::MIN_PUBLISHING_INTERVAL_MS
    }
    pub fn max_keep_alive_count() -> u32 {
        constants::MAX_KEEP_ALIVE_COUNT
    }
    pub fn default_keep_alive_count() -> u32 {
        constants::DEFAULT_KEEP_ALIVE_COUNT
    }
    pub fn max_lifetime_count() -> u32 {
        constants::MAX_LIFETIME_COUNT
    }
    pub fn max_monitored_items_per_sub() -> usize {
        constants::MAX_MONITORED_ITEMS_PER_SUB
    }
    pub fn max_monitored_item_queue_size() -> usize {
        constants::MAX_DATA_CHANGE_QUEUE_SIZE
    }
    pub fn default_monitored_item_queue_size() -> usize {
        constants::DEFAULT_DATA_CHANGE_QUEUE_SIZE
    }
    pub fn max_notifications_per_publish() -> usize {
        constants::MAX_NOTIFICATIONS_PER_PUBLISH
    }
    pub fn max_retained_messages() -> usize {
        constants::MAX_RETAINED_MESSAGES
    }
}

#[test]
fn limits_deserialize_with_defaults() {
    // An empty config gets every default
    let limits: SubscriptionLimits = serde_json::from_str("{}").unwrap();
    assert_eq!(limits, SubscriptionLimits::default());

    // A partial config keeps the defaults for everything it does not name
    let limits: SubscriptionLimits =
        serde_json::from_str(r#"{"max_subscriptions_per_session": 5}"#).unwrap();
    assert_eq!(limits.max_subscriptions_per_session, 5);
    assert_eq!(
        limits.max_keep_alive_count,
        constants::MAX_KEEP_ALIVE_COUNT
    );
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: constants::MAX_SUBSCRIPTIONS_PER_SESSION,
            max_pending_publish_requests: constants::MAX_PENDING_PUBLISH_REQUESTS,
            max_publish_requests_per_subscription: constants::MAX_PUBLISH_REQUESTS_PER_SUBSCRIPTION,
            min_sampling_interval_ms: constants::MIN_SAMPLING_INTERVAL_MS,
            max_sampling_interval_ms: constants::MAX_SAMPLING_INTERVAL_MS,
            min_publishing_interval_ms: constants::MIN_PUBLISHING_INTERVAL_MS,
            max_keep_alive_count: constants::MAX_KEEP_ALIVE_COUNT,
            default_keep_alive_count: constants::DEFAULT_KEEP_ALIVE_COUNT,
            max_lifetime_count: constants::MAX_LIFETIME_COUNT,
            max_monitored_items_per_sub: constants::MAX_MONITORED_ITEMS_PER_SUB,
            max_monitored_item_queue_size: constants::MAX_DATA_CHANGE_QUEUE_SIZE,
            default_monitored_item_queue_size: constants::DEFAULT_DATA_CHANGE_QUEUE_SIZE,
            max_notifications_per_publish: constants::MAX_NOTIFICATIONS_PER_PUBLISH,
            max_retained_messages: constants::MAX_RETAINED_MESSAGES,
        }
    }
}
