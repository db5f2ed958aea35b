// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the request and response structs for the subscription service set, plus the
//! parameter types they share. Field names and meanings follow OPC UA Part 4; the encoding
//! of these structs is the concern of a stack layer, not of this crate.

use chrono::Utc;

use crate::types::{
    data_value::DateTimeUtc,
    filter::{DataChangeFilter, EventFilter, EventFilterResult},
    node_id::NodeId,
    notification::NotificationMessage,
    qualified_name::QualifiedName,
    status_code::StatusCode,
    string::UAString,
};

/// The monitoring mode of a monitored item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitoringMode {
    /// Sampling is suspended and the queue is discarded
    Disabled,
    /// Samples are queued but not reported, except through a triggering link
    Sampling,
    /// Samples are queued and reported
    Reporting,
}

/// Which timestamps are returned with a sampled value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimestampsToReturn {
    Source = 0,
    Server = 1,
    Both = 2,
    Neither = 3,
    /// The sentinel for an out of range value on the wire
    Invalid = 4,
}

/// Common request parameters. The request handle is the client's correlation id for the
/// request and keys acknowledge results for the Publish service.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    pub timestamp: DateTimeUtc,
    pub request_handle: u32,
    pub timeout_hint: u32,
}

impl RequestHeader {
    pub fn new(request_handle: u32) -> RequestHeader {
        RequestHeader {
            timestamp: Utc::now(),
            request_handle,
            timeout_hint: 0,
        }
    }
}

/// Common response parameters echoing the request handle with the service level result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    pub timestamp: DateTimeUtc,
    pub request_handle: u32,
    pub service_result: StatusCode,
}

impl ResponseHeader {
    pub fn new_good(request_header: &RequestHeader) -> ResponseHeader {
        ResponseHeader::new_service_result(request_header, StatusCode::Good)
    }

    pub fn new_service_result(
        request_header: &RequestHeader,
        service_result: StatusCode,
    ) -> ResponseHeader {
        ResponseHeader {
            timestamp: Utc::now(),
            request_handle: request_header.request_handle,
            service_result,
        }
    }
}

/// The terminal response for a request that cannot be processed at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl ServiceFault {
    pub fn new(request_header: &RequestHeader, service_result: StatusCode) -> ServiceFault {
        ServiceFault {
            response_header: ResponseHeader::new_service_result(request_header, service_result),
        }
    }
}

/// Identifies an attribute of a node to sample, with an optional index range into array
/// values and an optional data encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: UAString,
    pub data_encoding: QualifiedName,
}

/// The filter requested for a monitored item. On the wire this is an extension object; the
/// decoded forms a server accepts are a data change filter, an event filter, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringFilter {
    None,
    DataChangeFilter(DataChangeFilter),
    EventFilter(EventFilter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringParameters {
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

// CreateSubscription

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionRequest {
    pub request_header: RequestHeader,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

// ModifySubscription

#[derive(Debug, Clone, PartialEq)]
pub struct ModifySubscriptionRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifySubscriptionResponse {
    pub response_header: ResponseHeader,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

// DeleteSubscriptions

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSubscriptionsRequest {
    pub request_header: RequestHeader,
    pub subscription_ids: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSubscriptionsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<StatusCode>>,
}

// SetPublishingMode

#[derive(Debug, Clone, PartialEq)]
pub struct SetPublishingModeRequest {
    pub request_header: RequestHeader,
    pub publishing_enabled: bool,
    pub subscription_ids: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPublishingModeResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<StatusCode>>,
}

// CreateMonitoredItems

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    pub requested_parameters: MonitoringParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateResult {
    pub status_code: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: Option<EventFilterResult>,
}

impl MonitoredItemCreateResult {
    /// An error result for an item that could not be created
    pub fn error(status_code: StatusCode) -> Self {
        Self {
            status_code,
            monitored_item_id: 0,
            revised_sampling_interval: 0f64,
            revised_queue_size: 0,
            filter_result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<MonitoredItemCreateResult>>,
}

// ModifyMonitoredItems

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModifyRequest {
    pub monitored_item_id: u32,
    pub requested_parameters: MonitoringParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModifyResult {
    pub status_code: StatusCode,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: Option<EventFilterResult>,
}

impl MonitoredItemModifyResult {
    /// An error result for an item that could not be modified
    pub fn error(status_code: StatusCode) -> Self {
        Self {
            status_code,
            revised_sampling_interval: 0f64,
            revised_queue_size: 0,
            filter_result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifyMonitoredItemsRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifyMonitoredItemsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<MonitoredItemModifyResult>>,
}

// DeleteMonitoredItems

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMonitoredItemsRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub monitored_item_ids: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMonitoredItemsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<StatusCode>>,
}

// SetMonitoringMode

#[derive(Debug, Clone, PartialEq)]
pub struct SetMonitoringModeRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub monitoring_mode: MonitoringMode,
    pub monitored_item_ids: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetMonitoringModeResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<StatusCode>>,
}

// SetTriggering

#[derive(Debug, Clone, PartialEq)]
pub struct SetTriggeringRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub triggering_item_id: u32,
    pub links_to_add: Option<Vec<u32>>,
    pub links_to_remove: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetTriggeringResponse {
    pub response_header: ResponseHeader,
    pub add_results: Option<Vec<StatusCode>>,
    pub remove_results: Option<Vec<StatusCode>>,
}

// Publish

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub request_header: RequestHeader,
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub available_sequence_numbers: Option<Vec<u32>>,
    pub more_notifications: bool,
    pub notification_message: NotificationMessage,
    /// Result per acknowledgement in the request, in request order
    pub results: Option<Vec<StatusCode>>,
}

// Republish

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub retransmit_sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishResponse {
    pub response_header: ResponseHeader,
    pub notification_message: NotificationMessage,
}

// TransferSubscriptions

#[derive(Debug, Clone, PartialEq)]
pub struct TransferSubscriptionsRequest {
    pub request_header: RequestHeader,
    pub subscription_ids: Option<Vec<u32>>,
    pub send_initial_values: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub status_code: StatusCode,
    pub available_sequence_numbers: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferSubscriptionsResponse {
    pub response_header: ResponseHeader,
    pub results: Option<Vec<TransferResult>>,
}
