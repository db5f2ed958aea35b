// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use hashbrown::HashMap;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SubscriptionLimits,
    constants,
    namespace::{DataItemInfo, EventItemInfo, Namespace},
    server::ServerRegistry,
    service::ServiceRequest,
    subscriptions::MonitoredItemHandle,
    sync::{Mutex, RwLock},
    types::*,
};

use super::{
    monitored_item::{CreateMonitoredItem, MonitoredItem},
    publish_queue::{PendingPublish, PublishQueue},
    subscription::{Subscription, SubscriptionState, TickReason, UpdateStateAction},
};

/// A status change notification that could not be delivered immediately because no publish
/// request was queued. The next incoming publish consumes it.
struct StatusChange {
    subscription_id: u32,
    message: NotificationMessage,
    available_sequence_numbers: Option<Vec<u32>>,
}

/// An item create request partway through the namespace revision fan-in.
enum PendingItem {
    Invalid(StatusCode, Option<EventFilterResult>),
    Valid(CreateMonitoredItem, Arc<dyn Namespace>),
}

/// An item modify request partway through the namespace revision fan-in.
enum PendingModify {
    Invalid(StatusCode),
    Valid {
        request: MonitoredItemModifyRequest,
        namespace: Arc<dyn Namespace>,
        node_id: NodeId,
        sampling_interval: f64,
        eu_range: Option<(f64, f64)>,
    },
}

/// Owns the subscriptions of one session and dispatches every subscription related service
/// request. Created once per session; lives as long as the session unless its subscriptions
/// are transferred away.
pub struct SubscriptionManager {
    server: Arc<ServerRegistry>,
    /// Subscriptions belonging to the session
    subscriptions: RwLock<HashMap<u32, Arc<Mutex<Subscription>>>>,
    /// Status change notifications awaiting a publish request, oldest first
    transferred: Mutex<VecDeque<StatusChange>>,
    /// Acknowledge results keyed by the publish request handle that carried them, held until
    /// that publish completes
    acknowledge_results: Mutex<HashMap<u32, Vec<StatusCode>>>,
    /// The queue of publish requests awaiting notifications
    publish_queue: Mutex<PublishQueue>,
    /// Counter stamped onto a subscription each time it claims a publish request, breaking
    /// priority ties round-robin
    serving: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(server: Arc<ServerRegistry>) -> Arc<SubscriptionManager> {
        Arc::new(SubscriptionManager {
            server,
            subscriptions: RwLock::new(HashMap::new()),
            transferred: Mutex::new(VecDeque::new()),
            acknowledge_results: Mutex::new(HashMap::new()),
            publish_queue: Mutex::new(PublishQueue::new()),
            serving: AtomicU64::new(0),
        })
    }

    pub fn server(&self) -> &Arc<ServerRegistry> {
        &self.server
    }

    fn limits(&self) -> &SubscriptionLimits {
        self.server.limits()
    }

    /// Number of subscriptions currently owned by this session
    pub fn len(&self) -> usize {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_subscription(&self, subscription_id: u32) -> bool {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions.contains_key(&subscription_id)
    }

    fn get_subscription(&self, subscription_id: u32) -> Option<Arc<Mutex<Subscription>>> {
        let subscriptions = trace_read_lock!(self.subscriptions);
        subscriptions.get(&subscription_id).cloned()
    }

    fn max_publish_requests(&self) -> usize {
        let limits = self.limits();
        limits
            .max_pending_publish_requests
            .min(self.len() * limits.max_publish_requests_per_subscription)
            .max(1)
    }

    /// Takes the values requested in a create or modify and returns revised values that
    /// conform to the server's limits.
    fn revise_subscription_values(
        limits: &SubscriptionLimits,
        requested_publishing_interval: f64,
        requested_max_keep_alive_count: u32,
        requested_lifetime_count: u32,
    ) -> (f64, u32, u32) {
        let revised_publishing_interval = f64::max(
            requested_publishing_interval,
            limits.min_publishing_interval_ms,
        );
        let revised_max_keep_alive_count =
            if requested_max_keep_alive_count > limits.max_keep_alive_count {
                limits.max_keep_alive_count
            } else if requested_max_keep_alive_count == 0 {
                limits.default_keep_alive_count
            } else {
                requested_max_keep_alive_count
            };
        // Lifetime count must be at least 3 times the keep alive count
        let min_lifetime_count = revised_max_keep_alive_count * 3;
        let revised_lifetime_count = if requested_lifetime_count < min_lifetime_count {
            min_lifetime_count
        } else if requested_lifetime_count > limits.max_lifetime_count {
            limits.max_lifetime_count
        } else {
            requested_lifetime_count
        };
        (
            revised_publishing_interval,
            revised_max_keep_alive_count,
            revised_lifetime_count,
        )
    }

    /// A namespace refusing an item must do so with a bad code; anything else becomes a
    /// generic bad so a buggy namespace cannot report failure as success.
    fn namespace_error(e: StatusCode) -> StatusCode {
        if e.is_bad() {
            e
        } else {
            StatusCode::BadUnexpectedError
        }
    }

    fn revise_max_notifications_per_publish(limits: &SubscriptionLimits, requested: u32) -> usize {
        if limits.max_notifications_per_publish == 0 {
            requested as usize
        } else if requested == 0 || requested as usize > limits.max_notifications_per_publish {
            limits.max_notifications_per_publish
        } else {
            requested as usize
        }
    }

    /// Handles CreateSubscription - allocates the id, revises the requested values into
    /// server limits, registers the subscription in the session and server-wide maps.
    pub fn create_subscription(
        self: &Arc<Self>,
        service: ServiceRequest<CreateSubscriptionRequest, CreateSubscriptionResponse>,
    ) {
        if self.len() >= self.limits().max_subscriptions_per_session {
            service.set_service_fault(StatusCode::BadTooManySubscriptions);
            return;
        }
        let request = service.request();
        let subscription_id = self.server.next_subscription_id();
        let (revised_publishing_interval, revised_max_keep_alive_count, revised_lifetime_count) =
            Self::revise_subscription_values(
                self.limits(),
                request.requested_publishing_interval,
                request.requested_max_keep_alive_count,
                request.requested_lifetime_count,
            );
        let subscription = Subscription::new(
            subscription_id,
            request.publishing_enabled,
            Duration::from_micros((revised_publishing_interval * 1000.0) as u64),
            revised_lifetime_count,
            revised_max_keep_alive_count,
            request.priority,
            Self::revise_max_notifications_per_publish(
                self.limits(),
                request.max_notifications_per_publish,
            ),
            self.limits().max_retained_messages,
        );
        debug!(
            "Creating subscription {} with publishing interval {}ms",
            subscription_id, revised_publishing_interval
        );
        let subscription = Arc::new(Mutex::new(subscription));
        {
            let mut subscriptions = trace_write_lock!(self.subscriptions);
            subscriptions.insert(subscription_id, subscription.clone());
        }
        // Both maps are updated before the response goes out, so the id is valid the moment
        // the client sees it. Removal on close undoes both as well.
        self.server
            .insert_subscription(subscription_id, subscription, Arc::downgrade(self));

        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(CreateSubscriptionResponse {
            response_header,
            subscription_id,
            revised_publishing_interval,
            revised_lifetime_count,
            revised_max_keep_alive_count,
        });
    }

    /// Handles ModifySubscription. Pending notifications and retained messages survive the
    /// change; only the timing parameters and priority are touched.
    pub fn modify_subscription(
        &self,
        service: ServiceRequest<ModifySubscriptionRequest, ModifySubscriptionResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let (revised_publishing_interval, revised_max_keep_alive_count, revised_lifetime_count) =
            Self::revise_subscription_values(
                self.limits(),
                request.requested_publishing_interval,
                request.requested_max_keep_alive_count,
                request.requested_lifetime_count,
            );
        let max_notifications_per_publish = Self::revise_max_notifications_per_publish(
            self.limits(),
            request.max_notifications_per_publish,
        );
        {
            let mut subscription = trace_lock!(subscription);
            subscription.set_publishing_interval(Duration::from_micros(
                (revised_publishing_interval * 1000.0) as u64,
            ));
            subscription.set_max_keep_alive_counter(revised_max_keep_alive_count);
            subscription.set_max_lifetime_counter(revised_lifetime_count);
            subscription.set_priority(request.priority);
            subscription.set_max_notifications_per_publish(max_notifications_per_publish);
            subscription.reset_lifetime_counter();
            subscription.reset_keep_alive_counter();
        }
        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(ModifySubscriptionResponse {
            response_header,
            revised_publishing_interval,
            revised_lifetime_count,
            revised_max_keep_alive_count,
        });
    }

    /// Handles DeleteSubscriptions. Namespaces are told about every deleted item, and if the
    /// session ends up with no subscriptions any queued publish requests are failed since
    /// nothing can ever satisfy them.
    pub fn delete_subscriptions(
        &self,
        service: ServiceRequest<DeleteSubscriptionsRequest, DeleteSubscriptionsResponse>,
    ) {
        let subscription_ids = match &service.request().subscription_ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let mut results = Vec::with_capacity(subscription_ids.len());
        for subscription_id in &subscription_ids {
            let removed = {
                let mut subscriptions = trace_write_lock!(self.subscriptions);
                subscriptions.remove(subscription_id)
            };
            match removed {
                Some(subscription) => {
                    self.server.remove_subscription(*subscription_id);
                    let items = {
                        let mut subscription = trace_lock!(subscription);
                        subscription.set_state(SubscriptionState::Closed);
                        subscription.drain_monitored_items()
                    };
                    self.notify_items_deleted(*subscription_id, &items);
                    results.push(StatusCode::Good);
                }
                None => results.push(StatusCode::BadSubscriptionIdInvalid),
            }
        }
        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(DeleteSubscriptionsResponse {
            response_header,
            results: Some(results),
        });

        // Queued publish requests can never complete once the session has no subscriptions
        if self.is_empty() {
            let mut publish_queue = trace_lock!(self.publish_queue);
            publish_queue.fault_all(StatusCode::BadNoSubscription);
        }
    }

    /// Handles SetPublishingMode, applying the flag per subscription id.
    pub fn set_publishing_mode(
        &self,
        service: ServiceRequest<SetPublishingModeRequest, SetPublishingModeResponse>,
    ) {
        let request = service.request();
        let subscription_ids = match &request.subscription_ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let publishing_enabled = request.publishing_enabled;
        let results = subscription_ids
            .iter()
            .map(|id| match self.get_subscription(*id) {
                Some(subscription) => {
                    let mut subscription = trace_lock!(subscription);
                    subscription.set_publishing_enabled(publishing_enabled);
                    subscription.reset_lifetime_counter();
                    StatusCode::Good
                }
                None => StatusCode::BadSubscriptionIdInvalid,
            })
            .collect();
        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(SetPublishingModeResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Handles CreateMonitoredItems. Each valid item suspends on its namespace revising the
    /// sampling rate; when every per-item future has completed, the items are added to the
    /// subscription in one critical section and the namespaces are told what now exists.
    pub async fn create_monitored_items(
        &self,
        service: ServiceRequest<CreateMonitoredItemsRequest, CreateMonitoredItemsResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        if request.timestamps_to_return == TimestampsToReturn::Invalid {
            service.set_service_fault(StatusCode::BadTimestampsToReturnInvalid);
            return;
        }
        let items_to_create = match &request.items_to_create {
            Some(items) if !items.is_empty() => items.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let timestamps_to_return = request.timestamps_to_return;
        let subscription_id = request.subscription_id;
        let publishing_interval_ms = {
            let subscription = trace_lock!(subscription);
            let limit = self.limits().max_monitored_items_per_sub;
            if limit > 0 && subscription.len() + items_to_create.len() > limit {
                drop(subscription);
                service.set_service_fault(StatusCode::BadTooManyMonitoredItems);
                return;
            }
            subscription.publishing_interval().as_secs_f64() * 1000.0
        };

        let pending: Vec<PendingItem> = items_to_create
            .iter()
            .map(|r| self.validate_item_to_create(r, publishing_interval_ms, timestamps_to_return))
            .collect();

        // Fan in the namespace revisions; join_all preserves request order
        let revised = futures::future::join_all(pending.into_iter().map(|p| async move {
            match p {
                PendingItem::Valid(mut create, namespace) => {
                    let revision = namespace
                        .on_create_monitored_item(
                            &create.item_to_monitor().node_id,
                            create.item_to_monitor().attribute_id,
                            create.sampling_interval(),
                        )
                        .await;
                    match revision {
                        Ok(revised_sampling_interval) => {
                            create.set_sampling_interval(revised_sampling_interval);
                            PendingItem::Valid(create, namespace)
                        }
                        Err(e) => PendingItem::Invalid(Self::namespace_error(e), None),
                    }
                }
                invalid => invalid,
            }
        }))
        .await;

        // The subscription may have been deleted while the namespaces were revising. Fault
        // the whole request in that case so no item leaks past its subscription.
        let Some(subscription) = self.get_subscription(subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let mut data_buckets: HashMap<u16, Vec<DataItemInfo>> = HashMap::new();
        let mut event_buckets: HashMap<u16, Vec<EventItemInfo>> = HashMap::new();
        let results = {
            let mut subscription = trace_lock!(subscription);
            revised
                .into_iter()
                .map(|p| match p {
                    PendingItem::Invalid(status_code, filter_result) => {
                        let mut result = MonitoredItemCreateResult::error(status_code);
                        result.filter_result = filter_result;
                        result
                    }
                    PendingItem::Valid(mut create, _) => {
                        let monitored_item_id = subscription.create_monitored_item(&create);
                        if let Some(item) = subscription.get(monitored_item_id) {
                            Self::bucket_item(
                                item,
                                subscription_id,
                                &mut data_buckets,
                                &mut event_buckets,
                            );
                        }
                        MonitoredItemCreateResult {
                            status_code: StatusCode::Good,
                            monitored_item_id,
                            revised_sampling_interval: create.sampling_interval(),
                            revised_queue_size: create.queue_size() as u32,
                            filter_result: create.take_filter_result(),
                        }
                    }
                })
                .collect::<Vec<_>>()
        };

        self.dispatch_buckets(data_buckets, event_buckets, |ns, data| {
            ns.on_data_items_created(data)
        }, |ns, events| ns.on_event_items_created(events));

        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(CreateMonitoredItemsResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Validates everything about a create request that does not need the namespace - the
    /// data encoding, the attribute, the index range and the filter.
    fn validate_item_to_create(
        &self,
        r: &MonitoredItemCreateRequest,
        publishing_interval_ms: f64,
        timestamps_to_return: TimestampsToReturn,
    ) -> PendingItem {
        let item_to_monitor = &r.item_to_monitor;
        // A data encoding may only be requested for the Value attribute and must be one of
        // the two default encodings in namespace 0
        if !item_to_monitor.data_encoding.is_null() {
            if item_to_monitor.attribute_id != AttributeId::Value as u32 {
                return PendingItem::Invalid(StatusCode::BadDataEncodingInvalid, None);
            }
            if !Self::is_supported_data_encoding(&item_to_monitor.data_encoding) {
                return PendingItem::Invalid(StatusCode::BadDataEncodingUnsupported, None);
            }
        }
        let attribute_id = match AttributeId::from_u32(item_to_monitor.attribute_id) {
            Ok(attribute_id) => attribute_id,
            Err(e) => return PendingItem::Invalid(e, None),
        };
        if item_to_monitor
            .index_range
            .as_ref()
            .parse::<NumericRange>()
            .is_err()
        {
            return PendingItem::Invalid(StatusCode::BadIndexRangeInvalid, None);
        }
        let Some(namespace) = self.server.namespace(&item_to_monitor.node_id) else {
            return PendingItem::Invalid(StatusCode::BadNodeIdUnknown, None);
        };
        let monitors_events = attribute_id == AttributeId::EventNotifier;
        let eu_range = namespace.eu_range(&item_to_monitor.node_id);
        match CreateMonitoredItem::new(
            r,
            monitors_events,
            self.limits(),
            publishing_interval_ms,
            eu_range,
            timestamps_to_return,
        ) {
            Ok(create) => PendingItem::Valid(create, namespace),
            Err((status_code, filter_result)) => PendingItem::Invalid(status_code, filter_result),
        }
    }

    fn is_supported_data_encoding(data_encoding: &QualifiedName) -> bool {
        data_encoding.namespace_index == 0
            && matches!(data_encoding.name.as_ref(), "DefaultBinary" | "DefaultXML")
    }

    /// Handles ModifyMonitoredItems with the same fan-in shape as create. A successful
    /// modify resets the subscription's lifetime counter.
    pub async fn modify_monitored_items(
        &self,
        service: ServiceRequest<ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        if request.timestamps_to_return == TimestampsToReturn::Invalid {
            service.set_service_fault(StatusCode::BadTimestampsToReturnInvalid);
            return;
        }
        let items_to_modify = match &request.items_to_modify {
            Some(items) if !items.is_empty() => items.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let timestamps_to_return = request.timestamps_to_return;
        let subscription_id = request.subscription_id;
        let publishing_interval_ms = {
            let subscription = trace_lock!(subscription);
            subscription.publishing_interval().as_secs_f64() * 1000.0
        };

        let pending: Vec<PendingModify> = {
            let subscription = trace_lock!(subscription);
            items_to_modify
                .into_iter()
                .map(|r| {
                    let Some(item) = subscription.get(r.monitored_item_id) else {
                        return PendingModify::Invalid(StatusCode::BadMonitoredItemIdInvalid);
                    };
                    let node_id = item.item_to_monitor().node_id.clone();
                    let Some(namespace) = self.server.namespace(&node_id) else {
                        return PendingModify::Invalid(StatusCode::BadNodeIdUnknown);
                    };
                    let sampling_interval = super::monitored_item::sanitize_sampling_interval(
                        self.limits(),
                        r.requested_parameters.sampling_interval,
                        publishing_interval_ms,
                    );
                    let eu_range = namespace.eu_range(&node_id);
                    PendingModify::Valid {
                        request: r,
                        namespace,
                        node_id,
                        sampling_interval,
                        eu_range,
                    }
                })
                .collect()
        };

        let revised = futures::future::join_all(pending.into_iter().map(|p| async move {
            match p {
                PendingModify::Valid {
                    request,
                    namespace,
                    node_id,
                    sampling_interval,
                    eu_range,
                } => match namespace.on_modify_monitored_item(sampling_interval).await {
                    Ok(revised_sampling_interval) => PendingModify::Valid {
                        request,
                        namespace,
                        node_id,
                        sampling_interval: revised_sampling_interval,
                        eu_range,
                    },
                    Err(e) => PendingModify::Invalid(Self::namespace_error(e)),
                },
                invalid => invalid,
            }
        }))
        .await;

        let Some(subscription) = self.get_subscription(subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let mut data_buckets: HashMap<u16, Vec<DataItemInfo>> = HashMap::new();
        let mut event_buckets: HashMap<u16, Vec<EventItemInfo>> = HashMap::new();
        let results = {
            let mut subscription = trace_lock!(subscription);
            let results: Vec<_> = revised
                .into_iter()
                .map(|p| match p {
                    PendingModify::Invalid(status_code) => {
                        MonitoredItemModifyResult::error(status_code)
                    }
                    PendingModify::Valid {
                        request,
                        sampling_interval,
                        eu_range,
                        ..
                    } => {
                        let limits = *self.limits();
                        let Some(item) = subscription.get_mut(request.monitored_item_id) else {
                            // Deleted while the namespace was revising
                            return MonitoredItemModifyResult::error(
                                StatusCode::BadMonitoredItemIdInvalid,
                            );
                        };
                        match item.modify(
                            timestamps_to_return,
                            &request,
                            sampling_interval,
                            &limits,
                            eu_range,
                        ) {
                            Ok(filter_result) => MonitoredItemModifyResult {
                                status_code: StatusCode::Good,
                                revised_sampling_interval: item.sampling_interval(),
                                revised_queue_size: item.queue_size() as u32,
                                filter_result,
                            },
                            Err((status_code, filter_result)) => {
                                let mut result = MonitoredItemModifyResult::error(status_code);
                                result.filter_result = filter_result;
                                result
                            }
                        }
                    }
                })
                .collect();
            // Gather the modified items for the namespaces while still under the lock
            for (result, request_id) in results.iter().zip(
                service
                    .request()
                    .items_to_modify
                    .iter()
                    .flatten()
                    .map(|r| r.monitored_item_id),
            ) {
                if result.status_code.is_good() {
                    if let Some(item) = subscription.get(request_id) {
                        Self::bucket_item(
                            item,
                            subscription_id,
                            &mut data_buckets,
                            &mut event_buckets,
                        );
                    }
                }
            }
            subscription.reset_lifetime_counter();
            results
        };

        self.dispatch_buckets(data_buckets, event_buckets, |ns, data| {
            ns.on_data_items_modified(data)
        }, |ns, events| ns.on_event_items_modified(events));

        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(ModifyMonitoredItemsResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Handles DeleteMonitoredItems. Removal happens in a single critical section over the
    /// subscription; the namespaces are told afterwards, outside any lock.
    pub fn delete_monitored_items(
        &self,
        service: ServiceRequest<DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let monitored_item_ids = match &request.monitored_item_ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let subscription_id = request.subscription_id;
        let mut deleted = Vec::new();
        let results = {
            let mut subscription = trace_lock!(subscription);
            monitored_item_ids
                .iter()
                .map(|id| match subscription.remove_monitored_item(*id) {
                    Some(item) => {
                        deleted.push(item);
                        StatusCode::Good
                    }
                    None => StatusCode::BadMonitoredItemIdInvalid,
                })
                .collect()
        };
        self.notify_items_deleted(subscription_id, &deleted);

        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(DeleteMonitoredItemsResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Handles SetMonitoringMode. Namespaces are told which items changed so they can stop
    /// or resume sampling.
    pub fn set_monitoring_mode(
        &self,
        service: ServiceRequest<SetMonitoringModeRequest, SetMonitoringModeResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let monitored_item_ids = match &request.monitored_item_ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let monitoring_mode = request.monitoring_mode;
        let subscription_id = request.subscription_id;
        let mut changed = Vec::new();
        let results = {
            let mut subscription = trace_lock!(subscription);
            monitored_item_ids
                .iter()
                .map(|id| match subscription.get_mut(*id) {
                    Some(item) => {
                        item.set_monitoring_mode(monitoring_mode);
                        changed.push((
                            MonitoredItemHandle {
                                subscription_id,
                                monitored_item_id: *id,
                            },
                            item.item_to_monitor().node_id.clone(),
                            monitoring_mode,
                        ));
                        StatusCode::Good
                    }
                    None => StatusCode::BadMonitoredItemIdInvalid,
                })
                .collect()
        };

        // One callback per namespace index with the items it owns
        let mut by_namespace: HashMap<u16, Vec<(MonitoredItemHandle, NodeId, MonitoringMode)>> =
            HashMap::new();
        for change in changed {
            by_namespace
                .entry(change.1.namespace)
                .or_default()
                .push(change);
        }
        for (namespace_index, changes) in by_namespace {
            if let Some(namespace) = self.server.namespace_by_index(namespace_index) {
                namespace.on_monitoring_mode_changed(changes);
            }
        }

        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(SetMonitoringModeResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Handles SetTriggering under one critical section on the subscription - removals are
    /// applied before additions per the service contract.
    pub fn set_triggering(
        &self,
        service: ServiceRequest<SetTriggeringRequest, SetTriggeringResponse>,
    ) {
        let request = service.request();
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let links_to_add = request.links_to_add.clone().unwrap_or_default();
        let links_to_remove = request.links_to_remove.clone().unwrap_or_default();
        if links_to_add.is_empty() && links_to_remove.is_empty() {
            service.set_service_fault(StatusCode::BadNothingToDo);
            return;
        }
        let triggering_result = {
            let mut subscription = trace_lock!(subscription);
            subscription.set_triggering(
                request.triggering_item_id,
                &links_to_add,
                &links_to_remove,
            )
        };
        match triggering_result {
            Ok((remove_results, add_results)) => {
                let response_header = ResponseHeader::new_good(service.request_header());
                service.set_response(SetTriggeringResponse {
                    response_header,
                    add_results: Some(add_results),
                    remove_results: Some(remove_results),
                });
            }
            Err(e) => service.set_service_fault(e),
        }
    }

    /// Handles Publish. The handler returns as soon as the request is recorded; the response
    /// is produced by whichever subscription claims the request from a later tick. If a
    /// status change notification is parked, this request delivers it instead.
    pub fn publish(&self, service: ServiceRequest<PublishRequest, PublishResponse>) {
        let now = Utc::now();
        let now_instant = Instant::now();
        {
            let mut transferred = trace_lock!(self.transferred);
            if let Some(change) = transferred.pop_front() {
                drop(transferred);
                debug!(
                    "Publish request consumed by parked status change for subscription {}",
                    change.subscription_id
                );
                let response_header = ResponseHeader::new_good(service.request_header());
                service.set_response(PublishResponse {
                    response_header,
                    subscription_id: change.subscription_id,
                    available_sequence_numbers: change.available_sequence_numbers,
                    more_notifications: false,
                    notification_message: change.message,
                    results: None,
                });
                return;
            }
        }
        if self.is_empty() {
            service.set_service_fault(StatusCode::BadNoSubscription);
            return;
        }

        // Acknowledge results are recorded under the request handle and travel back with
        // whatever publish response eventually answers this request
        if let Some(results) = self.process_acknowledgements(service.request()) {
            let mut acknowledge_results = trace_lock!(self.acknowledge_results);
            acknowledge_results.insert(service.request_handle(), results);
        }

        let timeout_hint = service.request_header().timeout_hint as u64;
        let timeout = if timeout_hint > 0 && timeout_hint < constants::MAX_PUBLISH_TIMEOUT_MS {
            timeout_hint
        } else {
            constants::MAX_PUBLISH_TIMEOUT_MS
        };
        {
            let mut publish_queue = trace_lock!(self.publish_queue);
            publish_queue.add_request(
                PendingPublish {
                    request: service,
                    deadline: now_instant + Duration::from_millis(timeout),
                },
                self.max_publish_requests(),
            );
        }
        // The freshly queued request may immediately satisfy a late subscription
        self.tick(&now, now_instant, TickReason::ReceivePublishRequest);
    }

    /// Deletes acknowledged messages from their subscriptions' retransmission queues,
    /// producing one result per acknowledgement.
    fn process_acknowledgements(&self, request: &PublishRequest) -> Option<Vec<StatusCode>> {
        let acknowledgements = request.subscription_acknowledgements.as_ref()?;
        if acknowledgements.is_empty() {
            return None;
        }
        let subscriptions = trace_read_lock!(self.subscriptions);
        Some(
            acknowledgements
                .iter()
                .map(|ack| {
                    debug!(
                        "Acknowledging sequence number {} on subscription {}",
                        ack.sequence_number, ack.subscription_id
                    );
                    match subscriptions.get(&ack.subscription_id) {
                        None => StatusCode::BadSubscriptionIdInvalid,
                        Some(subscription) => {
                            let mut subscription = trace_lock!(subscription);
                            subscription.acknowledge(ack.sequence_number)
                        }
                    }
                })
                .collect(),
        )
    }

    /// Handles Republish from the subscription's retained messages. A successful republish
    /// counts as client activity and resets the lifetime counter.
    pub fn republish(&self, service: ServiceRequest<RepublishRequest, RepublishResponse>) {
        let request = service.request();
        if self.is_empty() {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        }
        let Some(subscription) = self.get_subscription(request.subscription_id) else {
            service.set_service_fault(StatusCode::BadSubscriptionIdInvalid);
            return;
        };
        let message = {
            let mut subscription = trace_lock!(subscription);
            let message = subscription.republish(request.retransmit_sequence_number);
            if message.is_some() {
                subscription.reset_lifetime_counter();
            }
            message
        };
        match message {
            Some(notification_message) => {
                let response_header = ResponseHeader::new_good(service.request_header());
                service.set_response(RepublishResponse {
                    response_header,
                    notification_message,
                });
            }
            None => service.set_service_fault(StatusCode::BadMessageNotAvailable),
        }
    }

    /// Handles TransferSubscriptions - the one subscription operation that spans sessions.
    /// Each transferred subscription is detached from its old session's manager, re-homed
    /// here, and announces the move with a `GoodSubscriptionTransferred` status change
    /// through this session's publish queue.
    pub fn transfer_subscriptions(
        self: &Arc<Self>,
        service: ServiceRequest<TransferSubscriptionsRequest, TransferSubscriptionsResponse>,
    ) {
        let request = service.request().clone();
        let subscription_ids = match request.subscription_ids {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                service.set_service_fault(StatusCode::BadNothingToDo);
                return;
            }
        };
        let now = Utc::now();
        let mut results = Vec::with_capacity(subscription_ids.len());
        for subscription_id in subscription_ids {
            let Some(subscription) = self.server.get_subscription(subscription_id) else {
                results.push(TransferResult {
                    status_code: StatusCode::BadSubscriptionIdInvalid,
                    available_sequence_numbers: None,
                });
                continue;
            };
            let owner = self.server.subscription_owner(subscription_id);
            if owner.as_ref().map_or(false, |o| Arc::ptr_eq(o, self)) {
                // Already ours - report the retained sequence numbers and do nothing else
                let available_sequence_numbers =
                    trace_lock!(subscription).available_sequence_numbers();
                results.push(TransferResult {
                    status_code: StatusCode::Good,
                    available_sequence_numbers,
                });
                continue;
            }
            if self.len() >= self.limits().max_subscriptions_per_session {
                results.push(TransferResult {
                    status_code: StatusCode::BadTooManySubscriptions,
                    available_sequence_numbers: None,
                });
                continue;
            }
            if let Some(old_owner) = owner {
                old_owner.detach_subscription(subscription_id);
            }
            self.server
                .set_subscription_owner(subscription_id, Arc::downgrade(self));
            {
                let mut subscriptions = trace_write_lock!(self.subscriptions);
                subscriptions.insert(subscription_id, subscription.clone());
            }
            let (message, available_sequence_numbers) = {
                let mut subscription = trace_lock!(subscription);
                if request.send_initial_values {
                    subscription.set_resend_data();
                }
                let message =
                    subscription.status_change_message(&now, StatusCode::GoodSubscriptionTransferred);
                (message, subscription.available_sequence_numbers())
            };
            info!("Subscription {} transferred to a new session", subscription_id);
            results.push(TransferResult {
                status_code: StatusCode::Good,
                available_sequence_numbers: available_sequence_numbers.clone(),
            });
            self.send_status_change_notification(StatusChange {
                subscription_id,
                message,
                available_sequence_numbers,
            });
        }
        let response_header = ResponseHeader::new_good(service.request_header());
        service.set_response(TransferSubscriptionsResponse {
            response_header,
            results: Some(results),
        });
    }

    /// Removes the subscription from this session's map without deleting it server-wide,
    /// because another session is taking it over.
    fn detach_subscription(&self, subscription_id: u32) {
        let mut subscriptions = trace_write_lock!(self.subscriptions);
        subscriptions.remove(&subscription_id);
    }

    /// Called when the owning session closes. With `delete_subscriptions` the subscriptions
    /// are deleted server-wide; otherwise they stay in the server registry, discoverable for
    /// transfer to another session.
    pub fn session_closed(&self, delete_subscriptions: bool) {
        let subscription_ids: Vec<u32> = {
            let mut subscriptions = trace_write_lock!(self.subscriptions);
            let ids = subscriptions.keys().copied().collect();
            subscriptions.clear();
            ids
        };
        if delete_subscriptions {
            for subscription_id in subscription_ids {
                self.server.remove_subscription(subscription_id);
            }
        }
        // Outstanding publish requests die with the session's transport
        {
            let mut publish_queue = trace_lock!(self.publish_queue);
            while publish_queue.poll().is_some() {}
        }
        {
            let mut transferred = trace_lock!(self.transferred);
            transferred.clear();
        }
        {
            let mut acknowledge_results = trace_lock!(self.acknowledge_results);
            acknowledge_results.clear();
        }
    }

    /// Delivers a status change notification, either through an immediately available
    /// publish request or by parking it for the next one.
    fn send_status_change_notification(&self, change: StatusChange) {
        let pending = {
            let mut publish_queue = trace_lock!(self.publish_queue);
            publish_queue.poll()
        };
        match pending {
            Some(pending) => {
                let results = {
                    let mut acknowledge_results = trace_lock!(self.acknowledge_results);
                    acknowledge_results.remove(&pending.request.request_handle())
                };
                let response_header = ResponseHeader::new_good(pending.request.request_header());
                pending.request.set_response(PublishResponse {
                    response_header,
                    subscription_id: change.subscription_id,
                    available_sequence_numbers: change.available_sequence_numbers,
                    more_notifications: false,
                    notification_message: change.message,
                    results,
                });
            }
            None => {
                let mut transferred = trace_lock!(self.transferred);
                transferred.push_back(change);
            }
        }
    }

    /// The periodic entry point, normally driven by [`Self::run_publishing_timer`]. Expires
    /// stale publish requests then ticks every subscription.
    pub fn periodic_tick(&self) {
        let now = Utc::now();
        let now_instant = Instant::now();
        {
            let mut publish_queue = trace_lock!(self.publish_queue);
            publish_queue.expire_stale_requests(now_instant);
        }
        self.tick(&now, now_instant, TickReason::TickTimerFired);
    }

    /// Ticks every subscription in priority order, pairing those with something to say with
    /// queued publish requests. Ties in priority go to the subscription that has waited
    /// longest since last claiming a request.
    pub(crate) fn tick(&self, now: &DateTimeUtc, now_instant: Instant, tick_reason: TickReason) {
        let mut by_priority: Vec<(u32, Arc<Mutex<Subscription>>, u8, u64)> = {
            let subscriptions = trace_read_lock!(self.subscriptions);
            subscriptions
                .iter()
                .map(|(id, s)| {
                    let subscription = trace_lock!(s);
                    (
                        *id,
                        s.clone(),
                        subscription.priority(),
                        subscription.last_served(),
                    )
                })
                .collect()
        };
        by_priority.sort_by(|s1, s2| s2.2.cmp(&s1.2).then(s1.3.cmp(&s2.3)));

        let mut expired = Vec::new();
        for (subscription_id, subscription, _, _) in by_priority {
            let mut sub = trace_lock!(subscription);
            let mut reason = tick_reason;
            loop {
                let publishing_req_queued = {
                    let publish_queue = trace_lock!(self.publish_queue);
                    publish_queue.is_not_empty()
                };
                // A receive tick only makes sense while the received request is still there;
                // an earlier subscription may have claimed it
                if reason == TickReason::ReceivePublishRequest && !publishing_req_queued {
                    break;
                }
                match sub.tick(now_instant, reason, publishing_req_queued) {
                    UpdateStateAction::None => break,
                    UpdateStateAction::ReturnKeepAlive => {
                        let pending = {
                            let mut publish_queue = trace_lock!(self.publish_queue);
                            publish_queue.poll()
                        };
                        let Some(pending) = pending else {
                            break;
                        };
                        let message = sub.keep_alive_message(now);
                        self.complete_publish(&mut sub, pending, message, false);
                        break;
                    }
                    UpdateStateAction::ReturnNotifications => {
                        let pending = {
                            let mut publish_queue = trace_lock!(self.publish_queue);
                            publish_queue.poll()
                        };
                        let Some(pending) = pending else {
                            break;
                        };
                        let message = sub.assemble_notification(now);
                        let more_notifications = sub.more_notifications();
                        self.complete_publish(&mut sub, pending, message, more_notifications);
                        if more_notifications {
                            // Leftover notifications may claim further queued requests now
                            reason = TickReason::ReceivePublishRequest;
                        } else {
                            break;
                        }
                    }
                    UpdateStateAction::SubscriptionExpired => {
                        expired.push((subscription_id, subscription.clone()));
                        break;
                    }
                }
            }
        }

        for (subscription_id, subscription) in expired {
            self.close_expired_subscription(now, subscription_id, subscription);
        }
    }

    fn complete_publish(
        &self,
        subscription: &mut Subscription,
        pending: PendingPublish,
        notification_message: NotificationMessage,
        more_notifications: bool,
    ) {
        let results = {
            let mut acknowledge_results = trace_lock!(self.acknowledge_results);
            acknowledge_results.remove(&pending.request.request_handle())
        };
        subscription.set_last_served(self.serving.fetch_add(1, Ordering::Relaxed));
        let response_header = ResponseHeader::new_good(pending.request.request_header());
        pending.request.set_response(PublishResponse {
            response_header,
            subscription_id: subscription.subscription_id(),
            available_sequence_numbers: subscription.available_sequence_numbers(),
            more_notifications,
            notification_message,
            results,
        });
    }

    /// A subscription's lifetime ran out. It leaves both maps, its namespaces forget its
    /// items, and a `BadTimeout` status change is delivered through the publish queue or
    /// parked until a publish arrives.
    fn close_expired_subscription(
        &self,
        now: &DateTimeUtc,
        subscription_id: u32,
        subscription: Arc<Mutex<Subscription>>,
    ) {
        {
            let mut subscriptions = trace_write_lock!(self.subscriptions);
            subscriptions.remove(&subscription_id);
        }
        self.server.remove_subscription(subscription_id);

        let (message, available_sequence_numbers, items) = {
            let mut subscription = trace_lock!(subscription);
            let message = subscription.status_change_message(now, StatusCode::BadTimeout);
            let available_sequence_numbers = subscription.available_sequence_numbers();
            (
                message,
                available_sequence_numbers,
                subscription.drain_monitored_items(),
            )
        };
        self.notify_items_deleted(subscription_id, &items);
        self.send_status_change_notification(StatusChange {
            subscription_id,
            message,
            available_sequence_numbers,
        });
    }

    /// Spawnable timer loop driving the manager at the server's subscription timer rate
    /// until cancelled.
    pub async fn run_publishing_timer(manager: Arc<SubscriptionManager>, token: CancellationToken) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(constants::SUBSCRIPTION_TIMER_RATE_MS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    manager.periodic_tick();
                }
                _ = token.cancelled() => {
                    break;
                }
            }
        }
    }

    fn bucket_item(
        item: &MonitoredItem,
        subscription_id: u32,
        data_buckets: &mut HashMap<u16, Vec<DataItemInfo>>,
        event_buckets: &mut HashMap<u16, Vec<EventItemInfo>>,
    ) {
        let handle = MonitoredItemHandle {
            subscription_id,
            monitored_item_id: item.id(),
        };
        let node_id = item.item_to_monitor().node_id.clone();
        let namespace_index = node_id.namespace;
        if item.monitors_events() {
            event_buckets
                .entry(namespace_index)
                .or_default()
                .push(EventItemInfo {
                    handle,
                    node_id,
                    monitoring_mode: item.monitoring_mode(),
                });
        } else {
            data_buckets
                .entry(namespace_index)
                .or_default()
                .push(DataItemInfo {
                    handle,
                    node_id,
                    attribute_id: item.item_to_monitor().attribute_id,
                    sampling_interval: item.sampling_interval(),
                    queue_size: item.queue_size(),
                    monitoring_mode: item.monitoring_mode(),
                });
        }
    }

    fn dispatch_buckets(
        &self,
        data_buckets: HashMap<u16, Vec<DataItemInfo>>,
        event_buckets: HashMap<u16, Vec<EventItemInfo>>,
        data_callback: impl Fn(&dyn Namespace, Vec<DataItemInfo>),
        event_callback: impl Fn(&dyn Namespace, Vec<EventItemInfo>),
    ) {
        for (namespace_index, items) in data_buckets {
            if let Some(namespace) = self.server.namespace_by_index(namespace_index) {
                data_callback(namespace.as_ref(), items);
            }
        }
        for (namespace_index, items) in event_buckets {
            if let Some(namespace) = self.server.namespace_by_index(namespace_index) {
                event_callback(namespace.as_ref(), items);
            }
        }
    }

    /// Tells each namespace about deleted items, bucketed by namespace index and split into
    /// data and event items.
    fn notify_items_deleted(&self, subscription_id: u32, items: &[MonitoredItem]) {
        if items.is_empty() {
            return;
        }
        let mut data_buckets: HashMap<u16, Vec<DataItemInfo>> = HashMap::new();
        let mut event_buckets: HashMap<u16, Vec<EventItemInfo>> = HashMap::new();
        for item in items {
            Self::bucket_item(item, subscription_id, &mut data_buckets, &mut event_buckets);
        }
        self.dispatch_buckets(
            data_buckets,
            event_buckets,
            |ns, data| ns.on_data_items_deleted(data),
            |ns, events| ns.on_event_items_deleted(events),
        );
    }
}
