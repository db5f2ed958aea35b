// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::collections::{BTreeSet, VecDeque};

use crate::{
    config::SubscriptionLimits,
    namespace::Event,
    types::{
        DataChangeFilter, DataValue, DeadbandType, EventFieldList, EventFilter, EventFilterResult,
        FilterOperand, FilterOperator, MonitoredItemCreateRequest, MonitoredItemModifyRequest,
        MonitoredItemNotification, MonitoringFilter, MonitoringMode, NodeId, ReadValueId,
        SimpleAttributeOperand, StatusCode, TimestampsToReturn, Variant,
    },
};

/// A notification queued on a monitored item, waiting to be drained into a notification
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DataChange(MonitoredItemNotification),
    Event(EventFieldList),
}

impl From<MonitoredItemNotification> for Notification {
    fn from(v: MonitoredItemNotification) -> Self {
        Notification::DataChange(v)
    }
}

impl From<EventFieldList> for Notification {
    fn from(v: EventFieldList) -> Self {
        Notification::Event(v)
    }
}

/// An event filter reduced to the parts this server evaluates - the select clauses that
/// project event fields, and the event type restriction from an `OfType` where clause.
#[derive(Debug, Clone)]
pub struct ParsedEventFilter {
    select_clauses: Vec<SimpleAttributeOperand>,
    of_type: Option<NodeId>,
}

impl ParsedEventFilter {
    /// Validates a raw event filter. The returned result is sent back to the client
    /// regardless of whether the filter was accepted.
    pub fn new(filter: &EventFilter) -> (EventFilterResult, Result<ParsedEventFilter, StatusCode>) {
        let select_clauses = match &filter.select_clauses {
            Some(clauses) if !clauses.is_empty() => clauses.clone(),
            _ => {
                return (EventFilterResult::default(), Err(StatusCode::BadEventFilterInvalid));
            }
        };
        let select_clause_results = vec![StatusCode::Good; select_clauses.len()];

        let mut of_type = None;
        let mut where_clause_results = Vec::new();
        let mut where_clause_error = None;
        for element in filter.where_clause.elements.iter().flatten() {
            let result = match element.filter_operator {
                FilterOperator::OfType if of_type.is_none() => match element.filter_operands.first() {
                    Some(FilterOperand::Literal(Variant::NodeId(id))) => {
                        of_type = Some(*id.clone());
                        StatusCode::Good
                    }
                    _ => StatusCode::BadEventFilterInvalid,
                },
                _ => {
                    error!(
                        "Event filter operator {:?} is not supported",
                        element.filter_operator
                    );
                    StatusCode::BadFilterOperatorUnsupported
                }
            };
            if result.is_bad() && where_clause_error.is_none() {
                where_clause_error = Some(if result == StatusCode::BadFilterOperatorUnsupported {
                    StatusCode::BadMonitoredItemFilterUnsupported
                } else {
                    StatusCode::BadEventFilterInvalid
                });
            }
            where_clause_results.push(result);
        }

        let filter_result = EventFilterResult {
            select_clause_results: Some(select_clause_results),
            where_clause_results: Some(where_clause_results),
        };
        match where_clause_error {
            Some(e) => (filter_result, Err(e)),
            None => (
                filter_result,
                Ok(ParsedEventFilter {
                    select_clauses,
                    of_type,
                }),
            ),
        }
    }

    /// Applies the filter to an event, producing the field list to deliver or `None` if the
    /// event does not pass the where clause.
    pub fn evaluate(&self, event: &dyn Event, client_handle: u32) -> Option<EventFieldList> {
        if let Some(of_type) = &self.of_type {
            if event.type_id() != of_type {
                return None;
            }
        }
        let event_fields = self
            .select_clauses
            .iter()
            .map(|operand| event.field(operand))
            .collect();
        Some(EventFieldList {
            client_handle,
            event_fields: Some(event_fields),
        })
    }
}

/// The validated filter state of a monitored item. The variant also decides what kind of
/// item this is - an event filter makes an event item, anything else a data item.
#[derive(Debug, Clone)]
pub enum FilterType {
    None,
    DataChangeFilter {
        filter: DataChangeFilter,
        /// Engineering unit range from the namespace, needed by percent deadbands
        eu_range: Option<(f64, f64)>,
    },
    EventFilter(ParsedEventFilter),
}

impl FilterType {
    /// Validates the requested filter against the attribute being monitored. Event filters
    /// are only allowed on the EventNotifier attribute, data change filters everywhere else.
    pub fn from_filter(
        filter: &MonitoringFilter,
        monitors_events: bool,
        eu_range: Option<(f64, f64)>,
    ) -> (Option<EventFilterResult>, Result<FilterType, StatusCode>) {
        match (filter, monitors_events) {
            (MonitoringFilter::None, false) => (None, Ok(FilterType::None)),
            (MonitoringFilter::None, true) => (None, Err(StatusCode::BadEventFilterInvalid)),
            (MonitoringFilter::DataChangeFilter(filter), false) => {
                if let Err(e) = Self::validate_deadband(filter, eu_range) {
                    (None, Err(e))
                } else {
                    (
                        None,
                        Ok(FilterType::DataChangeFilter {
                            filter: filter.clone(),
                            eu_range,
                        }),
                    )
                }
            }
            (MonitoringFilter::EventFilter(filter), true) => {
                let (result, filter) = ParsedEventFilter::new(filter);
                (Some(result), filter.map(FilterType::EventFilter))
            }
            _ => {
                error!("Requested filter type is not allowed for the monitored attribute");
                (None, Err(StatusCode::BadFilterNotAllowed))
            }
        }
    }

    fn validate_deadband(
        filter: &DataChangeFilter,
        eu_range: Option<(f64, f64)>,
    ) -> Result<(), StatusCode> {
        if filter.deadband_type == DeadbandType::None as u32 {
            Ok(())
        } else if filter.deadband_value < 0f64 {
            Err(StatusCode::BadDeadbandFilterInvalid)
        } else if filter.deadband_type == DeadbandType::Absolute as u32 {
            Ok(())
        } else if filter.deadband_type == DeadbandType::Percent as u32 {
            // A percent deadband is only usable when the node publishes its EURange
            match eu_range {
                Some((low, high)) if low < high => Ok(()),
                _ => Err(StatusCode::BadDeadbandFilterInvalid),
            }
        } else {
            Err(StatusCode::BadDeadbandFilterInvalid)
        }
    }
}

/// Takes the requested sampling interval value supplied by client and ensures it is within
/// the range supported by the server. A negative request means "use the publishing interval".
pub(crate) fn sanitize_sampling_interval(
    limits: &SubscriptionLimits,
    requested_sampling_interval: f64,
    publishing_interval: f64,
) -> f64 {
    let requested = if requested_sampling_interval < 0.0 {
        publishing_interval
    } else {
        requested_sampling_interval
    };
    if requested < limits.min_sampling_interval_ms {
        limits.min_sampling_interval_ms
    } else if requested > limits.max_sampling_interval_ms {
        limits.max_sampling_interval_ms
    } else {
        requested
    }
}

/// Takes the requested queue size and ensures it is within the range supported by the
/// server. A request of 0 leaves the choice to the server; a request of 1 keeps the
/// single-slot overwrite semantics.
pub(crate) fn sanitize_queue_size(limits: &SubscriptionLimits, requested_queue_size: usize) -> usize {
    if requested_queue_size == 0 {
        limits
            .default_monitored_item_queue_size
            .min(limits.max_monitored_item_queue_size)
            .max(1)
    } else if requested_queue_size > limits.max_monitored_item_queue_size {
        limits.max_monitored_item_queue_size
    } else {
        requested_queue_size
    }
}

/// A monitored item request that passed validation and had its sampling rate revised by the
/// namespace, ready to be added to its subscription.
#[derive(Debug)]
pub struct CreateMonitoredItem {
    item_to_monitor: ReadValueId,
    monitoring_mode: MonitoringMode,
    client_handle: u32,
    discard_oldest: bool,
    queue_size: usize,
    sampling_interval: f64,
    filter: FilterType,
    filter_result: Option<EventFilterResult>,
    timestamps_to_return: TimestampsToReturn,
}

impl CreateMonitoredItem {
    /// Validates the filter and sanitizes the requested parameters. A filter failure is
    /// reported through the returned status code; the other parameters are revised
    /// regardless.
    pub fn new(
        req: &MonitoredItemCreateRequest,
        monitors_events: bool,
        limits: &SubscriptionLimits,
        publishing_interval: f64,
        eu_range: Option<(f64, f64)>,
        timestamps_to_return: TimestampsToReturn,
    ) -> Result<Self, (StatusCode, Option<EventFilterResult>)> {
        let (filter_result, filter) =
            FilterType::from_filter(&req.requested_parameters.filter, monitors_events, eu_range);
        let filter = match filter {
            Ok(f) => f,
            Err(e) => return Err((e, filter_result)),
        };
        let sampling_interval = sanitize_sampling_interval(
            limits,
            req.requested_parameters.sampling_interval,
            publishing_interval,
        );
        let queue_size = sanitize_queue_size(limits, req.requested_parameters.queue_size as usize);
        Ok(Self {
            item_to_monitor: req.item_to_monitor.clone(),
            monitoring_mode: req.monitoring_mode,
            client_handle: req.requested_parameters.client_handle,
            discard_oldest: req.requested_parameters.discard_oldest,
            queue_size,
            sampling_interval,
            filter,
            filter_result,
            timestamps_to_return,
        })
    }

    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub(crate) fn set_sampling_interval(&mut self, sampling_interval: f64) {
        self.sampling_interval = sampling_interval;
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn is_event_item(&self) -> bool {
        matches!(self.filter, FilterType::EventFilter(_))
    }

    pub(crate) fn take_filter_result(&mut self) -> Option<EventFilterResult> {
        self.filter_result.take()
    }
}

/// A single sampling or eventing endpoint within a subscription. Holds the bounded queue of
/// notifications awaiting delivery, the filter deciding what enters the queue, and the
/// triggering links to sibling items.
#[derive(Debug)]
pub struct MonitoredItem {
    id: u32,
    item_to_monitor: ReadValueId,
    monitoring_mode: MonitoringMode,
    // Triggered items are other monitored items in the same subscription whose queues are
    // flushed when this item reports a notification.
    triggered_items: BTreeSet<u32>,
    client_handle: u32,
    sampling_interval: f64,
    filter: FilterType,
    discard_oldest: bool,
    queue_size: usize,
    timestamps_to_return: TimestampsToReturn,
    notification_queue: VecDeque<Notification>,
    queue_overflow: bool,
    last_data_value: Option<DataValue>,
}

impl MonitoredItem {
    pub(crate) fn new(id: u32, request: &CreateMonitoredItem) -> Self {
        Self {
            id,
            item_to_monitor: request.item_to_monitor.clone(),
            monitoring_mode: request.monitoring_mode,
            triggered_items: BTreeSet::new(),
            client_handle: request.client_handle,
            sampling_interval: request.sampling_interval,
            filter: request.filter.clone(),
            discard_oldest: request.discard_oldest,
            queue_size: request.queue_size,
            timestamps_to_return: request.timestamps_to_return,
            notification_queue: VecDeque::with_capacity(request.queue_size),
            queue_overflow: false,
            last_data_value: None,
        }
    }

    /// Modifies the existing item with the values of the modify request and the sampling
    /// interval revised by the namespace. A filter parse failure leaves the item untouched.
    /// A successful modify resets the filter state, so the next sample is always queued; no
    /// notification is synthesized from the change itself.
    pub(crate) fn modify(
        &mut self,
        timestamps_to_return: TimestampsToReturn,
        request: &MonitoredItemModifyRequest,
        revised_sampling_interval: f64,
        limits: &SubscriptionLimits,
        eu_range: Option<(f64, f64)>,
    ) -> Result<Option<EventFilterResult>, (StatusCode, Option<EventFilterResult>)> {
        let (filter_result, filter) = FilterType::from_filter(
            &request.requested_parameters.filter,
            self.monitors_events(),
            eu_range,
        );
        let filter = match filter {
            Ok(f) => f,
            Err(e) => return Err((e, filter_result)),
        };
        self.filter = filter;
        self.last_data_value = None;
        self.timestamps_to_return = timestamps_to_return;
        self.client_handle = request.requested_parameters.client_handle;
        self.sampling_interval = revised_sampling_interval;
        self.queue_size =
            sanitize_queue_size(limits, request.requested_parameters.queue_size as usize);
        self.discard_oldest = request.requested_parameters.discard_oldest;

        // Shrink the queue to the new size per the discard policy
        while self.notification_queue.len() > self.queue_size {
            if self.discard_oldest {
                self.notification_queue.pop_front();
            } else {
                self.notification_queue.pop_back();
            }
        }
        Ok(filter_result)
    }

    /// Offers a sampled value to the item. Returns true if the value passed the filter and
    /// was queued.
    pub fn notify_data_value(&mut self, mut value: DataValue) -> bool {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return false;
        }
        let data_change = match (&self.last_data_value, &self.filter) {
            (_, FilterType::EventFilter(_)) => false,
            (Some(last), FilterType::DataChangeFilter { filter, eu_range }) => {
                !filter.compare(&value, last, *eu_range)
                    && self.sampling_interval_elapsed(last, &value)
            }
            (Some(last), FilterType::None) => {
                value.value != last.value && self.sampling_interval_elapsed(last, &value)
            }
            (None, _) => true,
        };
        if !data_change {
            trace!("No data change on item {}", self.id);
            return false;
        }
        self.last_data_value = Some(value.clone());

        match self.timestamps_to_return {
            TimestampsToReturn::Neither | TimestampsToReturn::Invalid => {
                value.source_timestamp = None;
                value.server_timestamp = None;
            }
            TimestampsToReturn::Server => {
                value.source_timestamp = None;
            }
            TimestampsToReturn::Source => {
                value.server_timestamp = None;
            }
            TimestampsToReturn::Both => {
                // DO NOTHING
            }
        }

        let client_handle = self.client_handle;
        self.enqueue(MonitoredItemNotification {
            client_handle,
            value,
        });
        true
    }

    /// Offers an event to the item. Returns true if the event passed the filter and its
    /// fields were queued.
    pub fn notify_event(&mut self, event: &dyn Event) -> bool {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return false;
        }
        let FilterType::EventFilter(filter) = &self.filter else {
            return false;
        };
        let Some(notification) = filter.evaluate(event, self.client_handle) else {
            return false;
        };
        self.enqueue(notification);
        true
    }

    /// Pushes a notification onto the queue, applying the overflow policy when it is full.
    /// A queue of size 1 has overwrite semantics and never carries the overflow bit; larger
    /// queues drop one entry per the discard policy and stamp the overflow bit onto the
    /// surviving entry nearest the drop.
    fn enqueue(&mut self, notification: impl Into<Notification>) {
        if self.queue_size == 1 {
            self.notification_queue.clear();
            self.notification_queue.push_back(notification.into());
            return;
        }
        if self.notification_queue.len() == self.queue_size {
            trace!("Monitored item {} queue overflow", self.id);
            self.queue_overflow = true;
            if self.discard_oldest {
                self.notification_queue.pop_front();
                self.notification_queue.push_back(notification.into());
                Self::mark_overflow(self.notification_queue.front_mut());
            } else {
                // The newest retained entry is replaced
                self.notification_queue.pop_back();
                self.notification_queue.push_back(notification.into());
                Self::mark_overflow(self.notification_queue.back_mut());
            }
        } else {
            self.notification_queue.push_back(notification.into());
        }
    }

    fn mark_overflow(notification: Option<&mut Notification>) {
        if let Some(Notification::DataChange(n)) = notification {
            n.value.status = Some(n.value.status().set_overflow(true));
        }
    }

    /// Dequeues up to `max_notifications` notifications in FIFO order. A max of 0 means no
    /// limit. Returns the notifications and whether any remain queued.
    pub fn drain(&mut self, max_notifications: usize) -> (Vec<Notification>, bool) {
        let take = if max_notifications == 0 {
            self.notification_queue.len()
        } else {
            max_notifications.min(self.notification_queue.len())
        };
        let notifications = self.notification_queue.drain(..take).collect();
        if self.notification_queue.is_empty() {
            self.queue_overflow = false;
        }
        (notifications, !self.notification_queue.is_empty())
    }

    /// Re-queues the last known value, used when a transferred subscription must resend its
    /// current state. Does nothing if that value is already at the back of the queue.
    pub(crate) fn add_current_value_to_queue(&mut self) {
        let Some(value) = self.last_data_value.as_ref() else {
            return;
        };
        if let Some(Notification::DataChange(n)) = self.notification_queue.back() {
            if &n.value == value {
                return;
            }
        }
        let notification = MonitoredItemNotification {
            client_handle: self.client_handle,
            value: value.clone(),
        };
        self.enqueue(notification);
    }

    /// Monitored items sample no faster than their revised sampling interval, so a value
    /// arriving before the interval has elapsed since the last reported sample is dropped.
    /// Values without source timestamps cannot be rate limited and always pass.
    fn sampling_interval_elapsed(&self, old: &DataValue, new: &DataValue) -> bool {
        let (Some(old), Some(new)) = (&old.source_timestamp, &new.source_timestamp) else {
            return true;
        };
        let elapsed = new.signed_duration_since(*old);
        elapsed >= chrono::Duration::milliseconds(self.sampling_interval as i64)
    }

    /// Disabling an item discards its queue. Other transitions keep the queue as is and
    /// never synthesize samples.
    pub fn set_monitoring_mode(&mut self, monitoring_mode: MonitoringMode) {
        if monitoring_mode == MonitoringMode::Disabled {
            self.notification_queue.clear();
            self.queue_overflow = false;
        }
        self.monitoring_mode = monitoring_mode;
    }

    pub(crate) fn add_triggered_item(&mut self, id: u32) {
        self.triggered_items.insert(id);
    }

    pub(crate) fn remove_triggered_item(&mut self, id: u32) -> bool {
        self.triggered_items.remove(&id)
    }

    pub fn triggered_items(&self) -> &BTreeSet<u32> {
        &self.triggered_items
    }

    pub fn has_notifications(&self) -> bool {
        !self.notification_queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.notification_queue.len()
    }

    pub fn queue_overflow(&self) -> bool {
        self.queue_overflow
    }

    pub fn has_last_value(&self) -> bool {
        self.last_data_value.is_some()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn monitors_events(&self) -> bool {
        matches!(self.filter, FilterType::EventFilter(_))
    }
}
