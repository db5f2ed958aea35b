// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use hashbrown::HashMap;

use crate::{
    types::{
        DataValue, DateTimeUtc, EventFieldList, MonitoredItemNotification, MonitoringMode,
        NotificationMessage, StatusCode,
    },
    Handle,
};

use super::monitored_item::{CreateMonitoredItem, MonitoredItem, Notification};
use crate::namespace::Event;

/// The state of the subscription, from OPC UA Part 4 5.13.1.2
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SubscriptionState {
    Closed,
    Creating,
    Normal,
    Late,
    KeepAlive,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum TickReason {
    ReceivePublishRequest,
    TickTimerFired,
}

/// The inputs to a state transition beyond the subscription's own variables.
#[derive(Debug, Copy, Clone)]
pub(crate) struct SubscriptionStateParams {
    /// A monitored item in reporting mode has something queued
    pub notifications_available: bool,
    /// The last assembled message left notifications behind, i.e. the queue did not fit
    /// within max notifications per publish
    pub more_notifications: bool,
    /// The session has a publish request waiting
    pub publishing_req_queued: bool,
}

/// What the owning manager must do after a tick.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum UpdateStateAction {
    None,
    /// Dequeue a publish request and answer it with an empty keep-alive message
    ReturnKeepAlive,
    /// Dequeue a publish request and answer it with an assembled notification message
    ReturnNotifications,
    /// The subscription's lifetime expired; close it and emit a `BadTimeout` status change
    SubscriptionExpired,
}

/// This is for debugging purposes. It allows the caller to validate the output state if
/// required.
///
/// Values correspond to the state table in OPC UA Part 4 5.13.1.2. States 1, 2 and the
/// service-handled rows are dealt with outside the state machine, which is why they have no
/// entry here.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum HandledState {
    None0 = 0,
    Create3 = 3,
    Normal4 = 4,
    Normal5 = 5,
    IntervalElapsed6 = 6,
    IntervalElapsed7 = 7,
    IntervalElapsed8 = 8,
    IntervalElapsed9 = 9,
    Late10 = 10,
    Late11 = 11,
    Late12 = 12,
    KeepAlive13 = 13,
    KeepAlive14 = 14,
    KeepAlive15 = 15,
    KeepAlive16 = 16,
    KeepAlive17 = 17,
    Closed27 = 27,
}

/// A server side subscription - the publishing state machine, its monitored items and the
/// notification messages retained for the Republish service.
#[derive(Debug)]
pub struct Subscription {
    subscription_id: u32,
    /// The rate the subscription emits notification messages at
    publishing_interval: Duration,
    /// The maximum lifetime count (not the current lifetime counter)
    max_lifetime_counter: u32,
    /// Keep alive count enforced on the subscription
    max_keep_alive_counter: u32,
    /// Relative priority of the subscription. When more than one subscription needs to send
    /// notifications the highest priority subscription gets the publish request first.
    priority: u8,
    /// The parameter that requests publishing to be enabled or disabled
    publishing_enabled: bool,
    /// Maximum notifications per assembled message, 0 means unbounded
    max_notifications_per_publish: usize,
    /// Map of monitored items by monitored item id
    monitored_items: HashMap<u32, MonitoredItem>,
    /// Allocator for monitored item ids, unique within the subscription
    item_ids: Handle,
    /// State of the subscription
    state: SubscriptionState,
    /// A value that contains the number of consecutive publishing timer expirations without
    /// client activity before the subscription is terminated.
    lifetime_counter: u32,
    /// Keep alive counter decrements when there are no notifications to publish and when it
    /// expires requests to send an empty notification as a keep alive event
    keep_alive_counter: u32,
    /// Set to true whenever a NotificationMessage or keep-alive has been sent on the
    /// subscription. Used to ensure one of the two goes out the first time the publishing
    /// timer expires.
    first_message_sent: bool,
    /// Tells the subscription to re-queue the latest value of every monitored item, set when
    /// the subscription is transferred with sendInitialValues
    resend_data: bool,
    /// The sequence number of the next notification message. Wraps from u32::MAX to 1,
    /// never 0. Only assembled messages consume it - keep-alives carry it unchanged.
    next_sequence_number: u32,
    /// The monitored item that was drained last, for round-robin fairness across items
    last_drained_item: u32,
    /// True when the last assembly left notifications queued because of the per-publish cap
    more_notifications: bool,
    /// Sent notification messages retained for Republish, oldest first. Bounded; the oldest
    /// message is evicted when the cap is hit.
    available_messages: VecDeque<NotificationMessage>,
    max_retained_messages: usize,
    /// The time the publishing interval last elapsed
    last_time_publishing_interval_elapsed: Instant,
    /// Serving counter value when this subscription last claimed a publish request, used to
    /// break priority ties round-robin
    last_served: u64,
}

impl Subscription {
    pub fn new(
        subscription_id: u32,
        publishing_enabled: bool,
        publishing_interval: Duration,
        lifetime_counter: u32,
        keep_alive_counter: u32,
        priority: u8,
        max_notifications_per_publish: usize,
        max_retained_messages: usize,
    ) -> Subscription {
        Subscription {
            subscription_id,
            publishing_interval,
            max_lifetime_counter: lifetime_counter,
            max_keep_alive_counter: keep_alive_counter,
            priority,
            publishing_enabled,
            max_notifications_per_publish,
            monitored_items: HashMap::new(),
            item_ids: Handle::new(1),
            // State variables
            state: SubscriptionState::Creating,
            lifetime_counter,
            keep_alive_counter,
            first_message_sent: false,
            resend_data: false,
            next_sequence_number: 1,
            last_drained_item: 0,
            more_notifications: false,
            available_messages: VecDeque::new(),
            max_retained_messages,
            last_time_publishing_interval_elapsed: Instant::now(),
            last_served: 0,
        }
    }

    /// Checks the subscription for anything to do in response to a publishing timer tick or
    /// a freshly queued publish request, updating the state machine as it goes. The caller
    /// acts on the returned action while still holding the subscription's lock.
    pub(crate) fn tick(
        &mut self,
        now_instant: Instant,
        tick_reason: TickReason,
        publishing_req_queued: bool,
    ) -> UpdateStateAction {
        let publishing_interval_elapsed = match tick_reason {
            TickReason::ReceivePublishRequest => false,
            TickReason::TickTimerFired => {
                if self.state == SubscriptionState::Creating {
                    true
                } else {
                    self.test_and_set_publishing_interval_elapsed(now_instant)
                }
            }
        };
        // Tick timer firings between publishing intervals do nothing
        if tick_reason == TickReason::TickTimerFired && !publishing_interval_elapsed {
            return UpdateStateAction::None;
        }

        let p = SubscriptionStateParams {
            notifications_available: self.notifications_available(self.resend_data),
            more_notifications: self.more_notifications,
            publishing_req_queued,
        };
        let transition = self.get_state_transition(tick_reason, p);
        trace!(
            "subscription {} tick: state = {:?}, transition = {:?}, params = {:?}",
            self.subscription_id,
            self.state,
            transition,
            p
        );
        self.handle_state_transition(transition)
    }

    /// Tests if the publishing interval has elapsed since the last time this function was
    /// called, in which case it returns `true` and updates its internal state.
    fn test_and_set_publishing_interval_elapsed(&mut self, now: Instant) -> bool {
        let elapsed = now - self.last_time_publishing_interval_elapsed;
        if elapsed >= self.publishing_interval {
            self.last_time_publishing_interval_elapsed = now;
            true
        } else {
            false
        }
    }

    /// The state transition table from Part 4 5.13.1.2. The layout is written to be as close
    /// as possible to the original document - avoid changing it to clean it up or remove
    /// redundant checks.
    fn get_state_transition(
        &self,
        tick_reason: TickReason,
        p: SubscriptionStateParams,
    ) -> HandledState {
        match (self.state, tick_reason) {
            (SubscriptionState::Creating, _) => HandledState::Create3,
            // State 27 is checked ahead of the per-state interval rows so that a
            // subscription starved of publish requests expires from Normal, Late and
            // KeepAlive alike.
            (
                SubscriptionState::Normal | SubscriptionState::Late | SubscriptionState::KeepAlive,
                TickReason::TickTimerFired,
            ) if self.lifetime_counter == 1 => HandledState::Closed27,
            (SubscriptionState::Normal, TickReason::ReceivePublishRequest)
                if !self.publishing_enabled || (self.publishing_enabled && !p.more_notifications) =>
            {
                HandledState::Normal4
            }
            (SubscriptionState::Normal, TickReason::ReceivePublishRequest)
                if self.publishing_enabled && p.more_notifications =>
            {
                HandledState::Normal5
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if p.publishing_req_queued
                    && self.publishing_enabled
                    && p.notifications_available =>
            {
                HandledState::IntervalElapsed6
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if p.publishing_req_queued
                    && !self.first_message_sent
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::IntervalElapsed7
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if !p.publishing_req_queued
                    && (!self.first_message_sent
                        || self.publishing_enabled && p.notifications_available) =>
            {
                HandledState::IntervalElapsed8
            }
            (SubscriptionState::Normal, TickReason::TickTimerFired)
                if self.first_message_sent
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::IntervalElapsed9
            }
            (SubscriptionState::Late, TickReason::ReceivePublishRequest)
                if self.publishing_enabled
                    && (p.notifications_available || p.more_notifications) =>
            {
                HandledState::Late10
            }
            (SubscriptionState::Late, TickReason::ReceivePublishRequest)
                if !self.publishing_enabled
                    || self.publishing_enabled
                        && !p.notifications_available
                        && !p.more_notifications =>
            {
                HandledState::Late11
            }
            (SubscriptionState::Late, TickReason::TickTimerFired) => HandledState::Late12,
            (SubscriptionState::KeepAlive, TickReason::ReceivePublishRequest) => {
                HandledState::KeepAlive13
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if self.publishing_enabled
                    && p.notifications_available
                    && p.publishing_req_queued =>
            {
                HandledState::KeepAlive14
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if p.publishing_req_queued
                    && self.keep_alive_counter == 1
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::KeepAlive15
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if self.keep_alive_counter > 1
                    && (!self.publishing_enabled
                        || self.publishing_enabled && !p.notifications_available) =>
            {
                HandledState::KeepAlive16
            }
            (SubscriptionState::KeepAlive, TickReason::TickTimerFired)
                if !p.publishing_req_queued
                    && (self.keep_alive_counter == 1
                        || self.keep_alive_counter > 1
                            && self.publishing_enabled
                            && p.notifications_available) =>
            {
                HandledState::KeepAlive17
            }
            _ => HandledState::None0,
        }
    }

    fn handle_state_transition(&mut self, transition: HandledState) -> UpdateStateAction {
        match transition {
            HandledState::None0 => UpdateStateAction::None,
            HandledState::Create3 => {
                self.state = SubscriptionState::Normal;
                self.first_message_sent = false;
                UpdateStateAction::None
            }
            HandledState::Normal4 => {
                // The publish request stays queued at the session level
                UpdateStateAction::None
            }
            HandledState::Normal5 => {
                self.reset_lifetime_counter();
                self.first_message_sent = true;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::IntervalElapsed6 => {
                self.reset_lifetime_counter();
                self.start_publishing_timer();
                self.first_message_sent = true;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::IntervalElapsed7 => {
                self.reset_lifetime_counter();
                self.start_publishing_timer();
                self.first_message_sent = true;
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::IntervalElapsed8 => {
                self.start_publishing_timer();
                self.state = SubscriptionState::Late;
                UpdateStateAction::None
            }
            HandledState::IntervalElapsed9 => {
                self.start_publishing_timer();
                self.reset_keep_alive_counter();
                self.state = SubscriptionState::KeepAlive;
                UpdateStateAction::None
            }
            HandledState::Late10 => {
                self.reset_lifetime_counter();
                self.first_message_sent = true;
                self.state = SubscriptionState::Normal;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::Late11 => {
                self.reset_lifetime_counter();
                self.first_message_sent = true;
                self.state = SubscriptionState::KeepAlive;
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::Late12 => {
                self.start_publishing_timer();
                UpdateStateAction::None
            }
            HandledState::KeepAlive13 => {
                // The publish request stays queued at the session level
                UpdateStateAction::None
            }
            HandledState::KeepAlive14 => {
                self.reset_lifetime_counter();
                self.start_publishing_timer();
                self.first_message_sent = true;
                self.state = SubscriptionState::Normal;
                UpdateStateAction::ReturnNotifications
            }
            HandledState::KeepAlive15 => {
                self.start_publishing_timer();
                self.reset_keep_alive_counter();
                UpdateStateAction::ReturnKeepAlive
            }
            HandledState::KeepAlive16 => {
                self.start_publishing_timer();
                self.keep_alive_counter -= 1;
                UpdateStateAction::None
            }
            HandledState::KeepAlive17 => {
                self.start_publishing_timer();
                self.state = SubscriptionState::Late;
                UpdateStateAction::None
            }
            HandledState::Closed27 => {
                info!(
                    "Subscription {} has expired and will be closed",
                    self.subscription_id
                );
                self.state = SubscriptionState::Closed;
                UpdateStateAction::SubscriptionExpired
            }
        }
    }

    /// True if any reporting item has something queued, or - when the subscription must
    /// resend its data - any reporting item has a last known value to re-queue.
    fn notifications_available(&self, resend_data: bool) -> bool {
        self.monitored_items.values().any(|item| {
            item.monitoring_mode() == MonitoringMode::Reporting
                && (item.has_notifications() || (resend_data && item.has_last_value()))
        })
    }

    /// Assembles one notification message from the queues of reporting monitored items,
    /// visiting items round-robin from just past the item drained last time. Items in
    /// sampling mode that are the target of a triggering link from a reporting item flush
    /// their queues into the same message. The message consumes a sequence number and is
    /// retained for Republish.
    pub(crate) fn assemble_notification(&mut self, now: &DateTimeUtc) -> NotificationMessage {
        let max_notifications = if self.max_notifications_per_publish == 0 {
            usize::MAX
        } else {
            self.max_notifications_per_publish
        };
        let resend_data = std::mem::take(&mut self.resend_data);

        let mut ids: Vec<u32> = self.monitored_items.keys().copied().collect();
        ids.sort_unstable();
        let start = ids
            .iter()
            .position(|id| *id > self.last_drained_item)
            .unwrap_or(0);

        let mut notifications = Vec::new();
        let mut triggered = Vec::new();
        for idx in 0..ids.len() {
            if notifications.len() >= max_notifications {
                break;
            }
            let id = ids[(start + idx) % ids.len()];
            let Some(item) = self.monitored_items.get_mut(&id) else {
                continue;
            };
            if item.monitoring_mode() != MonitoringMode::Reporting {
                continue;
            }
            if resend_data {
                item.add_current_value_to_queue();
            }
            if !item.has_notifications() {
                continue;
            }
            // A reporting item that fires also flushes its triggered siblings
            triggered.extend(item.triggered_items().iter().copied());
            let (mut drained, _) = item.drain(max_notifications - notifications.len());
            notifications.append(&mut drained);
            self.last_drained_item = id;
        }

        for id in triggered {
            if notifications.len() >= max_notifications {
                break;
            }
            let Some(item) = self.monitored_items.get_mut(&id) else {
                continue;
            };
            // Only sampling-mode targets flush; reporting targets already had their turn and
            // disabled targets contribute nothing
            if item.monitoring_mode() != MonitoringMode::Sampling {
                continue;
            }
            let (mut drained, _) = item.drain(max_notifications - notifications.len());
            notifications.append(&mut drained);
        }

        let mut data_change_notifications: Vec<MonitoredItemNotification> = Vec::new();
        let mut event_notifications: Vec<EventFieldList> = Vec::new();
        for notification in notifications {
            match notification {
                Notification::DataChange(n) => data_change_notifications.push(n),
                Notification::Event(n) => event_notifications.push(n),
            }
        }

        let sequence_number = self.take_sequence_number();
        let message = NotificationMessage::data_change(
            sequence_number,
            *now,
            data_change_notifications,
            event_notifications,
        );
        self.more_notifications = self.notifications_available(false);
        self.retain_message(message.clone());
        message
    }

    /// The keep-alive message proving liveness. It carries the sequence number of the next
    /// real message without consuming it, and is not retained for Republish.
    pub(crate) fn keep_alive_message(&self, now: &DateTimeUtc) -> NotificationMessage {
        NotificationMessage::keep_alive(self.next_sequence_number, *now)
    }

    /// Builds and retains a status change message, e.g. `BadTimeout` on lifetime expiry or
    /// `GoodSubscriptionTransferred` when the subscription moves to another session.
    pub(crate) fn status_change_message(
        &mut self,
        now: &DateTimeUtc,
        status: StatusCode,
    ) -> NotificationMessage {
        let sequence_number = self.take_sequence_number();
        let message = NotificationMessage::status_change(sequence_number, *now, status);
        self.retain_message(message.clone());
        message
    }

    fn take_sequence_number(&mut self) -> u32 {
        let sequence_number = self.next_sequence_number;
        // Sequence numbers wrap 1..=u32::MAX, never 0
        self.next_sequence_number = if self.next_sequence_number == u32::MAX {
            1
        } else {
            self.next_sequence_number + 1
        };
        sequence_number
    }

    fn retain_message(&mut self, message: NotificationMessage) {
        if self.available_messages.len() >= self.max_retained_messages {
            let evicted = self.available_messages.pop_front();
            if let Some(evicted) = evicted {
                debug!(
                    "Subscription {} evicting retained message {} to stay within the cap",
                    self.subscription_id, evicted.sequence_number
                );
            }
        }
        self.available_messages.push_back(message);
    }

    /// Deletes an acknowledged message from the retained messages. `Good` if it was there.
    pub fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        let before = self.available_messages.len();
        self.available_messages
            .retain(|m| m.sequence_number != sequence_number);
        if self.available_messages.len() != before {
            StatusCode::Good
        } else {
            StatusCode::BadSequenceNumberUnknown
        }
    }

    /// Finds the retained message with the supplied sequence number for retransmission.
    pub fn republish(&self, sequence_number: u32) -> Option<NotificationMessage> {
        self.available_messages
            .iter()
            .find(|m| m.sequence_number == sequence_number)
            .cloned()
    }

    /// The sequence numbers of every retained message, oldest first, piggybacked onto each
    /// publish response.
    pub fn available_sequence_numbers(&self) -> Option<Vec<u32>> {
        if self.available_messages.is_empty() {
            None
        } else {
            Some(
                self.available_messages
                    .iter()
                    .map(|m| m.sequence_number)
                    .collect(),
            )
        }
    }

    // Monitored item management. All of these run under the subscription's lock, driven by
    // the manager.

    pub(crate) fn create_monitored_item(&mut self, request: &CreateMonitoredItem) -> u32 {
        let monitored_item_id = self.item_ids.next();
        let item = MonitoredItem::new(monitored_item_id, request);
        self.monitored_items.insert(monitored_item_id, item);
        monitored_item_id
    }

    pub(crate) fn remove_monitored_item(&mut self, monitored_item_id: u32) -> Option<MonitoredItem> {
        let removed = self.monitored_items.remove(&monitored_item_id);
        if removed.is_some() {
            // Drop any triggering links that pointed at the removed item
            for item in self.monitored_items.values_mut() {
                item.remove_triggered_item(monitored_item_id);
            }
        }
        removed
    }

    /// Removes every monitored item, e.g. when the subscription is deleted or expires. The
    /// items are returned so the namespaces that sampled for them can be told.
    pub(crate) fn drain_monitored_items(&mut self) -> Vec<MonitoredItem> {
        self.monitored_items.drain().map(|(_, item)| item).collect()
    }

    /// Validates the triggering item then applies removals before additions, returning one
    /// status per link in each direction.
    pub(crate) fn set_triggering(
        &mut self,
        triggering_item_id: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) -> Result<(Vec<StatusCode>, Vec<StatusCode>), StatusCode> {
        if !self.monitored_items.contains_key(&triggering_item_id) {
            return Err(StatusCode::BadMonitoredItemIdInvalid);
        }
        // Targets must be siblings in this subscription
        let add_target_exists: Vec<bool> = links_to_add
            .iter()
            .map(|id| self.monitored_items.contains_key(id))
            .collect();

        let Some(trigger) = self.monitored_items.get_mut(&triggering_item_id) else {
            return Err(StatusCode::BadMonitoredItemIdInvalid);
        };

        let remove_results = links_to_remove
            .iter()
            .map(|id| {
                if trigger.remove_triggered_item(*id) {
                    StatusCode::Good
                } else {
                    StatusCode::BadMonitoredItemIdInvalid
                }
            })
            .collect();

        let add_results = links_to_add
            .iter()
            .zip(add_target_exists)
            .map(|(id, exists)| {
                if exists {
                    trigger.add_triggered_item(*id);
                    StatusCode::Good
                } else {
                    StatusCode::BadMonitoredItemIdInvalid
                }
            })
            .collect();

        Ok((remove_results, add_results))
    }

    pub fn notify_data_value(&mut self, monitored_item_id: u32, value: DataValue) {
        if let Some(item) = self.monitored_items.get_mut(&monitored_item_id) {
            item.notify_data_value(value);
        }
    }

    pub fn notify_event(&mut self, monitored_item_id: u32, event: &dyn Event) {
        if let Some(item) = self.monitored_items.get_mut(&monitored_item_id) {
            item.notify_event(event);
        }
    }

    /// Reset the keep-alive counter to the maximum keep-alive count of the subscription.
    /// The maximum keep-alive count is set by the client when the subscription is created
    /// and may be modified using the ModifySubscription service.
    pub(crate) fn reset_keep_alive_counter(&mut self) {
        self.keep_alive_counter = self.max_keep_alive_counter;
    }

    /// Reset the lifetime counter to the value specified for the lifetime of the
    /// subscription in the CreateSubscription service.
    pub(crate) fn reset_lifetime_counter(&mut self) {
        self.lifetime_counter = self.max_lifetime_counter;
    }

    /// Start or restart the publishing timer and decrement the lifetime counter.
    pub(crate) fn start_publishing_timer(&mut self) {
        self.lifetime_counter -= 1;
        trace!(
            "Subscription {} lifetime counter decremented to {}",
            self.subscription_id,
            self.lifetime_counter
        );
    }

    // Accessors and modifiers used by ModifySubscription and the manager

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SubscriptionState) {
        self.state = state;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn publishing_interval(&self) -> Duration {
        self.publishing_interval
    }

    pub(crate) fn set_publishing_interval(&mut self, publishing_interval: Duration) {
        self.publishing_interval = publishing_interval;
    }

    pub fn publishing_enabled(&self) -> bool {
        self.publishing_enabled
    }

    pub(crate) fn set_publishing_enabled(&mut self, publishing_enabled: bool) {
        self.publishing_enabled = publishing_enabled;
    }

    pub(crate) fn set_max_keep_alive_counter(&mut self, max_keep_alive_counter: u32) {
        self.max_keep_alive_counter = max_keep_alive_counter;
    }

    pub(crate) fn set_max_lifetime_counter(&mut self, max_lifetime_counter: u32) {
        self.max_lifetime_counter = max_lifetime_counter;
    }

    pub(crate) fn set_max_notifications_per_publish(&mut self, max_notifications_per_publish: usize) {
        self.max_notifications_per_publish = max_notifications_per_publish;
    }

    pub(crate) fn set_resend_data(&mut self) {
        self.resend_data = true;
    }

    pub fn more_notifications(&self) -> bool {
        self.more_notifications
    }

    pub fn len(&self) -> usize {
        self.monitored_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitored_items.is_empty()
    }

    pub fn get(&self, monitored_item_id: u32) -> Option<&MonitoredItem> {
        self.monitored_items.get(&monitored_item_id)
    }

    pub(crate) fn get_mut(&mut self, monitored_item_id: u32) -> Option<&mut MonitoredItem> {
        self.monitored_items.get_mut(&monitored_item_id)
    }

    pub fn contains_monitored_item(&self, monitored_item_id: u32) -> bool {
        self.monitored_items.contains_key(&monitored_item_id)
    }

    pub fn monitored_items(&self) -> impl Iterator<Item = &MonitoredItem> {
        self.monitored_items.values()
    }

    pub(crate) fn last_served(&self) -> u64 {
        self.last_served
    }

    pub(crate) fn set_last_served(&mut self, serving: u64) {
        self.last_served = serving;
    }
}

#[cfg(test)]
impl Subscription {
    pub(crate) fn test_set_lifetime_counter(&mut self, counter: u32) {
        self.lifetime_counter = counter;
    }

    pub(crate) fn test_set_keep_alive_counter(&mut self, counter: u32) {
        self.keep_alive_counter = counter;
    }

    pub(crate) fn test_set_first_message_sent(&mut self) {
        self.first_message_sent = true;
    }

    pub(crate) fn test_set_more_notifications(&mut self, more: bool) {
        self.more_notifications = more;
    }

    pub(crate) fn lifetime_counter(&self) -> u32 {
        self.lifetime_counter
    }

    pub(crate) fn keep_alive_counter(&self) -> u32 {
        self.keep_alive_counter
    }

    pub(crate) fn max_lifetime_counter(&self) -> u32 {
        self.max_lifetime_counter
    }

    pub(crate) fn first_message_sent(&self) -> bool {
        self.first_message_sent
    }

    pub(crate) fn next_sequence_number(&self) -> u32 {
        self.next_sequence_number
    }

    pub(crate) fn update_state(
        &mut self,
        tick_reason: TickReason,
        p: SubscriptionStateParams,
    ) -> (HandledState, UpdateStateAction) {
        let transition = self.get_state_transition(tick_reason, p);
        let action = self.handle_state_transition(transition);
        (transition, action)
    }
}
