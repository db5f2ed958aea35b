// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `NotificationMessage` type and the notification payloads it can carry.
//! On the wire each payload travels as an extension object; since this crate stops short of
//! serialization the payloads are held as a plain enum.

use crate::types::{
    data_value::{DataValue, DateTimeUtc, Variant},
    status_code::StatusCode,
};

/// A data change belonging to one monitored item, identified by the client supplied handle.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

/// The selected fields of one event on an event monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Option<Vec<Variant>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataChangeNotification {
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventNotificationList {
    pub events: Option<Vec<EventFieldList>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeNotification {
    pub status: StatusCode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    DataChange(DataChangeNotification),
    Events(EventNotificationList),
    StatusChange(StatusChangeNotification),
}

/// A numbered message delivered through a publish response and retained for republishing
/// until acknowledged. A message with no notification data is a keep-alive.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTimeUtc,
    pub notification_data: Option<Vec<NotificationData>>,
}

impl NotificationMessage {
    /// Create a data change notification message from queued data change and event
    /// notifications. Either list may be empty but not both.
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTimeUtc,
        data_change_notifications: Vec<MonitoredItemNotification>,
        event_notifications: Vec<EventFieldList>,
    ) -> NotificationMessage {
        let mut notification_data = Vec::with_capacity(2);
        if !data_change_notifications.is_empty() {
            notification_data.push(NotificationData::DataChange(DataChangeNotification {
                monitored_items: Some(data_change_notifications),
            }));
        }
        if !event_notifications.is_empty() {
            notification_data.push(NotificationData::Events(EventNotificationList {
                events: Some(event_notifications),
            }));
        }
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(notification_data),
        }
    }

    /// Create a status change notification message
    pub fn status_change(
        sequence_number: u32,
        publish_time: DateTimeUtc,
        status: StatusCode,
    ) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(vec![NotificationData::StatusChange(
                StatusChangeNotification { status },
            )]),
        }
    }

    /// Create a keep-alive notification message. The sequence number is the number of the
    /// next message to be sent; a keep-alive does not consume it.
    pub fn keep_alive(sequence_number: u32, publish_time: DateTimeUtc) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_none()
    }

    /// The number of notifications carried by this message
    pub fn notification_count(&self) -> usize {
        self.notification_data
            .iter()
            .flatten()
            .map(|d| match d {
                NotificationData::DataChange(d) => {
                    d.monitored_items.as_ref().map_or(0, |m| m.len())
                }
                NotificationData::Events(e) => e.events.as_ref().map_or(0, |e| e.len()),
                NotificationData::StatusChange(_) => 1,
            })
            .sum()
    }
}
