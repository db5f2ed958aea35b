// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The types consumed and produced by the subscription services - status codes, node ids,
//! data values, filters, notifications and the service request / response structs.
//!
//! This is a lean rendition of the OPC UA type system: only the types the subscription
//! machinery touches, and no binary or XML encoding. Field layout follows Part 4 so that an
//! encoding layer can be laid over the top without reshaping anything.

mod attribute;
mod data_value;
mod filter;
mod node_id;
mod notification;
mod numeric_range;
mod qualified_name;
mod service_types;
mod status_code;
mod string;

pub use attribute::AttributeId;
pub use data_value::{DataValue, DateTimeUtc, Variant};
pub use filter::{
    ContentFilter, ContentFilterElement, DataChangeFilter, DataChangeTrigger, DeadbandType,
    EventFilter, EventFilterResult, FilterOperand, FilterOperator, SimpleAttributeOperand,
};
pub use node_id::{Identifier, NodeId};
pub use notification::{
    DataChangeNotification, EventFieldList, EventNotificationList, MonitoredItemNotification,
    NotificationData, NotificationMessage, StatusChangeNotification,
};
pub use numeric_range::{NumericRange, NumericRangeError};
pub use qualified_name::QualifiedName;
pub use service_types::*;
pub use status_code::StatusCode;
pub use string::UAString;
