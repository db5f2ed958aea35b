// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `Variant` and `DataValue` types carried by monitored item samples.

use chrono::{DateTime, Utc};

use crate::types::{node_id::NodeId, status_code::StatusCode, string::UAString};

/// UTC timestamps everywhere internally
pub type DateTimeUtc = DateTime<Utc>;

/// A `Variant` holds the value of an attribute or an event field. This is the scalar subset
/// that attribute sampling and filter evaluation need; arrays and the more exotic built-in
/// types are the concern of the encoding layer, not of subscription bookkeeping.
#[derive(PartialEq, Debug, Clone)]
pub enum Variant {
    /// Empty type has no value
    Empty,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UAString),
    NodeId(Box<NodeId>),
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Empty
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.into())
    }
}

impl From<NodeId> for Variant {
    fn from(v: NodeId) -> Self {
        Variant::NodeId(Box::new(v))
    }
}

impl Variant {
    /// Coerces the value into an `f64` for deadband comparison, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Int32(v) => Some(*v as f64),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt32(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Float(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// A value of an attribute at a point in time, together with its quality and timestamps.
/// Timestamps the client did not ask for are stripped when the value is queued on a
/// monitored item.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct DataValue {
    /// The value. BaseDataType
    pub value: Option<Variant>,
    /// The status associated with the value. Not present implies `Good`.
    pub status: Option<StatusCode>,
    /// The source timestamp. UtcTime.
    pub source_timestamp: Option<DateTimeUtc>,
    /// The server timestamp. UtcTime.
    pub server_timestamp: Option<DateTimeUtc>,
}

impl<T> From<T> for DataValue
where
    T: Into<Variant>,
{
    fn from(value: T) -> Self {
        let now = Utc::now();
        DataValue::new_at(value, now)
    }
}

impl DataValue {
    /// Creates a data value with the supplied value and timestamp for both source and server
    pub fn new_at<V>(value: V, time: DateTimeUtc) -> DataValue
    where
        V: Into<Variant>,
    {
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(time),
            server_timestamp: Some(time),
        }
    }

    /// Returns the status code or `Good` if there is none
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::Good)
    }

    /// Tests if the value held by this data value is known to be good.
    pub fn is_valid(&self) -> bool {
        self.status().is_good()
    }
}
