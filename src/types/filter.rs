// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the monitored item filter types - the data change filter with its deadband
//! comparison logic, and the event filter with select and where clauses.

use crate::types::{
    data_value::{DataValue, Variant},
    node_id::NodeId,
    qualified_name::QualifiedName,
    status_code::StatusCode,
    string::UAString,
};

/// The condition under which a data change filter considers a value to have changed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DataChangeTrigger {
    Status,
    StatusValue,
    StatusValueTimestamp,
}

/// Deadband type in a data change filter, held as the raw u32 from the wire.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DeadbandType {
    None = 0,
    Absolute = 1,
    Percent = 2,
}

/// A filter deciding whether a new sample of a value attribute differs enough from the last
/// reported sample to be queued on a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeFilter {
    pub trigger: DataChangeTrigger,
    pub deadband_type: u32,
    pub deadband_value: f64,
}

impl DataChangeFilter {
    /// Compares one data value to another and returns true if they are considered the "same"
    /// according to the trigger - status, status/value or status/value/timestamp.
    pub fn compare(&self, v1: &DataValue, v2: &DataValue, eu_range: Option<(f64, f64)>) -> bool {
        match self.trigger {
            DataChangeTrigger::Status => v1.status == v2.status,
            DataChangeTrigger::StatusValue => {
                v1.status == v2.status && self.compare_value_option(&v1.value, &v2.value, eu_range)
            }
            DataChangeTrigger::StatusValueTimestamp => {
                v1.status == v2.status
                    && self.compare_value_option(&v1.value, &v2.value, eu_range)
                    && v1.server_timestamp == v2.server_timestamp
            }
        }
    }

    /// Compares two optional variant values. Returns true if they are considered the "same".
    pub fn compare_value_option(
        &self,
        v1: &Option<Variant>,
        v2: &Option<Variant>,
        eu_range: Option<(f64, f64)>,
    ) -> bool {
        match (v1, v2) {
            (Some(_), None) | (None, Some(_)) => false,
            // If it's always none then it hasn't changed
            (None, None) => true,
            (Some(v1), Some(v2)) => self.compare_value(v1, v2, eu_range).unwrap_or(true),
        }
    }

    /// Compares two values, either a straight value compare or a numeric comparison against
    /// the deadband settings. If a deadband is asked for and the values are not convertible
    /// into a numeric value, the result is false. The result is true if the values are the
    /// same within the limits set.
    ///
    /// The `eu_range` is the engineering unit range the value normally operates between. It is
    /// required for percentage deadband comparison and ignored otherwise.
    ///
    /// # Errors
    ///
    /// `BadDeadbandFilterInvalid` indicates the deadband settings were invalid, e.g. an
    /// unrecognized type, a negative deadband value, or a missing or inverted `eu_range` for
    /// a percentage deadband.
    pub fn compare_value(
        &self,
        v1: &Variant,
        v2: &Variant,
        eu_range: Option<(f64, f64)>,
    ) -> Result<bool, StatusCode> {
        if self.deadband_type == DeadbandType::None as u32 {
            // Straight comparison of values
            return Ok(v1 == v2);
        }
        match (v1.as_f64(), v2.as_f64()) {
            (None, _) | (_, None) => Ok(false),
            (Some(v1), Some(v2)) => {
                if self.deadband_value < 0f64 {
                    Err(StatusCode::BadDeadbandFilterInvalid)
                } else if self.deadband_type == DeadbandType::Absolute as u32 {
                    Ok(Self::abs_compare(v1, v2, self.deadband_value))
                } else if self.deadband_type == DeadbandType::Percent as u32 {
                    match eu_range {
                        None => Err(StatusCode::BadDeadbandFilterInvalid),
                        Some((low, high)) => {
                            if low >= high {
                                Err(StatusCode::BadDeadbandFilterInvalid)
                            } else {
                                Ok(Self::pct_compare(v1, v2, low, high, self.deadband_value))
                            }
                        }
                    }
                } else {
                    // Type is not recognized
                    Err(StatusCode::BadDeadbandFilterInvalid)
                }
            }
        }
    }

    /// Compares the difference between v1 and v2 to the threshold. The two values are
    /// considered equal if their difference is less than or equal to the threshold.
    pub fn abs_compare(v1: f64, v2: f64, threshold_diff: f64) -> bool {
        (v1 - v2).abs() <= threshold_diff
    }

    /// Compares the percentage difference between v1 and v2 using the low-high range as the
    /// comparison. The two values are considered equal if their percentage difference is less
    /// than or equal to the threshold.
    pub fn pct_compare(v1: f64, v2: f64, low: f64, high: f64, threshold_pct_change: f64) -> bool {
        let v1_pct = 100f64 * (v1 - low) / (high - low);
        let v2_pct = 100f64 * (v2 - low) / (high - low);
        (v1_pct - v2_pct).abs() <= threshold_pct_change
    }
}

/// Specifies an attribute of a node relative to an event type, used by select clauses to
/// project event fields and by where clauses to test them.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleAttributeOperand {
    pub type_definition_id: NodeId,
    pub browse_path: Vec<QualifiedName>,
    pub attribute_id: u32,
    pub index_range: UAString,
}

/// The operator of a content filter element. Only `OfType` is evaluated by this server;
/// the remainder exist so that a request carrying them can be rejected cleanly.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FilterOperator {
    Equals,
    IsNull,
    GreaterThan,
    LessThan,
    Like,
    Not,
    And,
    Or,
    OfType,
}

/// An operand of a content filter element.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    Literal(Variant),
    SimpleAttribute(SimpleAttributeOperand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentFilterElement {
    pub filter_operator: FilterOperator,
    pub filter_operands: Vec<FilterOperand>,
}

/// A where clause restricting which events pass an event filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentFilter {
    pub elements: Option<Vec<ContentFilterElement>>,
}

/// The filter on an event monitored item. Select clauses choose the fields delivered with
/// each event notification, the where clause restricts which events are delivered at all.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub select_clauses: Option<Vec<SimpleAttributeOperand>>,
    pub where_clause: ContentFilter,
}

/// Per-clause results returned to the client when an event filter is parsed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventFilterResult {
    pub select_clause_results: Option<Vec<StatusCode>>,
    pub where_clause_results: Option<Vec<StatusCode>>,
}
