// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `StatusCode` type. A status code is a 32-bit value whose top 16 bits identify
//! the code itself and whose bottom 16 bits carry severity and informational flags, such as
//! the overflow bit stamped onto a data value when a monitored item queue overflows.

use std::{
    error::Error,
    fmt,
    fmt::Formatter,
};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

bitflags! {
    pub struct StatusCode: u32 {
        // Flag bits
        const IS_ERROR            = 0x8000_0000;
        const IS_UNCERTAIN        = 0x4000_0000;
        const STATUS_MASK         = 0xffff_0000;
        const BIT_MASK            = 0x0000_ffff;
        const INFO_TYPE_DATA_VALUE = 0x0000_0400;
        const OVERFLOW            = 0x0000_0080;

        // Status codes used by the subscription services, from the canonical Part 6 table
        const Good                             = 0x0000_0000;
        const GoodSubscriptionTransferred      = 0x002d_0000;
        const BadUnexpectedError               = 0x8001_0000;
        const BadInternalError                 = 0x8002_0000;
        const BadTimeout                       = 0x800a_0000;
        const BadNothingToDo                   = 0x800f_0000;
        const BadTooManyOperations             = 0x8010_0000;
        const BadSubscriptionIdInvalid         = 0x8028_0000;
        const BadTimestampsToReturnInvalid     = 0x802b_0000;
        const BadWaitingForInitialData         = 0x8032_0000;
        const BadNodeIdInvalid                 = 0x8033_0000;
        const BadNodeIdUnknown                 = 0x8034_0000;
        const BadAttributeIdInvalid            = 0x8035_0000;
        const BadIndexRangeInvalid             = 0x8036_0000;
        const BadDataEncodingInvalid           = 0x8038_0000;
        const BadDataEncodingUnsupported       = 0x8039_0000;
        const BadMonitoredItemIdInvalid        = 0x8042_0000;
        const BadMonitoredItemFilterInvalid    = 0x8043_0000;
        const BadMonitoredItemFilterUnsupported = 0x8044_0000;
        const BadFilterNotAllowed              = 0x8045_0000;
        const BadEventFilterInvalid            = 0x8047_0000;
        const BadDeadbandFilterInvalid         = 0x8074_0000;
        const BadTooManySubscriptions          = 0x8077_0000;
        const BadTooManyPublishRequests        = 0x8078_0000;
        const BadNoSubscription                = 0x8079_0000;
        const BadSequenceNumberUnknown         = 0x807a_0000;
        const BadMessageNotAvailable           = 0x807b_0000;
        const BadFilterOperatorUnsupported     = 0x80c2_0000;
        const BadTooManyMonitoredItems         = 0x80db_0000;
    }
}

impl StatusCode {
    /// Returns the bit flags of the status code, i.e. it masks out the actual status code value
    pub fn bitflags(&self) -> StatusCode {
        *self & StatusCode::BIT_MASK
    }

    /// Returns the status only, i.e. it masks out any bit flags that come with the status code
    pub fn status(&self) -> StatusCode {
        *self & StatusCode::STATUS_MASK
    }

    /// Tests if the status code is bad
    pub fn is_bad(&self) -> bool {
        self.contains(StatusCode::IS_ERROR)
    }

    /// Tests if the status code is uncertain
    pub fn is_uncertain(&self) -> bool {
        self.contains(StatusCode::IS_UNCERTAIN)
    }

    /// Tests if the status code is good (i.e. not bad or uncertain)
    pub fn is_good(&self) -> bool {
        !self.is_bad() && !self.is_uncertain()
    }

    /// Sets or clears the data value overflow bits on the code
    pub fn set_overflow(&self, overflow: bool) -> StatusCode {
        let overflow_bits = StatusCode::INFO_TYPE_DATA_VALUE | StatusCode::OVERFLOW;
        if overflow {
            *self | overflow_bits
        } else {
            *self & !overflow_bits
        }
    }

    /// Tests if the data value overflow bits are set on the code
    pub fn is_overflow(&self) -> bool {
        self.contains(StatusCode::INFO_TYPE_DATA_VALUE | StatusCode::OVERFLOW)
    }

    /// The name of the status code value, ignoring bit flags
    pub fn name(&self) -> &'static str {
        match self.status() {
            StatusCode::Good => "Good",
            StatusCode::GoodSubscriptionTransferred => "GoodSubscriptionTransferred",
            StatusCode::BadUnexpectedError => "BadUnexpectedError",
            StatusCode::BadInternalError => "BadInternalError",
            StatusCode::BadTimeout => "BadTimeout",
            StatusCode::BadNothingToDo => "BadNothingToDo",
            StatusCode::BadTooManyOperations => "BadTooManyOperations",
            StatusCode::BadSubscriptionIdInvalid => "BadSubscriptionIdInvalid",
            StatusCode::BadTimestampsToReturnInvalid => "BadTimestampsToReturnInvalid",
            StatusCode::BadWaitingForInitialData => "BadWaitingForInitialData",
            StatusCode::BadNodeIdInvalid => "BadNodeIdInvalid",
            StatusCode::BadNodeIdUnknown => "BadNodeIdUnknown",
            StatusCode::BadAttributeIdInvalid => "BadAttributeIdInvalid",
            StatusCode::BadIndexRangeInvalid => "BadIndexRangeInvalid",
            StatusCode::BadDataEncodingInvalid => "BadDataEncodingInvalid",
            StatusCode::BadDataEncodingUnsupported => "BadDataEncodingUnsupported",
            StatusCode::BadMonitoredItemIdInvalid => "BadMonitoredItemIdInvalid",
            StatusCode::BadMonitoredItemFilterInvalid => "BadMonitoredItemFilterInvalid",
            StatusCode::BadMonitoredItemFilterUnsupported => "BadMonitoredItemFilterUnsupported",
            StatusCode::BadFilterNotAllowed => "BadFilterNotAllowed",
            StatusCode::BadEventFilterInvalid => "BadEventFilterInvalid",
            StatusCode::BadDeadbandFilterInvalid => "BadDeadbandFilterInvalid",
            StatusCode::BadTooManySubscriptions => "BadTooManySubscriptions",
            StatusCode::BadTooManyPublishRequests => "BadTooManyPublishRequests",
            StatusCode::BadNoSubscription => "BadNoSubscription",
            StatusCode::BadSequenceNumberUnknown => "BadSequenceNumberUnknown",
            StatusCode::BadMessageNotAvailable => "BadMessageNotAvailable",
            StatusCode::BadFilterOperatorUnsupported => "BadFilterOperatorUnsupported",
            StatusCode::BadTooManyMonitoredItems => "BadTooManyMonitoredItems",
            _ => "Unrecognized status code",
        }
    }
}

// The bitflags! macro implements Debug for StatusCode but it fouls the display because status
// codes are a combination of bits and unique values.

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Displays the StatusCode as its name, or its name+bitflags
        let bits = self.bitflags();
        if bits.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}+{:?}", self.name(), bits)
        }
    }
}

impl Error for StatusCode {}

// Serialize / Deserialize are manually implemented because bitflags! doesn't do it.

impl Serialize for StatusCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

struct StatusCodeVisitor;

impl<'de> Visitor<'de> for StatusCodeVisitor {
    type Value = u32;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an unsigned 32-bit integer")
    }

    fn visit_u32<E>(self, value: u32) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(StatusCode::from_bits_truncate(
            deserializer.deserialize_u32(StatusCodeVisitor)?,
        ))
    }
}

#[test]
fn status_code() {
    assert!(StatusCode::Good.is_good());
    assert!(!StatusCode::Good.is_bad());
    assert!(!StatusCode::Good.is_uncertain());

    assert!(StatusCode::BadTimeout.is_bad());
    assert!(!StatusCode::BadTimeout.is_uncertain());
    assert!(!StatusCode::BadTimeout.is_good());

    assert_eq!(
        StatusCode::Good.set_overflow(true).status(),
        StatusCode::Good
    );
    assert!(StatusCode::Good.set_overflow(true).is_overflow());
    assert!(!StatusCode::Good
        .set_overflow(true)
        .set_overflow(false)
        .is_overflow());
}
