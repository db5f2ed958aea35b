// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NumericRange`, the parsed form of the index range string
//! on a read value id. See OPC UA Part 4 7.22.
//!
//! The string is one of:
//!
//! * empty - no range
//! * `n` - a single index
//! * `n:m` - a range of indices where `n < m`
//! * a comma separated list of the above for multi-dimensional arrays, e.g. `1:2,0:1`
//!
//! Subscription code only needs to validate the range when a monitored item is created and
//! to hand the parsed form on to the namespace doing the sampling.

use std::{fmt, str::FromStr};

use regex::Regex;

#[derive(Debug)]
pub struct NumericRangeError;

impl fmt::Display for NumericRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumericRangeError")
    }
}

impl std::error::Error for NumericRangeError {}

/// A parsed index range. `None` means the entire value.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericRange {
    /// No range
    None,
    /// A single index
    Index(u32),
    /// A range of indices, min < max
    Range(u32, u32),
    /// One entry per dimension, each an Index or a Range
    MultipleRanges(Vec<NumericRange>),
}

impl Default for NumericRange {
    fn default() -> Self {
        NumericRange::None
    }
}

// A dimension must be 10 digits or fewer regardless of leading zeroes, which is sufficient
// for any permissible 32-bit value, and the number of dimensions is also bounded.
const MAX_DIMENSIONS: usize = 10;

impl FromStr for NumericRange {
    type Err = NumericRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(NumericRange::None);
        }
        // <numeric-range> ::= <dimension> [',' <dimension>]
        // <dimension> ::= <index> [':' <index>]
        let parts: Vec<_> = s.split(',').collect();
        match parts.len() {
            1 => Self::parse_dimension(parts[0]),
            2..=MAX_DIMENSIONS => {
                let mut ranges = Vec::with_capacity(parts.len());
                for p in &parts {
                    ranges.push(Self::parse_dimension(p)?);
                }
                Ok(NumericRange::MultipleRanges(ranges))
            }
            _ => Err(NumericRangeError),
        }
    }
}

impl NumericRange {
    pub fn has_range(&self) -> bool {
        *self != NumericRange::None
    }

    fn parse_dimension(s: &str) -> Result<NumericRange, NumericRangeError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new("^(?P<min>[0-9]{1,10})(:(?P<max>[0-9]{1,10}))?$").unwrap();
        }
        let captures = RE.captures(s).ok_or(NumericRangeError)?;
        let min = captures.name("min").ok_or(NumericRangeError)?;
        match captures.name("max") {
            None => min
                .as_str()
                .parse::<u32>()
                .map(NumericRange::Index)
                .map_err(|_| NumericRangeError),
            Some(max) => {
                // Parse as 64-bit and cast down so that an out of range number is an error
                // rather than a panic
                let min = min.as_str().parse::<u64>().map_err(|_| NumericRangeError)?;
                let max = max.as_str().parse::<u64>().map_err(|_| NumericRangeError)?;
                if min >= max || max > u32::MAX as u64 {
                    Err(NumericRangeError)
                } else {
                    Ok(NumericRange::Range(min as u32, max as u32))
                }
            }
        }
    }
}

#[test]
fn valid_numeric_ranges() {
    let valid_ranges = vec![
        ("", NumericRange::None),
        ("0", NumericRange::Index(0)),
        ("0000", NumericRange::Index(0)),
        ("4294967295", NumericRange::Index(4294967295)),
        ("1:2", NumericRange::Range(1, 2)),
        (
            "0:1,2,0:4",
            NumericRange::MultipleRanges(vec![
                NumericRange::Range(0, 1),
                NumericRange::Index(2),
                NumericRange::Range(0, 4),
            ]),
        ),
    ];
    for (s, expected) in valid_ranges {
        let range = s.parse::<NumericRange>();
        assert!(range.is_ok(), "range {} should parse", s);
        assert_eq!(range.unwrap(), expected);
    }
}

#[test]
fn invalid_numeric_ranges() {
    // Malformed, min >= max, or exceeding limits on digits or dimensions
    let invalid_ranges = vec![
        " ", " 1", "1 ", ":", ":1", "1:1", "2:1", "1:", "1:1:2", ",", ",1", "1,", "1,,2",
        "01234567890", "0,1,2,3,4,5,6,7,8,9,10", "4294967296", "0:4294967296",
    ];
    for s in invalid_ranges {
        assert!(
            s.parse::<NumericRange>().is_err(),
            "range {} should not parse",
            s
        );
    }
}
