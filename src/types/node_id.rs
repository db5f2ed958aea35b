// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NodeId`.

use std::fmt;

use crate::types::string::UAString;

/// The kind of identifier held within a `NodeId`.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(UAString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
        }
    }
}

/// An identifier for a node in the address space of an OPC UA server. Nodes belong to a
/// namespace identified by index; the index is what routes monitored item callbacks to the
/// right [`crate::namespace::Namespace`].
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct NodeId {
    /// The index for a namespace
    pub namespace: u16,
    /// The identifier for the node in the address space
    pub identifier: Identifier,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

impl NodeId {
    /// Constructs a new NodeId from a namespace and a numeric identifier
    pub fn new_numeric(namespace: u16, value: u32) -> NodeId {
        NodeId {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Constructs a new NodeId from a namespace and a string identifier
    pub fn new_string<T>(namespace: u16, value: T) -> NodeId
    where
        T: Into<UAString>,
    {
        NodeId {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// Returns the null node id, `ns=0;i=0`
    pub fn null() -> NodeId {
        NodeId::new_numeric(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }
}
