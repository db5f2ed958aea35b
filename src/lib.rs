// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Server side subscription machinery for OPC UA - subscriptions, monitored items and the
//! publish request / response mechanism described by OPC UA Part 4, section 5.13.
//!
//! The crate revolves around a handful of types:
//!
//! * [`subscriptions::SubscriptionManager`] - one per session. Receives every subscription
//!   related service request, owns the session's subscriptions and its publish request queue.
//! * [`subscriptions::Subscription`] - the publishing state machine, its keep alive / lifetime
//!   counters and the retransmission queue used by the Republish service.
//! * [`subscriptions::MonitoredItem`] - a data change or event sampling queue within a
//!   subscription, with filtering, overflow handling and triggering links.
//! * [`server::ServerRegistry`] - the server wide subscription index and the registry of
//!   [`namespace::Namespace`] implementations that service attribute sampling.
//!
//! Transport, sessions, security and the address space itself live elsewhere. Requests enter
//! through the [`service::ServiceRequest`] abstraction and leave through its oneshot response
//! channel, so the crate can be driven equally well by a real server stack or by tests.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

/// Tracing macro for obtaining a lock on a `Mutex`. Sometimes deadlocks can happen in code,
/// and if they do, this macro is useful for finding out where they happened.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {{
        let v = $x.lock();
        v
    }};
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {{
        let v = $x.read();
        v
    }};
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {{
        let v = $x.write();
        v
    }};
}

pub mod config;
pub mod constants;
mod handle;
pub mod namespace;
pub mod server;
pub mod service;
pub mod subscriptions;
pub mod sync;
pub mod types;

pub use handle::{AtomicHandle, Handle};

#[cfg(test)]
mod tests;
