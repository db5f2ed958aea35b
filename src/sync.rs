// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Re-exports the locks used throughout the crate. All locking goes through the
//! `trace_lock!` family of macros so a deadlock can be narrowed down by uncommenting
//! the tracing in those macros.

pub use parking_lot::{Mutex, RwLock};
