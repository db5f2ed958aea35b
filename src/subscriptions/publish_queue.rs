// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{collections::VecDeque, time::Instant};

use crate::{
    service::ServiceRequest,
    types::{PublishRequest, PublishResponse, StatusCode},
};

/// A publish request waiting to be claimed by a subscription, with the deadline after which
/// it is expired with a `BadTimeout` fault.
pub struct PendingPublish {
    pub request: ServiceRequest<PublishRequest, PublishResponse>,
    pub deadline: Instant,
}

/// The FIFO of publish requests a session has sent and the server has not yet answered.
/// The publish protocol requires requests to be consumed in arrival order; which subscription
/// gets the request at the head is the manager's priority decision, not the queue's.
pub struct PublishQueue {
    requests: VecDeque<PendingPublish>,
}

impl PublishQueue {
    pub(crate) fn new() -> PublishQueue {
        PublishQueue {
            requests: VecDeque::new(),
        }
    }

    /// Appends a request. If the queue is already at `max_requests` the oldest queued
    /// request is completed with a `BadTooManyPublishRequests` fault to make room.
    pub(crate) fn add_request(&mut self, request: PendingPublish, max_requests: usize) {
        if self.requests.len() >= max_requests {
            if let Some(oldest) = self.requests.pop_front() {
                warn!(
                    "Too many publish requests, returning oldest request {} with a fault",
                    oldest.request.request_id()
                );
                oldest
                    .request
                    .set_service_fault(StatusCode::BadTooManyPublishRequests);
            }
        }
        self.requests.push_back(request);
    }

    /// Non-blocking dequeue of the request at the head of the queue.
    pub(crate) fn poll(&mut self) -> Option<PendingPublish> {
        self.requests.pop_front()
    }

    pub fn is_not_empty(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Completes every queued request whose deadline has passed with a `BadTimeout` fault.
    pub(crate) fn expire_stale_requests(&mut self, now: Instant) {
        let mut idx = 0;
        while idx < self.requests.len() {
            if self.requests[idx].deadline <= now {
                if let Some(expired) = self.requests.remove(idx) {
                    debug!(
                        "Publish request {} has timed out and is being expired",
                        expired.request.request_id()
                    );
                    expired.request.set_service_fault(StatusCode::BadTimeout);
                }
            } else {
                idx += 1;
            }
        }
    }

    /// Completes every queued request with the supplied fault, e.g. `BadNoSubscription`
    /// when the last subscription in the session has been deleted.
    pub(crate) fn fault_all(&mut self, status: StatusCode) {
        for pending in self.requests.drain(..) {
            pending.request.set_service_fault(status);
        }
    }
}
