// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `ServiceRequest` abstraction through which every request enters the
//! subscription machinery. The stack layer constructs one per decoded request and awaits the
//! receiving half of its oneshot channel; the subscription code completes it exactly once,
//! either with a typed response or with a service fault.
//!
//! Publish requests make this indirection essential: their handler returns immediately after
//! queueing the request and some later publishing timer tick produces the response.

use tokio::sync::oneshot;

use crate::types::*;

/// The outcome sent back through the response channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse<Res> {
    Message(Res),
    Fault(ServiceFault),
}

impl<Res> ServiceResponse<Res> {
    /// The service result of the response, `Good` for a message unless its own header says
    /// otherwise.
    pub fn service_result(&self) -> StatusCode
    where
        Res: ResponseMessage,
    {
        match self {
            ServiceResponse::Message(m) => m.response_header().service_result,
            ServiceResponse::Fault(f) => f.response_header.service_result,
        }
    }
}

/// Implemented by request structs so generic plumbing can reach the request header.
pub trait RequestMessage {
    fn request_header(&self) -> &RequestHeader;
}

/// Implemented by response structs so generic plumbing can reach the response header.
pub trait ResponseMessage {
    fn response_header(&self) -> &ResponseHeader;
}

macro_rules! request_message {
    ($( $ty: ty ),+) => {
        $(
            impl RequestMessage for $ty {
                fn request_header(&self) -> &RequestHeader {
                    &self.request_header
                }
            }
        )+
    };
}

macro_rules! response_message {
    ($( $ty: ty ),+) => {
        $(
            impl ResponseMessage for $ty {
                fn response_header(&self) -> &ResponseHeader {
                    &self.response_header
                }
            }
        )+
    };
}

request_message!(
    CreateSubscriptionRequest,
    ModifySubscriptionRequest,
    DeleteSubscriptionsRequest,
    SetPublishingModeRequest,
    CreateMonitoredItemsRequest,
    ModifyMonitoredItemsRequest,
    DeleteMonitoredItemsRequest,
    SetMonitoringModeRequest,
    SetTriggeringRequest,
    PublishRequest,
    RepublishRequest,
    TransferSubscriptionsRequest
);

response_message!(
    CreateSubscriptionResponse,
    ModifySubscriptionResponse,
    DeleteSubscriptionsResponse,
    SetPublishingModeResponse,
    CreateMonitoredItemsResponse,
    ModifyMonitoredItemsResponse,
    DeleteMonitoredItemsResponse,
    SetMonitoringModeResponse,
    SetTriggeringResponse,
    PublishResponse,
    RepublishResponse,
    TransferSubscriptionsResponse
);

/// A single in-flight service request. Consuming `set_response` or `set_service_fault`
/// completes it; dropping it unanswered just closes the channel, which the stack layer
/// treats as a dead session.
#[derive(Debug)]
pub struct ServiceRequest<Req, Res> {
    request: Req,
    request_id: u32,
    response: oneshot::Sender<ServiceResponse<Res>>,
}

impl<Req: RequestMessage, Res> ServiceRequest<Req, Res> {
    /// Creates the request and the receiver the stack layer awaits for its response.
    pub fn new(request: Req, request_id: u32) -> (Self, oneshot::Receiver<ServiceResponse<Res>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                request_id,
                response: tx,
            },
            rx,
        )
    }

    pub fn request(&self) -> &Req {
        &self.request
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn request_header(&self) -> &RequestHeader {
        self.request.request_header()
    }

    pub fn request_handle(&self) -> u32 {
        self.request.request_header().request_handle
    }

    /// Completes the request with a response message.
    pub fn set_response(self, response: Res) {
        // An error means the receiving half is gone, i.e. the session died while the
        // request was in flight. Nothing to do with the response in that case.
        if self.response.send(ServiceResponse::Message(response)).is_err() {
            debug!("Response receiver for request {} is gone", self.request_id);
        }
    }

    /// Completes the request with a service fault carrying the supplied status code.
    pub fn set_service_fault(self, service_result: StatusCode) {
        let fault = ServiceFault::new(self.request.request_header(), service_result);
        if self.response.send(ServiceResponse::Fault(fault)).is_err() {
            debug!("Fault receiver for request {} is gone", self.request_id);
        }
    }
}
