//! Unit tests for the subscription machinery, plus the shared fixtures they lean on - a
//! recording namespace, a minimal event type and builders for the service request structs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{
    config::SubscriptionLimits,
    namespace::{DataItemInfo, Event, EventItemInfo, Namespace},
    server::ServerRegistry,
    service::{RequestMessage, ServiceRequest, ServiceResponse},
    subscriptions::{MonitoredItemHandle, SubscriptionManager},
    sync::Mutex,
    types::*,
};

mod manager;
mod subscription;

/// Limits with the timing floors removed so tests can use zero publishing and sampling
/// intervals and drive everything by explicit ticks.
pub(crate) fn test_limits() -> SubscriptionLimits {
    SubscriptionLimits {
        min_publishing_interval_ms: 0.0,
        min_sampling_interval_ms: 0.0,
        ..Default::default()
    }
}

/// A namespace that revises sampling rates as told and records every callback.
#[derive(Default)]
pub(crate) struct TestNamespace {
    /// Revision to apply on create / modify; `None` echoes the requested rate
    pub revised_sampling_interval: Option<f64>,
    /// Refuse item creation with this code
    pub fail_create: Option<StatusCode>,
    pub eu_range: Option<(f64, f64)>,
    pub data_items_created: Mutex<Vec<DataItemInfo>>,
    pub data_items_modified: Mutex<Vec<DataItemInfo>>,
    pub data_items_deleted: Mutex<Vec<DataItemInfo>>,
    pub event_items_created: Mutex<Vec<EventItemInfo>>,
    pub event_items_deleted: Mutex<Vec<EventItemInfo>>,
    pub mode_changes: Mutex<Vec<(MonitoredItemHandle, NodeId, MonitoringMode)>>,
}

#[async_trait]
impl Namespace for TestNamespace {
    async fn on_create_monitored_item(
        &self,
        _node_id: &NodeId,
        _attribute_id: u32,
        requested_sampling_interval: f64,
    ) -> Result<f64, StatusCode> {
        if let Some(e) = self.fail_create {
            return Err(e);
        }
        Ok(self
            .revised_sampling_interval
            .unwrap_or(requested_sampling_interval))
    }

    async fn on_modify_monitored_item(
        &self,
        requested_sampling_interval: f64,
    ) -> Result<f64, StatusCode> {
        Ok(self
            .revised_sampling_interval
            .unwrap_or(requested_sampling_interval))
    }

    fn eu_range(&self, _node_id: &NodeId) -> Option<(f64, f64)> {
        self.eu_range
    }

    fn on_data_items_created(&self, items: Vec<DataItemInfo>) {
        self.data_items_created.lock().extend(items);
    }

    fn on_data_items_modified(&self, items: Vec<DataItemInfo>) {
        self.data_items_modified.lock().extend(items);
    }

    fn on_data_items_deleted(&self, items: Vec<DataItemInfo>) {
        self.data_items_deleted.lock().extend(items);
    }

    fn on_event_items_created(&self, items: Vec<EventItemInfo>) {
        self.event_items_created.lock().extend(items);
    }

    fn on_event_items_deleted(&self, items: Vec<EventItemInfo>) {
        self.event_items_deleted.lock().extend(items);
    }

    fn on_monitoring_mode_changed(
        &self,
        items: Vec<(MonitoredItemHandle, NodeId, MonitoringMode)>,
    ) {
        self.mode_changes.lock().extend(items);
    }
}

/// An event whose fields are looked up by the final browse name of the select clause.
pub(crate) struct TestEvent {
    pub type_id: NodeId,
    pub fields: Vec<(&'static str, Variant)>,
}

impl Event for TestEvent {
    fn type_id(&self) -> &NodeId {
        &self.type_id
    }

    fn field(&self, operand: &SimpleAttributeOperand) -> Variant {
        let Some(name) = operand.browse_path.last() else {
            return Variant::Empty;
        };
        self.fields
            .iter()
            .find(|(field_name, _)| *field_name == name.name.as_ref())
            .map(|(_, value)| value.clone())
            .unwrap_or(Variant::Empty)
    }
}

pub(crate) fn new_manager() -> (Arc<ServerRegistry>, Arc<SubscriptionManager>, Arc<TestNamespace>)
{
    new_manager_with_namespace(TestNamespace::default())
}

pub(crate) fn new_manager_with_namespace(
    namespace: TestNamespace,
) -> (Arc<ServerRegistry>, Arc<SubscriptionManager>, Arc<TestNamespace>) {
    new_manager_inner(test_limits(), namespace)
}

pub(crate) fn new_manager_with_limits(
    limits: SubscriptionLimits,
) -> (Arc<ServerRegistry>, Arc<SubscriptionManager>, Arc<TestNamespace>) {
    new_manager_inner(limits, TestNamespace::default())
}

fn new_manager_inner(
    limits: SubscriptionLimits,
    namespace: TestNamespace,
) -> (Arc<ServerRegistry>, Arc<SubscriptionManager>, Arc<TestNamespace>) {
    let registry = Arc::new(ServerRegistry::new(limits));
    let namespace = Arc::new(namespace);
    registry.register_namespace(1, namespace.clone());
    let manager = SubscriptionManager::new(registry.clone());
    (registry, manager, namespace)
}

// Request builders

pub(crate) fn create_subscription_request(
    publishing_interval: f64,
    lifetime_count: u32,
    keep_alive_count: u32,
) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        request_header: RequestHeader::new(1),
        requested_publishing_interval: publishing_interval,
        requested_lifetime_count: lifetime_count,
        requested_max_keep_alive_count: keep_alive_count,
        max_notifications_per_publish: 0,
        publishing_enabled: true,
        priority: 0,
    }
}

pub(crate) fn publish_request(
    request_handle: u32,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
) -> PublishRequest {
    PublishRequest {
        request_header: RequestHeader::new(request_handle),
        subscription_acknowledgements: if acknowledgements.is_empty() {
            None
        } else {
            Some(acknowledgements)
        },
    }
}

pub(crate) fn monitored_item_create_request(
    node_id: NodeId,
    client_handle: u32,
    queue_size: u32,
    discard_oldest: bool,
) -> MonitoredItemCreateRequest {
    MonitoredItemCreateRequest {
        item_to_monitor: ReadValueId {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        },
        monitoring_mode: MonitoringMode::Reporting,
        requested_parameters: MonitoringParameters {
            client_handle,
            sampling_interval: 0.0,
            filter: MonitoringFilter::None,
            queue_size,
            discard_oldest,
        },
    }
}

pub(crate) fn event_filter(
    select_names: &[&str],
    of_type: Option<NodeId>,
) -> MonitoringFilter {
    let select_clauses = select_names
        .iter()
        .map(|name| SimpleAttributeOperand {
            type_definition_id: NodeId::null(),
            browse_path: vec![QualifiedName::new(0, *name)],
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
        })
        .collect();
    let elements = of_type.map(|type_id| {
        vec![ContentFilterElement {
            filter_operator: FilterOperator::OfType,
            filter_operands: vec![FilterOperand::Literal(Variant::from(type_id))],
        }]
    });
    MonitoringFilter::EventFilter(EventFilter {
        select_clauses: Some(select_clauses),
        where_clause: ContentFilter { elements },
    })
}

// Response plumbing. Responses to subscription services are produced synchronously (or, for
// publish, by a later tick), so try_recv is enough everywhere.

pub(crate) fn recv_message<Res: std::fmt::Debug>(
    rx: &mut oneshot::Receiver<ServiceResponse<Res>>,
) -> Res {
    match rx.try_recv().expect("expected a response") {
        ServiceResponse::Message(m) => m,
        ServiceResponse::Fault(f) => panic!(
            "expected a response message, got fault {}",
            f.response_header.service_result
        ),
    }
}

pub(crate) fn recv_fault<Res: std::fmt::Debug>(
    rx: &mut oneshot::Receiver<ServiceResponse<Res>>,
) -> StatusCode {
    match rx.try_recv().expect("expected a response") {
        ServiceResponse::Fault(f) => f.response_header.service_result,
        ServiceResponse::Message(m) => panic!("expected a fault, got response {:?}", m),
    }
}

pub(crate) fn recv_nothing<Res>(rx: &mut oneshot::Receiver<ServiceResponse<Res>>) {
    assert!(rx.try_recv().is_err(), "expected no response yet");
}

pub(crate) fn service<Req: RequestMessage, Res>(
    request: Req,
) -> (ServiceRequest<Req, Res>, oneshot::Receiver<ServiceResponse<Res>>) {
    ServiceRequest::new(request, 0)
}
