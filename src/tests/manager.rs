use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{
    server::ServerRegistry,
    service::ServiceResponse,
    subscriptions::{MonitoredItemHandle, SubscriptionManager},
    types::*,
};

use crate::config::SubscriptionLimits;

use super::{
    create_subscription_request, monitored_item_create_request, new_manager,
    new_manager_with_limits, new_manager_with_namespace, publish_request, recv_fault,
    recv_message, recv_nothing, service, test_limits, TestNamespace,
};

fn create_subscription(manager: &Arc<SubscriptionManager>) -> u32 {
    create_subscription_with(manager, create_subscription_request(0.0, 30, 10))
}

fn create_subscription_with(
    manager: &Arc<SubscriptionManager>,
    request: CreateSubscriptionRequest,
) -> u32 {
    let (request, mut rx) = service(request);
    manager.create_subscription(request);
    recv_message(&mut rx).subscription_id
}

async fn create_one_item(
    manager: &Arc<SubscriptionManager>,
    subscription_id: u32,
    item: MonitoredItemCreateRequest,
) -> MonitoredItemCreateResult {
    let mut results = create_items(manager, subscription_id, vec![item]).await;
    results.remove(0)
}

async fn create_items(
    manager: &Arc<SubscriptionManager>,
    subscription_id: u32,
    items: Vec<MonitoredItemCreateRequest>,
) -> Vec<MonitoredItemCreateResult> {
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(10),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(items),
    });
    manager.create_monitored_items(request).await;
    recv_message(&mut rx).results.unwrap()
}

fn queue_publish(
    manager: &Arc<SubscriptionManager>,
    request_handle: u32,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
) -> oneshot::Receiver<ServiceResponse<PublishResponse>> {
    let (request, rx) = service(publish_request(request_handle, acknowledgements));
    manager.publish(request);
    rx
}

fn notify_values(registry: &ServerRegistry, handle: MonitoredItemHandle, values: &[i32]) {
    registry.notify_data_values(
        values
            .iter()
            .map(|v| (handle, DataValue::from(Variant::Int32(*v)))),
    );
}

fn data_notifications(message: &NotificationMessage) -> Vec<&MonitoredItemNotification> {
    message
        .notification_data
        .iter()
        .flatten()
        .filter_map(|d| match d {
            NotificationData::DataChange(d) => d.monitored_items.as_ref(),
            _ => None,
        })
        .flatten()
        .collect()
}

fn status_change_of(message: &NotificationMessage) -> StatusCode {
    match message.notification_data.as_ref().unwrap().first().unwrap() {
        NotificationData::StatusChange(s) => s.status,
        other => panic!("expected a status change, got {:?}", other),
    }
}

#[test]
fn create_subscription_revises_values() {
    let (_, manager, _) = new_manager();
    // Lifetime below 3x the keep alive count is raised, zero keep alive becomes the default
    let (request, mut rx) = service(create_subscription_request(0.0, 5, 10));
    manager.create_subscription(request);
    let response = recv_message(&mut rx);
    assert_eq!(response.revised_lifetime_count, 30);
    assert_eq!(response.revised_max_keep_alive_count, 10);

    let (request, mut rx) = service(create_subscription_request(0.0, 0, 0));
    manager.create_subscription(request);
    let response = recv_message(&mut rx);
    assert_eq!(response.revised_max_keep_alive_count, 10);
    assert_eq!(response.revised_lifetime_count, 30);
    // Subscription ids are unique across the server
    assert_ne!(response.subscription_id, 0);
}

#[test]
fn session_subscription_limit_faults_create() {
    let (_, manager, _) = new_manager_with_limits(SubscriptionLimits {
        max_subscriptions_per_session: 2,
        ..test_limits()
    });
    let first = create_subscription(&manager);
    create_subscription(&manager);
    // The session is full
    let (request, mut rx) = service(create_subscription_request(0.0, 30, 10));
    manager.create_subscription(request);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadTooManySubscriptions);

    // Deleting one makes room again
    let (request, mut rx) = service(DeleteSubscriptionsRequest {
        request_header: RequestHeader::new(2),
        subscription_ids: Some(vec![first]),
    });
    manager.delete_subscriptions(request);
    assert_eq!(recv_message(&mut rx).results, Some(vec![StatusCode::Good]));
    create_subscription(&manager);
}

#[tokio::test]
async fn subscription_item_limit_faults_create_monitored_items() {
    let (_, manager, _) = new_manager_with_limits(SubscriptionLimits {
        max_monitored_items_per_sub: 2,
        ..test_limits()
    });
    let subscription_id = create_subscription(&manager);

    // Three items at once exceed the limit of two; the whole request faults
    let items: Vec<_> = (0u32..3)
        .map(|i| monitored_item_create_request(NodeId::new_numeric(1, 100 + i), i, 1, true))
        .collect();
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(10),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(items),
    });
    manager.create_monitored_items(request).await;
    assert_eq!(recv_fault(&mut rx), StatusCode::BadTooManyMonitoredItems);

    // Two fit exactly
    let results = create_items(
        &manager,
        subscription_id,
        vec![
            monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true),
            monitored_item_create_request(NodeId::new_numeric(1, 101), 2, 1, true),
        ],
    )
    .await;
    assert!(results.iter().all(|r| r.status_code.is_good()));

    // The subscription is now full, so even a single further item faults
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(11),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(vec![monitored_item_create_request(
            NodeId::new_numeric(1, 102),
            3,
            1,
            true,
        )]),
    });
    manager.create_monitored_items(request).await;
    assert_eq!(recv_fault(&mut rx), StatusCode::BadTooManyMonitoredItems);
}

#[test]
fn modify_subscription_unknown_id_faults() {
    let (_, manager, _) = new_manager();
    create_subscription(&manager);
    let (request, mut rx) = service(ModifySubscriptionRequest {
        request_header: RequestHeader::new(2),
        subscription_id: 9999,
        requested_publishing_interval: 100.0,
        requested_lifetime_count: 30,
        requested_max_keep_alive_count: 10,
        max_notifications_per_publish: 0,
        priority: 0,
    });
    manager.modify_subscription(request);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadSubscriptionIdInvalid);
}

#[test]
fn publish_without_subscription_faults() {
    let (_, manager, _) = new_manager();
    let mut rx = queue_publish(&manager, 1, vec![]);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadNoSubscription);
}

#[test]
fn keep_alive_is_published_and_does_not_advance_sequence() {
    let (_registry, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    // Receiving the publish moves Creating -> Normal; the first interval then emits the
    // initial keep-alive
    let mut rx = queue_publish(&manager, 1, vec![]);
    recv_nothing(&mut rx);
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert_eq!(response.subscription_id, subscription_id);
    assert!(response.notification_message.is_keep_alive());
    assert_eq!(response.notification_message.sequence_number, 1);
    assert!(!response.more_notifications);

    // With nothing changing, the next keep-alive takes max_keep_alive_count intervals:
    // one tick enters the keep-alive state, then the counter (10) runs down
    let mut rx = queue_publish(&manager, 2, vec![]);
    for _ in 0..10 {
        manager.periodic_tick();
        recv_nothing(&mut rx);
    }
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert!(response.notification_message.is_keep_alive());
    // Keep-alives never consume a sequence number
    assert_eq!(response.notification_message.sequence_number, 1);
}

#[tokio::test]
async fn data_changes_are_published_with_overflow() {
    let (registry, manager, namespace) = new_manager();
    let subscription_id = create_subscription(&manager);
    let result = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 55, 2, true),
    )
    .await;
    assert_eq!(result.status_code, StatusCode::Good);
    assert_eq!(result.revised_queue_size, 2);
    assert_eq!(namespace.data_items_created.lock().len(), 1);

    let handle = MonitoredItemHandle {
        subscription_id,
        monitored_item_id: result.monitored_item_id,
    };
    // Five changes within one publishing interval on a queue of two
    notify_values(&registry, handle, &[1, 2, 3, 4, 5]);

    let mut rx = queue_publish(&manager, 1, vec![]);
    manager.periodic_tick();
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    let notifications = data_notifications(&response.notification_message);
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].value.value, Some(Variant::Int32(4)));
    assert!(notifications[0].value.status().is_overflow());
    assert_eq!(notifications[1].value.value, Some(Variant::Int32(5)));
    assert!(!notifications[1].value.status().is_overflow());
    assert!(!response.more_notifications);
    assert_eq!(response.notification_message.sequence_number, 1);
    assert_eq!(response.available_sequence_numbers, Some(vec![1]));
}

#[tokio::test]
async fn unsupported_data_encoding_is_a_per_item_result() {
    let (_, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let items: Vec<_> = (0..3)
        .map(|i| {
            let mut item =
                monitored_item_create_request(NodeId::new_numeric(1, 100 + i), i, 1, true);
            item.item_to_monitor.data_encoding = QualifiedName::new(0, "Custom");
            item
        })
        .collect();
    // The service itself succeeds; each item fails on its own
    let results = create_items(&manager, subscription_id, items).await;
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.status_code, StatusCode::BadDataEncodingUnsupported);
    }
}

#[tokio::test]
async fn data_encoding_on_non_value_attribute_is_invalid() {
    let (_, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let mut item = monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true);
    item.item_to_monitor.attribute_id = AttributeId::DisplayName as u32;
    item.item_to_monitor.data_encoding = QualifiedName::new(0, "DefaultBinary");
    let result = create_one_item(&manager, subscription_id, item).await;
    assert_eq!(result.status_code, StatusCode::BadDataEncodingInvalid);
}

#[tokio::test]
async fn create_monitored_items_validations() {
    let (_, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);

    // Unknown subscription
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(10),
        subscription_id: 9999,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(vec![monitored_item_create_request(
            NodeId::new_numeric(1, 100),
            1,
            1,
            true,
        )]),
    });
    manager.create_monitored_items(request).await;
    assert_eq!(recv_fault(&mut rx), StatusCode::BadSubscriptionIdInvalid);

    // Invalid timestamps
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(11),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Invalid,
        items_to_create: Some(vec![monitored_item_create_request(
            NodeId::new_numeric(1, 100),
            1,
            1,
            true,
        )]),
    });
    manager.create_monitored_items(request).await;
    assert_eq!(recv_fault(&mut rx), StatusCode::BadTimestampsToReturnInvalid);

    // Empty item list
    let (request, mut rx) = service(CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(12),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(vec![]),
    });
    manager.create_monitored_items(request).await;
    assert_eq!(recv_fault(&mut rx), StatusCode::BadNothingToDo);

    // Bad index range and unknown namespace fail per item
    let mut bad_range = monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true);
    bad_range.item_to_monitor.index_range = UAString::from("2:1");
    let unknown_namespace = monitored_item_create_request(NodeId::new_numeric(7, 100), 2, 1, true);
    let results = create_items(&manager, subscription_id, vec![bad_range, unknown_namespace]).await;
    assert_eq!(results[0].status_code, StatusCode::BadIndexRangeInvalid);
    assert_eq!(results[1].status_code, StatusCode::BadNodeIdUnknown);
}

#[tokio::test]
async fn namespace_can_refuse_item_creation() {
    let (_, manager, _) = new_manager_with_namespace(TestNamespace {
        fail_create: Some(StatusCode::BadNodeIdUnknown),
        ..Default::default()
    });
    let subscription_id = create_subscription(&manager);
    let result = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true),
    )
    .await;
    assert_eq!(result.status_code, StatusCode::BadNodeIdUnknown);
}

#[tokio::test]
async fn namespace_revises_sampling_interval() {
    let (_, manager, _) = new_manager_with_namespace(TestNamespace {
        revised_sampling_interval: Some(250.0),
        ..Default::default()
    });
    let subscription_id = create_subscription(&manager);
    let result = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true),
    )
    .await;
    assert_eq!(result.status_code, StatusCode::Good);
    assert_eq!(result.revised_sampling_interval, 250.0);
}

#[tokio::test]
async fn negative_sampling_interval_inherits_publishing_interval() {
    let (_, manager, _) = new_manager();
    let subscription_id =
        create_subscription_with(&manager, create_subscription_request(500.0, 30, 10));
    let mut item = monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true);
    item.requested_parameters.sampling_interval = -1.0;
    let result = create_one_item(&manager, subscription_id, item).await;
    assert_eq!(result.status_code, StatusCode::Good);
    assert_eq!(result.revised_sampling_interval, 500.0);
}

#[tokio::test]
async fn modify_monitored_items_updates_and_reports() {
    let (_, manager, namespace) = new_manager();
    let subscription_id = create_subscription(&manager);
    let created = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 5, true),
    )
    .await;

    let (request, mut rx) = service(ModifyMonitoredItemsRequest {
        request_header: RequestHeader::new(20),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_modify: Some(vec![
            MonitoredItemModifyRequest {
                monitored_item_id: created.monitored_item_id,
                requested_parameters: MonitoringParameters {
                    client_handle: 2,
                    sampling_interval: 0.0,
                    filter: MonitoringFilter::None,
                    queue_size: 3,
                    discard_oldest: true,
                },
            },
            MonitoredItemModifyRequest {
                monitored_item_id: 9999,
                requested_parameters: MonitoringParameters {
                    client_handle: 3,
                    sampling_interval: 0.0,
                    filter: MonitoringFilter::None,
                    queue_size: 1,
                    discard_oldest: true,
                },
            },
        ]),
    });
    manager.modify_monitored_items(request).await;
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results[0].status_code, StatusCode::Good);
    assert_eq!(results[0].revised_queue_size, 3);
    assert_eq!(results[1].status_code, StatusCode::BadMonitoredItemIdInvalid);
    assert_eq!(namespace.data_items_modified.lock().len(), 1);
}

#[tokio::test]
async fn delete_monitored_items_notifies_namespace() {
    let (_, manager, namespace) = new_manager();
    let subscription_id = create_subscription(&manager);
    let created = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true),
    )
    .await;

    let (request, mut rx) = service(DeleteMonitoredItemsRequest {
        request_header: RequestHeader::new(30),
        subscription_id,
        monitored_item_ids: Some(vec![created.monitored_item_id, 9999]),
    });
    manager.delete_monitored_items(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results[0], StatusCode::Good);
    assert_eq!(results[1], StatusCode::BadMonitoredItemIdInvalid);
    let deleted = namespace.data_items_deleted.lock();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].handle.monitored_item_id, created.monitored_item_id);
}

#[tokio::test]
async fn set_monitoring_mode_notifies_namespace() {
    let (registry, manager, namespace) = new_manager();
    let subscription_id = create_subscription(&manager);
    let created = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 5, true),
    )
    .await;
    let handle = MonitoredItemHandle {
        subscription_id,
        monitored_item_id: created.monitored_item_id,
    };
    notify_values(&registry, handle, &[1]);

    let (request, mut rx) = service(SetMonitoringModeRequest {
        request_header: RequestHeader::new(40),
        subscription_id,
        monitoring_mode: MonitoringMode::Disabled,
        monitored_item_ids: Some(vec![created.monitored_item_id, 9999]),
    });
    manager.set_monitoring_mode(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results[0], StatusCode::Good);
    assert_eq!(results[1], StatusCode::BadMonitoredItemIdInvalid);

    let changes = namespace.mode_changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].2, MonitoringMode::Disabled);

    // Disabling dropped the queued value, so only keep-alives can follow
    drop(changes);
    let mut rx = queue_publish(&manager, 41, vec![]);
    manager.periodic_tick();
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert!(response.notification_message.is_keep_alive());
}

#[test]
fn delete_subscription_faults_queued_publish_requests() {
    let (registry, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    // Two outstanding publishes with nothing to deliver
    let mut rx1 = queue_publish(&manager, 1, vec![]);
    let mut rx2 = queue_publish(&manager, 2, vec![]);
    recv_nothing(&mut rx1);
    recv_nothing(&mut rx2);

    let (request, mut rx) = service(DeleteSubscriptionsRequest {
        request_header: RequestHeader::new(3),
        subscription_ids: Some(vec![subscription_id, 9999]),
    });
    manager.delete_subscriptions(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results, vec![StatusCode::Good, StatusCode::BadSubscriptionIdInvalid]);

    // The session has no subscriptions left; queued publishes can never be answered
    assert_eq!(recv_fault(&mut rx1), StatusCode::BadNoSubscription);
    assert_eq!(recv_fault(&mut rx2), StatusCode::BadNoSubscription);
    assert_eq!(registry.subscription_count(), 0);
}

#[tokio::test]
async fn republish_returns_retained_messages() {
    let (registry, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let created = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 5, true),
    )
    .await;
    let handle = MonitoredItemHandle {
        subscription_id,
        monitored_item_id: created.monitored_item_id,
    };
    notify_values(&registry, handle, &[1]);
    let mut rx = queue_publish(&manager, 1, vec![]);
    manager.periodic_tick();
    manager.periodic_tick();
    let first = recv_message(&mut rx).notification_message;
    assert_eq!(first.sequence_number, 1);

    // The retained message comes back verbatim
    let (request, mut rx) = service(RepublishRequest {
        request_header: RequestHeader::new(2),
        subscription_id,
        retransmit_sequence_number: 1,
    });
    manager.republish(request);
    assert_eq!(recv_message(&mut rx).notification_message, first);

    // A never-emitted sequence number is unavailable
    let (request, mut rx) = service(RepublishRequest {
        request_header: RequestHeader::new(3),
        subscription_id,
        retransmit_sequence_number: 42,
    });
    manager.republish(request);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadMessageNotAvailable);

    // Acknowledge sequence number 1 through a publish, checking the per-ack results
    notify_values(&registry, handle, &[2]);
    let mut rx = queue_publish(
        &manager,
        4,
        vec![SubscriptionAcknowledgement {
            subscription_id,
            sequence_number: 1,
        }],
    );
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert_eq!(response.results, Some(vec![StatusCode::Good]));
    assert_eq!(response.notification_message.sequence_number, 2);

    // Republish of the acknowledged message is no longer possible
    let (request, mut rx) = service(RepublishRequest {
        request_header: RequestHeader::new(5),
        subscription_id,
        retransmit_sequence_number: 1,
    });
    manager.republish(request);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadMessageNotAvailable);
}

#[test]
fn acknowledgements_report_unknown_subscriptions_and_sequences() {
    let (_, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let mut rx = queue_publish(
        &manager,
        1,
        vec![
            SubscriptionAcknowledgement {
                subscription_id: 9999,
                sequence_number: 1,
            },
            SubscriptionAcknowledgement {
                subscription_id,
                sequence_number: 7,
            },
        ],
    );
    // Nothing to send yet, so run until the initial keep-alive carries the results
    manager.periodic_tick();
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert_eq!(
        response.results,
        Some(vec![
            StatusCode::BadSubscriptionIdInvalid,
            StatusCode::BadSequenceNumberUnknown,
        ])
    );
}

#[tokio::test]
async fn triggering_flushes_sampling_items_into_the_message() {
    let (registry, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let trigger = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 5, true),
    )
    .await;
    let mut sampling_request =
        monitored_item_create_request(NodeId::new_numeric(1, 101), 2, 5, true);
    sampling_request.monitoring_mode = MonitoringMode::Sampling;
    let sampling = create_one_item(&manager, subscription_id, sampling_request).await;
    let mut disabled_request =
        monitored_item_create_request(NodeId::new_numeric(1, 102), 3, 5, true);
    disabled_request.monitoring_mode = MonitoringMode::Disabled;
    let disabled = create_one_item(&manager, subscription_id, disabled_request).await;

    let (request, mut rx) = service(SetTriggeringRequest {
        request_header: RequestHeader::new(2),
        subscription_id,
        triggering_item_id: trigger.monitored_item_id,
        links_to_add: Some(vec![sampling.monitored_item_id, disabled.monitored_item_id]),
        links_to_remove: None,
    });
    manager.set_triggering(request);
    let response = recv_message(&mut rx);
    assert_eq!(
        response.add_results,
        Some(vec![StatusCode::Good, StatusCode::Good])
    );

    // Three samples on the sampling-only item, one on the disabled item, then the trigger
    notify_values(
        &registry,
        MonitoredItemHandle {
            subscription_id,
            monitored_item_id: sampling.monitored_item_id,
        },
        &[10, 11, 12],
    );
    notify_values(
        &registry,
        MonitoredItemHandle {
            subscription_id,
            monitored_item_id: disabled.monitored_item_id,
        },
        &[99],
    );
    notify_values(
        &registry,
        MonitoredItemHandle {
            subscription_id,
            monitored_item_id: trigger.monitored_item_id,
        },
        &[1],
    );

    let mut rx = queue_publish(&manager, 3, vec![]);
    manager.periodic_tick();
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    let notifications = data_notifications(&response.notification_message);
    // The trigger's notification plus the three flushed samples; nothing from the disabled item
    assert_eq!(notifications.len(), 4);
    assert!(notifications.iter().all(|n| n.client_handle != 3));
}

#[test]
fn publishing_disabled_yields_only_keep_alives() {
    let (_, manager, _) = new_manager();
    let mut request = create_subscription_request(0.0, 30, 2);
    request.publishing_enabled = false;
    let subscription_id = create_subscription_with(&manager, request);
    assert_ne!(subscription_id, 0);

    let mut rx = queue_publish(&manager, 1, vec![]);
    manager.periodic_tick();
    manager.periodic_tick();
    // The initial keep-alive
    let response = recv_message(&mut rx);
    assert!(response.notification_message.is_keep_alive());

    // Keep-alives then arrive every max_keep_alive_count intervals, never data
    let mut rx = queue_publish(&manager, 2, vec![]);
    manager.periodic_tick();
    recv_nothing(&mut rx);
    manager.periodic_tick();
    recv_nothing(&mut rx);
    manager.periodic_tick();
    let response = recv_message(&mut rx);
    assert!(response.notification_message.is_keep_alive());
}

#[tokio::test]
async fn lifetime_expiry_emits_status_change() {
    let (registry, manager, namespace) = new_manager();
    let subscription_id =
        create_subscription_with(&manager, create_subscription_request(0.0, 3, 1));
    let created = create_one_item(
        &manager,
        subscription_id,
        monitored_item_create_request(NodeId::new_numeric(1, 100), 1, 1, true),
    )
    .await;
    assert_eq!(created.status_code, StatusCode::Good);

    // No publish requests at all; the lifetime (3) runs out
    for _ in 0..4 {
        manager.periodic_tick();
    }
    assert!(manager.is_empty());
    assert_eq!(registry.subscription_count(), 0);
    // The namespaces were told the items are gone
    assert_eq!(namespace.data_items_deleted.lock().len(), 1);

    // The parked status change is consumed by the next publish
    let mut rx = queue_publish(&manager, 1, vec![]);
    let response = recv_message(&mut rx);
    assert_eq!(response.subscription_id, subscription_id);
    assert_eq!(
        status_change_of(&response.notification_message),
        StatusCode::BadTimeout
    );
}

#[test]
fn transfer_moves_subscription_between_sessions() {
    let (registry, manager_a, _) = new_manager();
    let manager_b = SubscriptionManager::new(registry.clone());
    let subscription_id = create_subscription(&manager_a);

    let (request, mut rx) = service(TransferSubscriptionsRequest {
        request_header: RequestHeader::new(1),
        subscription_ids: Some(vec![subscription_id, 9999]),
        send_initial_values: false,
    });
    manager_b.transfer_subscriptions(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results[0].status_code, StatusCode::Good);
    assert_eq!(results[1].status_code, StatusCode::BadSubscriptionIdInvalid);

    assert!(!manager_a.contains_subscription(subscription_id));
    assert!(manager_b.contains_subscription(subscription_id));

    // The transfer is announced through the new session's publish queue
    let mut rx = queue_publish(&manager_b, 2, vec![]);
    let response = recv_message(&mut rx);
    assert_eq!(response.subscription_id, subscription_id);
    assert_eq!(
        status_change_of(&response.notification_message),
        StatusCode::GoodSubscriptionTransferred
    );

    // The old session has nothing left to publish for
    let mut rx = queue_publish(&manager_a, 3, vec![]);
    assert_eq!(recv_fault(&mut rx), StatusCode::BadNoSubscription);
}

#[test]
fn session_close_without_delete_leaves_subscriptions_transferable() {
    let (registry, manager_a, _) = new_manager();
    let manager_b = SubscriptionManager::new(registry.clone());
    let subscription_id = create_subscription(&manager_a);

    manager_a.session_closed(false);
    assert!(manager_a.is_empty());
    assert_eq!(registry.subscription_count(), 1);

    let (request, mut rx) = service(TransferSubscriptionsRequest {
        request_header: RequestHeader::new(1),
        subscription_ids: Some(vec![subscription_id]),
        send_initial_values: false,
    });
    manager_b.transfer_subscriptions(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(results[0].status_code, StatusCode::Good);
    assert!(manager_b.contains_subscription(subscription_id));
}

#[test]
fn session_close_with_delete_removes_from_registry() {
    let (registry, manager, _) = new_manager();
    create_subscription(&manager);
    manager.session_closed(true);
    assert!(manager.is_empty());
    assert_eq!(registry.subscription_count(), 0);
}

#[test]
fn set_publishing_mode_applies_per_subscription() {
    let (_, manager, _) = new_manager();
    let subscription_id = create_subscription(&manager);
    let (request, mut rx) = service(SetPublishingModeRequest {
        request_header: RequestHeader::new(1),
        publishing_enabled: false,
        subscription_ids: Some(vec![subscription_id, 9999]),
    });
    manager.set_publishing_mode(request);
    let results = recv_message(&mut rx).results.unwrap();
    assert_eq!(
        results,
        vec![StatusCode::Good, StatusCode::BadSubscriptionIdInvalid]
    );
}
