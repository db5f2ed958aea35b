use std::time::Duration;

use chrono::Utc;

use crate::{
    subscriptions::{
        CreateMonitoredItem, HandledState, Subscription, SubscriptionState,
        SubscriptionStateParams, TickReason, UpdateStateAction,
    },
    types::{
        DataValue, MonitoringMode, NotificationData, StatusCode, TimestampsToReturn, Variant,
    },
};

use super::{monitored_item_create_request, test_limits};

const DEFAULT_LIFETIME_COUNT: u32 = 300;
const DEFAULT_KEEPALIVE_COUNT: u32 = 100;

fn make_subscription(state: SubscriptionState) -> Subscription {
    let mut subscription = Subscription::new(
        1,
        true,
        Duration::from_millis(1000),
        DEFAULT_LIFETIME_COUNT,
        DEFAULT_KEEPALIVE_COUNT,
        0,
        0,
        1024,
    );
    subscription.set_state(state);
    subscription
}

fn make_params(
    notifications_available: bool,
    more_notifications: bool,
    publishing_req_queued: bool,
) -> SubscriptionStateParams {
    SubscriptionStateParams {
        notifications_available,
        more_notifications,
        publishing_req_queued,
    }
}

fn add_data_item(subscription: &mut Subscription, client_handle: u32, queue_size: u32) -> u32 {
    let request = monitored_item_create_request(
        crate::types::NodeId::new_numeric(1, 100),
        client_handle,
        queue_size,
        true,
    );
    let create = CreateMonitoredItem::new(
        &request,
        false,
        &test_limits(),
        1000.0,
        None,
        TimestampsToReturn::Both,
    )
    .unwrap();
    subscription.create_monitored_item(&create)
}

fn notify_value(subscription: &mut Subscription, monitored_item_id: u32, value: i32) {
    subscription.notify_data_value(
        monitored_item_id,
        DataValue::new_at(Variant::Int32(value), Utc::now()),
    );
}

#[test]
fn basic_subscription() {
    let subscription = Subscription::new(
        1,
        true,
        Duration::from_millis(1000),
        DEFAULT_LIFETIME_COUNT,
        DEFAULT_KEEPALIVE_COUNT,
        0,
        0,
        1024,
    );
    assert_eq!(subscription.state(), SubscriptionState::Creating);
}

// The update_state_ tests below feed a set of inputs into the state machine and expect the
// subscription to move from one state to another with the action from the Part 4 table.

#[test]
fn update_state_3() {
    // Test #3 - state changes from Creating -> Normal
    let mut s = make_subscription(SubscriptionState::Creating);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(true, false, true),
    );
    assert_eq!(handled, HandledState::Create3);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::Normal);
    assert!(!s.first_message_sent());
}

#[test]
fn update_state_4() {
    // Test #4 - receive a publish request with publishing disabled; nothing happens, the
    // request stays queued at the session level
    let mut s = make_subscription(SubscriptionState::Normal);
    s.set_publishing_enabled(false);
    let (handled, action) = s.update_state(
        TickReason::ReceivePublishRequest,
        make_params(true, false, true),
    );
    assert_eq!(handled, HandledState::Normal4);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::Normal);
}

#[test]
fn update_state_5() {
    // Test #5 - publish request arrives while leftover notifications remain; they go out
    // immediately and the lifetime counter resets
    let mut s = make_subscription(SubscriptionState::Normal);
    s.test_set_lifetime_counter(1);
    s.test_set_more_notifications(true);
    let (handled, action) = s.update_state(
        TickReason::ReceivePublishRequest,
        make_params(true, true, true),
    );
    assert_eq!(handled, HandledState::Normal5);
    assert_eq!(action, UpdateStateAction::ReturnNotifications);
    assert_eq!(s.state(), SubscriptionState::Normal);
    assert_eq!(s.lifetime_counter(), s.max_lifetime_counter());
    assert!(s.first_message_sent());
}

#[test]
fn update_state_6() {
    // Test #6 - interval elapses with a publish queued, publishing on and notifications
    // available
    let mut s = make_subscription(SubscriptionState::Normal);
    s.test_set_lifetime_counter(3);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(true, false, true),
    );
    assert_eq!(handled, HandledState::IntervalElapsed6);
    assert_eq!(action, UpdateStateAction::ReturnNotifications);
    assert_eq!(s.state(), SubscriptionState::Normal);
    // Reset to max then decremented by the publishing timer restart
    assert_eq!(s.lifetime_counter(), DEFAULT_LIFETIME_COUNT - 1);
    assert!(s.first_message_sent());
}

#[test]
fn update_state_7() {
    // Test #7 - interval elapses, nothing to send, first message not yet sent; a keep-alive
    // goes out
    let mut s = make_subscription(SubscriptionState::Normal);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, true),
    );
    assert_eq!(handled, HandledState::IntervalElapsed7);
    assert_eq!(action, UpdateStateAction::ReturnKeepAlive);
    assert_eq!(s.state(), SubscriptionState::Normal);
    assert!(s.first_message_sent());
}

#[test]
fn update_state_8() {
    // Test #8 - interval elapses with no publish request available; subscription goes late
    let mut s = make_subscription(SubscriptionState::Normal);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(true, false, false),
    );
    assert_eq!(handled, HandledState::IntervalElapsed8);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::Late);
    assert_eq!(s.lifetime_counter(), DEFAULT_LIFETIME_COUNT - 1);
}

#[test]
fn update_state_9() {
    // Test #9 - interval elapses, message already sent, nothing new; move to keep-alive
    let mut s = make_subscription(SubscriptionState::Normal);
    s.test_set_first_message_sent();
    s.test_set_keep_alive_counter(1);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, false),
    );
    assert_eq!(handled, HandledState::IntervalElapsed9);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::KeepAlive);
    assert_eq!(s.keep_alive_counter(), DEFAULT_KEEPALIVE_COUNT);
}

#[test]
fn update_state_10() {
    // Test #10 - late subscription receives a publish request and has notifications
    let mut s = make_subscription(SubscriptionState::Late);
    let (handled, action) = s.update_state(
        TickReason::ReceivePublishRequest,
        make_params(true, false, true),
    );
    assert_eq!(handled, HandledState::Late10);
    assert_eq!(action, UpdateStateAction::ReturnNotifications);
    assert_eq!(s.state(), SubscriptionState::Normal);
    assert!(s.first_message_sent());
}

#[test]
fn update_state_11() {
    // Test #11 - late subscription receives a publish request with nothing to send
    let mut s = make_subscription(SubscriptionState::Late);
    let (handled, action) = s.update_state(
        TickReason::ReceivePublishRequest,
        make_params(false, false, true),
    );
    assert_eq!(handled, HandledState::Late11);
    assert_eq!(action, UpdateStateAction::ReturnKeepAlive);
    assert_eq!(s.state(), SubscriptionState::KeepAlive);
    assert!(s.first_message_sent());
}

#[test]
fn update_state_12() {
    // Test #12 - late subscription, interval elapses again with still no request
    let mut s = make_subscription(SubscriptionState::Late);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, false),
    );
    assert_eq!(handled, HandledState::Late12);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::Late);
}

#[test]
fn update_state_13() {
    // Test #13 - keep-alive subscription receives a publish request; it just queues
    let mut s = make_subscription(SubscriptionState::KeepAlive);
    let (handled, action) = s.update_state(
        TickReason::ReceivePublishRequest,
        make_params(false, false, true),
    );
    assert_eq!(handled, HandledState::KeepAlive13);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::KeepAlive);
}

#[test]
fn update_state_14() {
    // Test #14 - keep-alive subscription has notifications and a queued request; back to
    // normal publishing
    let mut s = make_subscription(SubscriptionState::KeepAlive);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(true, false, true),
    );
    assert_eq!(handled, HandledState::KeepAlive14);
    assert_eq!(action, UpdateStateAction::ReturnNotifications);
    assert_eq!(s.state(), SubscriptionState::Normal);
}

#[test]
fn update_state_15() {
    // Test #15 - keep-alive counter expires with a request queued; send a keep-alive
    let mut s = make_subscription(SubscriptionState::KeepAlive);
    s.test_set_keep_alive_counter(1);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, true),
    );
    assert_eq!(handled, HandledState::KeepAlive15);
    assert_eq!(action, UpdateStateAction::ReturnKeepAlive);
    assert_eq!(s.keep_alive_counter(), DEFAULT_KEEPALIVE_COUNT);
}

#[test]
fn update_state_16() {
    // Test #16 - keep-alive counter still running down
    let mut s = make_subscription(SubscriptionState::KeepAlive);
    s.test_set_keep_alive_counter(3);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, false),
    );
    assert_eq!(handled, HandledState::KeepAlive16);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.keep_alive_counter(), 2);
}

#[test]
fn update_state_17() {
    // Test #17 - keep-alive counter expired but no request available; go late
    let mut s = make_subscription(SubscriptionState::KeepAlive);
    s.test_set_keep_alive_counter(1);
    let (handled, action) = s.update_state(
        TickReason::TickTimerFired,
        make_params(false, false, false),
    );
    assert_eq!(handled, HandledState::KeepAlive17);
    assert_eq!(action, UpdateStateAction::None);
    assert_eq!(s.state(), SubscriptionState::Late);
}

#[test]
fn update_state_27() {
    // Test #27 - lifetime counter expires; the subscription closes
    for state in [
        SubscriptionState::Normal,
        SubscriptionState::Late,
        SubscriptionState::KeepAlive,
    ] {
        let mut s = make_subscription(state);
        s.test_set_lifetime_counter(1);
        let (handled, action) = s.update_state(
            TickReason::TickTimerFired,
            make_params(false, false, false),
        );
        assert_eq!(handled, HandledState::Closed27);
        assert_eq!(action, UpdateStateAction::SubscriptionExpired);
        assert_eq!(s.state(), SubscriptionState::Closed);
    }
}

#[test]
fn sequence_numbers_strictly_increase() {
    let mut s = make_subscription(SubscriptionState::Normal);
    let item_id = add_data_item(&mut s, 900, 10);

    notify_value(&mut s, item_id, 1);
    let now = Utc::now();
    let first = s.assemble_notification(&now);
    assert_eq!(first.sequence_number, 1);

    // A keep-alive carries the next number without consuming it
    let keep_alive = s.keep_alive_message(&now);
    assert_eq!(keep_alive.sequence_number, 2);
    assert!(keep_alive.is_keep_alive());
    assert_eq!(s.next_sequence_number(), 2);

    notify_value(&mut s, item_id, 2);
    let second = s.assemble_notification(&now);
    assert_eq!(second.sequence_number, 2);
}

#[test]
fn acknowledge_and_republish() {
    let mut s = make_subscription(SubscriptionState::Normal);
    let item_id = add_data_item(&mut s, 900, 10);
    notify_value(&mut s, item_id, 1);
    let now = Utc::now();
    let message = s.assemble_notification(&now);

    // The retained message is returned verbatim
    assert_eq!(s.republish(1), Some(message));
    assert_eq!(s.available_sequence_numbers(), Some(vec![1]));

    assert_eq!(s.acknowledge(1), StatusCode::Good);
    assert_eq!(s.republish(1), None);
    assert_eq!(s.acknowledge(1), StatusCode::BadSequenceNumberUnknown);
    // A sequence number that was never emitted
    assert_eq!(s.republish(99), None);
}

#[test]
fn retained_messages_evict_oldest() {
    let mut s = Subscription::new(1, true, Duration::from_millis(1000), 300, 100, 0, 0, 2);
    s.set_state(SubscriptionState::Normal);
    let item_id = add_data_item(&mut s, 900, 10);
    let now = Utc::now();
    for i in 0..3 {
        notify_value(&mut s, item_id, i);
        s.assemble_notification(&now);
    }
    // Cap of 2 - the first message fell off the front
    assert_eq!(s.available_sequence_numbers(), Some(vec![2, 3]));
    assert_eq!(s.republish(1), None);
    assert!(s.republish(2).is_some());
}

#[test]
fn assemble_respects_max_notifications() {
    let mut s = Subscription::new(1, true, Duration::from_millis(1000), 300, 100, 0, 2, 1024);
    s.set_state(SubscriptionState::Normal);
    let item_id = add_data_item(&mut s, 900, 10);
    for i in 0..5 {
        notify_value(&mut s, item_id, i);
    }
    let now = Utc::now();
    let first = s.assemble_notification(&now);
    assert_eq!(first.notification_count(), 2);
    assert!(s.more_notifications());
    let second = s.assemble_notification(&now);
    assert_eq!(second.notification_count(), 2);
    let third = s.assemble_notification(&now);
    assert_eq!(third.notification_count(), 1);
    assert!(!s.more_notifications());
}

#[test]
fn assemble_round_robins_items() {
    let mut s = Subscription::new(1, true, Duration::from_millis(1000), 300, 100, 0, 1, 1024);
    s.set_state(SubscriptionState::Normal);
    let first_item = add_data_item(&mut s, 1, 10);
    let second_item = add_data_item(&mut s, 2, 10);
    notify_value(&mut s, first_item, 1);
    notify_value(&mut s, second_item, 2);

    let now = Utc::now();
    let first = s.assemble_notification(&now);
    let second = s.assemble_notification(&now);
    let handle_of = |message: &crate::types::NotificationMessage| match message
        .notification_data
        .as_ref()
        .unwrap()
        .first()
        .unwrap()
    {
        NotificationData::DataChange(d) => {
            d.monitored_items.as_ref().unwrap().first().unwrap().client_handle
        }
        _ => panic!("expected a data change"),
    };
    // One item per message, in item order, neither starved
    assert_eq!(handle_of(&first), 1);
    assert_eq!(handle_of(&second), 2);
    assert_eq!(first.notification_count(), 1);
    assert_eq!(second.notification_count(), 1);
}

#[test]
fn triggered_sampling_items_flush_into_message() {
    let mut s = make_subscription(SubscriptionState::Normal);
    let trigger = add_data_item(&mut s, 1, 10);
    let sampling = add_data_item(&mut s, 2, 10);
    let disabled = add_data_item(&mut s, 3, 10);
    s.get_mut(sampling)
        .unwrap()
        .set_monitoring_mode(MonitoringMode::Sampling);

    // Queue onto the sampling item before disabling its sibling
    for i in 0..3 {
        notify_value(&mut s, sampling, i);
    }
    notify_value(&mut s, disabled, 1);
    s.get_mut(disabled)
        .unwrap()
        .set_monitoring_mode(MonitoringMode::Disabled);

    let (remove_results, add_results) =
        s.set_triggering(trigger, &[sampling, disabled], &[]).unwrap();
    assert!(remove_results.is_empty());
    assert_eq!(add_results, vec![StatusCode::Good, StatusCode::Good]);

    notify_value(&mut s, trigger, 42);
    let now = Utc::now();
    let message = s.assemble_notification(&now);
    // The trigger's own notification plus the three flushed from the sampling item; the
    // disabled item contributes nothing
    assert_eq!(message.notification_count(), 4);
    assert!(!s.get(sampling).unwrap().has_notifications());
}

#[test]
fn set_triggering_validates_links() {
    let mut s = make_subscription(SubscriptionState::Normal);
    let trigger = add_data_item(&mut s, 1, 10);
    let linked = add_data_item(&mut s, 2, 10);

    // Unknown triggering item is a service level error
    assert_eq!(
        s.set_triggering(999, &[linked], &[]).unwrap_err(),
        StatusCode::BadMonitoredItemIdInvalid
    );

    // Removing a link that was never added fails per link, adding an unknown target too
    let (remove_results, add_results) = s.set_triggering(trigger, &[999], &[linked]).unwrap();
    assert_eq!(remove_results, vec![StatusCode::BadMonitoredItemIdInvalid]);
    assert_eq!(add_results, vec![StatusCode::BadMonitoredItemIdInvalid]);

    // Add then remove works
    let (_, add_results) = s.set_triggering(trigger, &[linked], &[]).unwrap();
    assert_eq!(add_results, vec![StatusCode::Good]);
    let (remove_results, _) = s.set_triggering(trigger, &[], &[linked]).unwrap();
    assert_eq!(remove_results, vec![StatusCode::Good]);
}
