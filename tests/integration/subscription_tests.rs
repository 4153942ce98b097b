//! Add/Remove-Handler registrations, events, one-shot callbacks and
//! cleanup when a session goes away.

use std::thread;

use ifbind::prelude::*;
use ifbind::rpc::channel::{INBOX_DEPTH, MAILBOX_DEPTH};

use crate::mock_service::{self, ADD_WATCH, GET_TEMP, Harness, PING, REMOVE_WATCH, TEMP};

const CONTEXT: u32 = 0xAB;

fn add_watch(h: &mut Harness, client: &mut LocalClient, threshold: i32) -> u32 {
    let r = h.roundtrip(
        client,
        ADD_WATCH,
        0,
        &[Value::I32(threshold), Value::Reference(CONTEXT)],
    );
    r.result.and_then(|v| v.as_reference()).expect("handle")
}

#[test]
fn alarm_from_another_thread_reaches_the_subscriber() {
    let mut h = mock_service::start();
    let mut owner = h.client();
    let mut bystander = h.client();

    let handle = add_watch(&mut h, &mut owner, 40);
    assert_ne!(handle, 0);
    let notifier = h.probe.take_watch();
    assert_eq!(notifier.handle(), handle);

    let fired = thread::spawn(move || notifier.notify(&[Value::Bool(true), Value::I32(45)]))
        .join()
        .unwrap();
    assert!(fired);
    h.server.poll();

    let (id, event) = owner.next_event().expect("event");
    assert_eq!(id, ADD_WATCH);
    assert_eq!(event.context, CONTEXT);
    assert_eq!(event.params, vec![Value::Bool(true), Value::I32(45)]);
    assert!(bystander.next_event().is_none());
}

#[test]
fn add_then_remove_leaves_nothing_behind() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let handle = add_watch(&mut h, &mut client, 10);
    assert_eq!(h.handle.subscriptions_for(client.session()), 1);

    let r = h.roundtrip(&mut client, REMOVE_WATCH, 0, &[Value::Reference(handle)]);
    assert_eq!(r.result, None);
    assert_eq!(h.handle.subscriptions_for(client.session()), 0);
    assert_eq!(h.probe.removal_count(), 1);
    assert!(!client.is_disconnected());
}

#[test]
fn notifier_is_inert_once_removed() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let handle = add_watch(&mut h, &mut client, 10);
    let notifier = h.probe.take_watch();
    h.roundtrip(&mut client, REMOVE_WATCH, 0, &[Value::Reference(handle)]);

    assert!(!notifier.notify(&[Value::Bool(false), Value::I32(1)]));
    h.server.poll();
    assert!(client.next_event().is_none());
}

#[test]
fn closing_a_session_runs_every_removal_routine() {
    let mut h = mock_service::start();
    let mut client = h.client();
    let n = 3;

    for t in 0..n {
        add_watch(&mut h, &mut client, t);
    }
    assert_eq!(h.handle.stats().subscriptions, 3);

    drop(client);
    h.server.poll();
    assert_eq!(h.probe.removal_count(), 3);
    assert_eq!(h.handle.stats().subscriptions, 0);
}

#[test]
fn stale_handle_from_a_closed_session_is_a_violation() {
    let mut h = mock_service::start();
    let mut first = h.client();
    let handle = add_watch(&mut h, &mut first, 40);

    drop(first);
    h.server.poll();
    assert_eq!(h.probe.removal_count(), 1);

    let mut second = h.client();
    second
        .send_call(REMOVE_WATCH, 0, &[Value::Reference(handle)])
        .unwrap();
    h.server.poll();

    assert!(second.is_disconnected());
    assert_eq!(h.probe.removal_count(), 1);
    assert_eq!(h.handle.stats().sessions, 0);
}

#[test]
fn handle_owned_by_another_session_is_a_violation() {
    let mut h = mock_service::start();
    let mut owner = h.client();
    let mut thief = h.client();
    let handle = add_watch(&mut h, &mut owner, 40);

    thief
        .send_call(REMOVE_WATCH, 0, &[Value::Reference(handle)])
        .unwrap();
    h.server.poll();

    assert!(thief.is_disconnected());
    assert!(!owner.is_disconnected());
    assert_eq!(h.handle.subscriptions_for(owner.session()), 1);
    assert_eq!(h.probe.removal_count(), 0);
}

#[test]
fn refused_registration_returns_a_null_handle() {
    let mut h = mock_service::start();
    let mut client = h.client();

    assert_eq!(add_watch(&mut h, &mut client, -1), 0);
    assert_eq!(h.handle.stats().subscriptions, 0);
}

#[test]
#[should_panic(expected = "subscription pool exhausted")]
fn subscription_pool_exhaustion_is_fatal() {
    let config = BindingConfig {
        subscription_pool_size: 1,
        ..BindingConfig::default()
    };
    let mut h = mock_service::start_with(config);
    let mut client = h.client();
    add_watch(&mut h, &mut client, 1);
    add_watch(&mut h, &mut client, 2);
}

#[test]
fn one_shot_callback_fires_once_and_releases_its_record() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let r = h.roundtrip(&mut client, PING, 0, &[Value::U32(5), Value::Reference(0x11)]);
    assert_eq!(r.result, None);
    assert_eq!(h.handle.stats().subscriptions, 1);

    assert!(h.probe.take_ping().notify(&[Value::U32(5)]));
    assert_eq!(h.handle.stats().subscriptions, 0);

    let (id, event) = client.next_event().expect("pong");
    assert_eq!(id, PING);
    assert_eq!(event.context, 0x11);
    assert_eq!(event.params, vec![Value::U32(5)]);
}

#[test]
fn unfired_one_shot_is_released_when_dropped() {
    let mut h = mock_service::start();
    let mut client = h.client();

    h.roundtrip(&mut client, PING, 0, &[Value::U32(1), Value::Reference(0)]);
    assert_eq!(h.handle.stats().subscriptions, 1);

    drop(h.probe.take_ping());
    assert_eq!(h.handle.stats().subscriptions, 0);
    assert!(client.next_event().is_none());
}

#[test]
fn events_wait_behind_a_blocking_call() {
    let mut h = mock_service::start();
    let mut client = h.client();
    add_watch(&mut h, &mut client, 0);
    let notifier = h.probe.take_watch();

    // Sent ahead of the response.
    let txn = client.send_call(GET_TEMP, 0, &[]).unwrap();
    assert!(notifier.notify(&[Value::Bool(true), Value::I32(3)]));
    h.server.poll();

    assert!(client.take_response(txn).is_some());
    let (_, event) = client.next_event().expect("event kept");
    assert_eq!(event.params[1], Value::I32(3));
}

#[test]
fn response_gets_through_behind_a_flood_of_events() {
    let mut h = mock_service::start();
    let mut client = h.client();
    add_watch(&mut h, &mut client, 0);
    let notifier = h.probe.take_watch();

    let txn = client.send_call(GET_TEMP, 0, &[]).unwrap();
    for v in 0..100 {
        notifier.notify(&[Value::Bool(true), Value::I32(v)]);
    }
    h.server.poll();

    let r = client.take_response(txn).expect("response kept");
    assert_eq!(r.result, Some(Value::I32(TEMP)));

    let mut events = Vec::new();
    while let Some((_, ev)) = client.next_event() {
        events.push(ev.params[1].clone());
    }
    assert_eq!(events.len(), 2 * MAILBOX_DEPTH);
    assert_eq!(events.first(), Some(&Value::I32(0)));
    assert_eq!(events.last(), Some(&Value::I32(2 * MAILBOX_DEPTH as i32 - 1)));
    assert_eq!(client.shed_events(), 100 - 2 * MAILBOX_DEPTH);
}

#[test]
fn blocking_call_completes_while_events_pile_up() {
    let mut h = mock_service::start();
    let mut client = h.client();
    add_watch(&mut h, &mut client, 0);
    let notifier = h.probe.take_watch();
    for v in 0..(3 * MAILBOX_DEPTH) as i32 {
        notifier.notify(&[Value::Bool(false), Value::I32(v)]);
    }

    let handle = h.handle.clone();
    let caller = thread::spawn(move || {
        let r = client.call(GET_TEMP, 0, &[]);
        handle.shutdown();
        r.map(|r| r.result)
    });
    h.server.run();

    assert_eq!(caller.join().unwrap().unwrap(), Some(Value::I32(TEMP)));
}

#[test]
fn client_dropped_on_the_server_thread_closes_at_once() {
    let mut h = mock_service::start();
    let mut owner = h.client();
    let mut busy = h.client();
    add_watch(&mut h, &mut owner, 5);

    for _ in 0..INBOX_DEPTH {
        busy.send_call(GET_TEMP, 0, &[]).unwrap();
    }
    assert!(busy.send_call(GET_TEMP, 0, &[]).is_err());

    drop(owner);
    assert_eq!(h.probe.removal_count(), 1);
    assert_eq!(h.handle.stats().sessions, 1);
    assert_eq!(h.handle.stats().subscriptions, 0);
}
