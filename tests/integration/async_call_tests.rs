//! Deferred responses through a `Responder`.

use std::thread;

use ifbind::prelude::*;

use crate::mock_service::{self, MEASURE};

fn measured() -> Reply {
    Reply::empty().with_output(0, 2.5f64).with_output(1, true)
}

#[test]
fn response_arrives_only_when_the_implementation_answers() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let txn = client.send_call(MEASURE, 0b11, &[Value::U16(8)]).unwrap();
    h.server.poll();
    assert!(client.take_response(txn).is_none());
    assert_eq!(h.handle.stats().commands, 1);

    let command = h.probe.take_command();
    h.server.responder().respond(command, measured());

    let r = client.take_response(txn).expect("response after respond");
    assert_eq!(r.outputs, vec![Some(Value::F64(2.5)), Some(Value::Bool(true))]);
    assert_eq!(h.handle.stats().commands, 0);
}

#[test]
fn respond_from_another_thread_is_sent_by_the_server() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let txn = client.send_call(MEASURE, 0b01, &[Value::U16(1)]).unwrap();
    h.server.poll();
    let command = h.probe.take_command();
    let responder = h.handle.responder();

    thread::spawn(move || responder.respond(command, measured()))
        .join()
        .unwrap();
    // Handed over, not yet sent.
    assert!(client.take_response(txn).is_none());

    assert_eq!(h.server.poll(), 1);
    let r = client.take_response(txn).unwrap();
    assert_eq!(r.outputs, vec![Some(Value::F64(2.5)), None]);
}

#[test]
fn unset_requested_output_is_sent_as_default() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let txn = client.send_call(MEASURE, 0b11, &[Value::U16(1)]).unwrap();
    h.server.poll();
    h.server
        .responder()
        .respond(h.probe.take_command(), Reply::empty().with_output(0, 1.0f64));

    let r = client.take_response(txn).unwrap();
    assert_eq!(r.outputs, vec![Some(Value::F64(1.0)), Some(Value::Bool(false))]);
}

#[test]
#[should_panic(expected = "response already sent")]
fn second_respond_is_fatal() {
    let mut h = mock_service::start();
    let mut client = h.client();

    client.send_call(MEASURE, 0, &[Value::U16(1)]).unwrap();
    h.server.poll();
    let command = h.probe.take_command();
    let responder = h.server.responder();

    responder.respond(command, measured());
    responder.respond(command, measured());
}

#[test]
fn respond_after_the_caller_left_is_dropped() {
    let mut h = mock_service::start();
    let mut client = h.client();

    client.send_call(MEASURE, 0b11, &[Value::U16(1)]).unwrap();
    h.server.poll();
    let command = h.probe.take_command();

    drop(client);
    h.server.poll();
    assert_eq!(h.handle.stats().sessions, 0);
    assert_eq!(h.handle.stats().commands, 1);

    h.server.responder().respond(command, measured());
    assert_eq!(h.handle.stats().commands, 0);
}

#[test]
#[should_panic(expected = "command pool exhausted")]
fn command_pool_exhaustion_is_fatal() {
    let config = BindingConfig {
        command_pool_size: 1,
        ..BindingConfig::default()
    };
    let mut h = mock_service::start_with(config);
    let mut client = h.client();

    client.send_call(MEASURE, 0, &[Value::U16(1)]).unwrap();
    client.send_call(MEASURE, 0, &[Value::U16(2)]).unwrap();
    h.server.poll();
}

#[test]
fn async_handler_is_rejected_for_add_handler_operations() {
    let result = ServiceBuilder::new(mock_service::probe_schema(), BindingConfig::default())
        .on_async_call(mock_service::ADD_WATCH, |_ctx, _args, _command| {})
        .advertise();
    assert!(matches!(
        result,
        Err(BindError::Schema(SchemaError::HandlerKindMismatch("AddWatch")))
    ));
}
