//! Synchronous calls over a local session.

use ifbind::prelude::*;

use crate::mock_service::{self, DESCRIBE, GET_TEMP, RESET, TEMP};

#[test]
fn return_only_call_yields_the_value() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let r = h.roundtrip(&mut client, GET_TEMP, 0, &[]);
    assert_eq!(r.result, Some(Value::I32(TEMP)));
    assert!(r.outputs.is_empty());
    assert_eq!(h.probe.call_count(), 1);
}

#[test]
fn handler_sees_its_session() {
    let mut h = mock_service::start();
    let mut a = h.client();
    let mut b = h.client();
    assert_ne!(a.session(), b.session());

    h.roundtrip(&mut a, GET_TEMP, 0, &[]);
    h.roundtrip(&mut b, GET_TEMP, 0, &[]);
    assert_eq!(h.probe.call_count(), 2);
    assert_eq!(h.handle.stats().sessions, 2);
}

#[test]
fn only_requested_outputs_come_back() {
    let mut h = mock_service::start();
    let mut client = h.client();
    let inputs = [Value::U8(4), Value::from("tank")];

    let both = h.roundtrip(&mut client, DESCRIBE, 0b11, &inputs);
    assert_eq!(
        both.outputs,
        vec![Some(Value::from("TANK")), Some(Value::U32(40))]
    );

    let count_only = h.roundtrip(&mut client, DESCRIBE, 0b10, &inputs);
    assert_eq!(count_only.outputs, vec![None, Some(Value::U32(40))]);

    let none = h.roundtrip(&mut client, DESCRIBE, 0, &inputs);
    assert_eq!(none.outputs, vec![None, None]);
}

#[test]
fn zero_output_call_gets_exactly_one_response() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let txn = client.send_call(RESET, 0, &[]).unwrap();
    assert_eq!(h.server.poll(), 1);

    let r = client.take_response(txn).expect("one response");
    assert_eq!(r.result, None);
    assert!(r.outputs.is_empty());
    assert!(client.take_response(txn).is_none());
    assert!(client.next_event().is_none());
}

#[test]
fn pipelined_calls_are_matched_by_transaction() {
    let mut h = mock_service::start();
    let mut client = h.client();

    let t1 = client.send_call(DESCRIBE, 0b01, &[Value::U8(1), Value::from("a")]).unwrap();
    let t2 = client.send_call(GET_TEMP, 0, &[]).unwrap();
    let t3 = client.send_call(DESCRIBE, 0b01, &[Value::U8(2), Value::from("b")]).unwrap();
    h.server.poll();

    assert_eq!(client.take_response(t2).unwrap().result, Some(Value::I32(TEMP)));
    assert_eq!(client.take_response(t3).unwrap().outputs[0], Some(Value::from("B")));
    assert_eq!(client.take_response(t1).unwrap().outputs[0], Some(Value::from("A")));
}

#[test]
fn mismatched_schema_is_refused_at_connect() {
    let h = mock_service::start();
    let drifted = mock_service::probe_schema()
        .operation(OperationSpec::call(9, "Extra"));

    let err = h.handle.connect(&drifted).err();
    assert_eq!(err, Some(BindError::Refused(Violation::ProtocolMismatch)));
    assert_eq!(h.handle.stats().sessions, 0);
}

#[test]
fn dropped_client_closes_its_session() {
    let mut h = mock_service::start();
    let client = h.client();
    assert_eq!(h.handle.stats().sessions, 1);

    drop(client);
    h.server.poll();
    assert_eq!(h.handle.stats().sessions, 0);
}

#[test]
fn session_limit_is_enforced() {
    let config = BindingConfig {
        max_sessions: 1,
        ..BindingConfig::default()
    };
    let h = mock_service::start_with(config);
    let _first = h.client();

    let second = h.handle.connect(&mock_service::probe_schema()).err();
    assert_eq!(second, Some(BindError::Channel(ChannelError::Full)));
}

#[test]
fn missing_handler_blocks_advertise() {
    let result = ServiceBuilder::new(mock_service::probe_schema(), BindingConfig::default())
        .on_call(GET_TEMP, |_ctx, _args| Reply::returning(1i32))
        .advertise();
    assert!(matches!(result, Err(BindError::HandlerMissing(_))));
}

#[test]
fn run_serves_blocking_clients_until_shutdown() {
    let mut h = mock_service::start();
    let handle = h.handle.clone();

    let worker = std::thread::spawn(move || {
        let mut client = handle.connect(&mock_service::probe_schema()).unwrap();
        let r = client.call(GET_TEMP, 0, &[]).unwrap();
        let d = client
            .call(DESCRIBE, 0b01, &[Value::U8(0), Value::from("x")])
            .unwrap();
        handle.shutdown();
        (r.result, d.outputs)
    });

    h.server.run();
    let (temp, outputs) = worker.join().unwrap();
    assert_eq!(temp, Some(Value::I32(TEMP)));
    assert_eq!(outputs, vec![Some(Value::from("X")), None]);
    assert_eq!(h.handle.stats(), ServerStats::default());
}
